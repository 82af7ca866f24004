//! Tuning configuration and validation.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Exploration budget: full round-robin cycles through the live
    /// alternatives before a winner must be declared.
    pub rounds: usize,
    /// Alternatives whose median exceeds `best_median * pruning_speedup`
    /// are discarded from further sampling.
    pub pruning_speedup: f64,
    /// Earliest round at which the pruning decision may trigger.
    pub prune_after_round: usize,
    /// Number of pipeline stages; 1 selects single-stage mode.
    pub stages: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            rounds: 10,
            pruning_speedup: 10.0,
            prune_after_round: 4,
            stages: 1,
        }
    }
}

impl TuningConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<(), EngineError> {
        if self.rounds < 1 {
            return Err(EngineError::configuration(
                name,
                "rounds must be greater or equal to one",
            ));
        }
        if self.pruning_speedup <= 1.0 {
            return Err(EngineError::configuration(
                name,
                "pruning speedup must be greater than one",
            ));
        }
        if self.prune_after_round < 1 {
            return Err(EngineError::configuration(
                name,
                "prune_after_round must be greater or equal to one",
            ));
        }
        if self.stages < 1 {
            return Err(EngineError::configuration(
                name,
                "stages must be greater or equal to one",
            ));
        }
        Ok(())
    }

    /// Round at which pruning decisions become legal.
    pub(crate) fn decision_round(&self) -> usize {
        self.prune_after_round.min(self.rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TuningConfig::default().validate("conv").is_ok());
    }

    #[test]
    fn rejects_zero_rounds() {
        let config = TuningConfig {
            rounds: 0,
            ..TuningConfig::default()
        };
        assert!(config.validate("conv").is_err());
    }

    #[test]
    fn rejects_non_amortizing_speedup() {
        let config = TuningConfig {
            pruning_speedup: 1.0,
            ..TuningConfig::default()
        };
        assert!(config.validate("conv").is_err());
    }

    #[test]
    fn decision_round_is_clamped_to_rounds() {
        let config = TuningConfig {
            rounds: 3,
            prune_after_round: 7,
            ..TuningConfig::default()
        };
        assert_eq!(config.decision_round(), 3);
    }
}
