//! Error taxonomy for registry construction and dispatch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed registry construction, detected eagerly at build time.
    /// The registry is never partially constructed.
    #[error("registry '{name}': {reason}")]
    Configuration { name: String, reason: String },

    /// Stage index out of range at call time. No state is mutated.
    #[error("registry '{name}': stage {stage} out of range ({stages} stages)")]
    InvalidStage {
        name: String,
        stage: usize,
        stages: usize,
    },

    /// `invoke` was used on a pipeline registry that needs an explicit
    /// stage index.
    #[error("registry '{name}' is a {stages}-stage pipeline; use invoke_stage")]
    StageRequired { name: String, stages: usize },
}

impl EngineError {
    pub(crate) fn configuration(name: &str, reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
