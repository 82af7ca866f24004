//! Per-(registry, problem-size) learned state: round-robin sampling,
//! median-based pruning and permanent selection.

use crate::config::TuningConfig;
use crate::problem::ProblemSize;
use std::collections::HashMap;

/// Shared evidence pool for one registry. Every execution node that
/// invokes the registry with a given problem size reads and contributes
/// to the same `SizeState`.
pub(crate) struct SelectionState {
    pub(crate) name: String,
    pub(crate) alternative_names: Vec<String>,
    pub(crate) config: TuningConfig,
    sizes: HashMap<ProblemSize, SizeState>,
}

struct SizeState {
    cursor: usize,
    round: usize,
    /// Accepted samples per alternative; grows monotonically.
    samples: Vec<Vec<f64>>,
    /// Pipeline partial-stage buffers; reset each cycle.
    stage_buffer: Vec<Vec<Option<f64>>>,
    best: Option<usize>,
}

impl SizeState {
    fn new(alternatives: usize, stages: usize) -> Self {
        Self {
            cursor: 0,
            round: 0,
            samples: vec![Vec::new(); alternatives],
            stage_buffer: vec![vec![None; stages]; alternatives],
            best: None,
        }
    }
}

/// Outcome of handing one accepted sample to the convergence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleOutcome {
    /// Sample recorded (or buffered); exploration continues.
    Recorded,
    /// The selection for this problem size was just cached.
    Selected(usize),
}

impl SelectionState {
    pub(crate) fn new(
        name: impl Into<String>,
        alternative_names: Vec<String>,
        config: TuningConfig,
    ) -> Self {
        Self {
            name: name.into(),
            alternative_names,
            config,
            sizes: HashMap::new(),
        }
    }

    fn total(&self) -> usize {
        self.alternative_names.len()
    }

    fn entry(&mut self, size: &ProblemSize) -> &mut SizeState {
        let (alternatives, stages) = (self.total(), self.config.stages);
        self.sizes
            .entry(size.clone())
            .or_insert_with(|| SizeState::new(alternatives, stages))
    }

    /// Cached winner for `size`, if the selection has converged.
    pub(crate) fn best(&self, size: &ProblemSize) -> Option<usize> {
        self.sizes.get(size).and_then(|state| state.best)
    }

    /// Index of the alternative currently under evaluation for `size`.
    pub(crate) fn cursor(&mut self, size: &ProblemSize) -> usize {
        self.entry(size).cursor
    }

    /// Record one elapsed-time sample for the alternative that was at
    /// `cursor` when the call was dispatched, then advance the cycle
    /// and evaluate the pruning decision.
    pub(crate) fn record(
        &mut self,
        size: &ProblemSize,
        cursor: usize,
        stage: usize,
        elapsed: f64,
    ) -> SampleOutcome {
        let total = self.total();
        let stages = self.config.stages;
        let rounds = self.config.rounds;
        let decision_round = self.config.decision_round();
        let pruning_speedup = self.config.pruning_speedup;
        let state = self.entry(size);

        let mut cursor = cursor;
        let mut round = state.round;

        if stages == 1 {
            state.samples[cursor].push(elapsed);
            (cursor, round) = evolve(cursor, round, total);
        } else {
            state.stage_buffer[cursor][stage] = Some(elapsed);
            if stage + 1 == stages {
                if state.stage_buffer[cursor].iter().all(Option::is_some) {
                    let pipeline_elapsed: f64 = state.stage_buffer[cursor].iter().flatten().sum();
                    state.samples[cursor].push(pipeline_elapsed);
                    (cursor, round) = evolve(cursor, round, total);
                }
                // Clear the buffer the cursor now points at so a stale
                // partial cycle never leaks into the next one.
                state.stage_buffer[cursor] = vec![None; stages];
            }
        }

        let mut outcome = SampleOutcome::Recorded;
        if cursor == 0 && round >= decision_round {
            let medians: Vec<Option<f64>> = state.samples.iter().map(|s| median(s)).collect();
            let min_time = medians
                .iter()
                .flatten()
                .copied()
                .fold(f64::INFINITY, f64::min);
            if min_time.is_finite() {
                let live = medians
                    .iter()
                    .flatten()
                    .filter(|&&m| m <= min_time * pruning_speedup)
                    .count();
                if round == rounds || live == 1 {
                    let best = argmin(&medians);
                    state.best = Some(best);
                    outcome = SampleOutcome::Selected(best);
                } else {
                    // Skip leading pruned alternatives; the cycle
                    // otherwise still advances one index at a time.
                    for (index, candidate) in medians.iter().enumerate() {
                        if matches!(candidate, Some(m) if *m <= min_time * pruning_speedup) {
                            cursor = index;
                            break;
                        }
                    }
                }
            }
        }

        state.cursor = cursor;
        state.round = round;
        outcome
    }

    /// Median elapsed time per alternative; `None` for alternatives
    /// without accepted samples.
    pub(crate) fn medians(&self, size: &ProblemSize) -> Vec<Option<f64>> {
        match self.sizes.get(size) {
            Some(state) => state.samples.iter().map(|s| median(s)).collect(),
            None => vec![None; self.total()],
        }
    }

    pub(crate) fn sample_counts(&self, size: &ProblemSize) -> Vec<usize> {
        match self.sizes.get(size) {
            Some(state) => state.samples.iter().map(Vec::len).collect(),
            None => vec![0; self.total()],
        }
    }

    /// Speedup of the selected alternative over the slowest observed
    /// one, available once the selection has converged.
    pub(crate) fn speedup(&self, size: &ProblemSize) -> Option<f64> {
        let best = self.best(size)?;
        let medians = self.medians(size);
        let best_median = medians[best]?;
        let worst = medians.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
        if best_median > 0.0 && worst.is_finite() {
            Some(worst / best_median)
        } else {
            None
        }
    }

    /// Problem sizes with recorded state, in deterministic order.
    pub(crate) fn problem_sizes(&self) -> Vec<ProblemSize> {
        let mut sizes: Vec<ProblemSize> = self.sizes.keys().cloned().collect();
        sizes.sort();
        sizes
    }
}

fn evolve(cursor: usize, round: usize, total: usize) -> (usize, usize) {
    let cursor = (cursor + 1) % total;
    let round = if cursor == 0 { round + 1 } else { round };
    (cursor, round)
}

fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Index of the smallest median; ties break toward the lowest index,
/// and alternatives without samples are never selected.
fn argmin(medians: &[Option<f64>]) -> usize {
    let mut best = 0;
    let mut best_median = f64::INFINITY;
    for (index, candidate) in medians.iter().enumerate() {
        if let Some(m) = candidate {
            if *m < best_median {
                best = index;
                best_median = *m;
            }
        }
    }
    best
}
