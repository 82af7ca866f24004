//! Dispatch facade: the callable applications invoke in place of
//! calling a kernel directly.

use crate::alternative::Alternative;
use crate::config::TuningConfig;
use crate::error::EngineError;
use crate::problem::{CallSite, ProblemSize};
use crate::runtime::Runtime;
use crate::state::{SampleOutcome, SelectionState};
use crate::tree::NodeId;
use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info};

/// Builder for a [`Tuned`] registry. Validation happens in
/// [`TunedBuilder::build`]; a registry is never partially constructed.
pub struct TunedBuilder<A, R> {
    name: String,
    config: TuningConfig,
    alternatives: Vec<Alternative<A, R>>,
    classifier: Option<Rc<dyn Fn(&A) -> ProblemSize>>,
}

impl<A, R> TunedBuilder<A, R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: TuningConfig::default(),
            alternatives: Vec::new(),
            classifier: None,
        }
    }

    pub fn rounds(mut self, rounds: usize) -> Self {
        self.config.rounds = rounds;
        self
    }

    pub fn pruning_speedup(mut self, pruning_speedup: f64) -> Self {
        self.config.pruning_speedup = pruning_speedup;
        self
    }

    pub fn prune_after_round(mut self, prune_after_round: usize) -> Self {
        self.config.prune_after_round = prune_after_round;
        self
    }

    pub fn stages(mut self, stages: usize) -> Self {
        self.config.stages = stages;
        self
    }

    /// Pure function mapping call arguments to the problem-size key the
    /// learned state is partitioned by.
    pub fn classifier(mut self, classifier: impl Fn(&A) -> ProblemSize + 'static) -> Self {
        self.classifier = Some(Rc::new(classifier));
        self
    }

    pub fn alternative(mut self, alternative: Alternative<A, R>) -> Self {
        self.alternatives.push(alternative);
        self
    }

    /// Convenience for a single-stage alternative.
    pub fn single(self, name: impl Into<String>, f: impl Fn(&A) -> Result<R> + 'static) -> Self {
        self.alternative(Alternative::single(name, f))
    }

    pub fn build(self, runtime: &Runtime) -> Result<Tuned<A, R>, EngineError> {
        let name = self.name;
        self.config.validate(&name)?;
        if self.alternatives.is_empty() {
            return Err(EngineError::configuration(
                &name,
                "at least one alternative is required",
            ));
        }
        let classifier = self.classifier.ok_or_else(|| {
            EngineError::configuration(&name, "a problem-size classifier is required")
        })?;

        for alternative in &self.alternatives {
            if self.config.stages == 1 {
                if alternative.is_pipeline() {
                    return Err(EngineError::configuration(
                        &name,
                        format!(
                            "expected a plain callable for alternative '{}', got a pipeline",
                            alternative.name()
                        ),
                    ));
                }
            } else if !alternative.is_pipeline() || alternative.stage_count() != self.config.stages
            {
                return Err(EngineError::configuration(
                    &name,
                    format!(
                        "expected {} stage callables for pipeline '{}', got {}",
                        self.config.stages,
                        alternative.name(),
                        alternative.stage_count()
                    ),
                ));
            }
        }

        let state = Rc::new(RefCell::new(SelectionState::new(
            name.clone(),
            self.alternatives
                .iter()
                .map(|a| a.name().to_string())
                .collect(),
            self.config,
        )));
        let registry = runtime.register_state(Rc::clone(&state));

        Ok(Tuned {
            name,
            config: self.config,
            alternatives: self.alternatives,
            classifier,
            state,
            registry,
            runtime: runtime.clone(),
            executions: RefCell::new(HashMap::new()),
        })
    }
}

/// One tuned operation: an ordered set of alternatives, a classifier
/// and the learned per-problem-size selection state, dispatched through
/// [`Tuned::invoke`] / [`Tuned::invoke_stage`].
pub struct Tuned<A, R> {
    name: String,
    config: TuningConfig,
    alternatives: Vec<Alternative<A, R>>,
    classifier: Rc<dyn Fn(&A) -> ProblemSize>,
    state: Rc<RefCell<SelectionState>>,
    registry: usize,
    runtime: Runtime,
    /// Execution nodes registered from this facade, keyed by the nested
    /// invocation context (active parent + call site).
    executions: RefCell<HashMap<(NodeId, CallSite), NodeId>>,
}

impl<A, R> std::fmt::Debug for Tuned<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuned")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("alternatives", &self.alternative_names())
            .finish_non_exhaustive()
    }
}

impl<A, R> Tuned<A, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alternative_names(&self) -> Vec<String> {
        self.alternatives
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// Invoke a single-stage registry, dispatching to the alternative
    /// under evaluation (or the cached winner) for the call's problem
    /// size.
    pub fn invoke(&self, site: CallSite, args: &A) -> Result<R> {
        if self.config.stages != 1 {
            return Err(EngineError::StageRequired {
                name: self.name.clone(),
                stages: self.config.stages,
            }
            .into());
        }
        self.dispatch(site, 0, args)
    }

    /// Invoke one stage of a pipeline registry. The per-stage timings
    /// of a cycle are summed into a single pipeline sample once the
    /// terminal stage completes.
    pub fn invoke_stage(&self, site: CallSite, stage: usize, args: &A) -> Result<R> {
        if stage >= self.config.stages {
            return Err(EngineError::InvalidStage {
                name: self.name.clone(),
                stage,
                stages: self.config.stages,
            }
            .into());
        }
        self.dispatch(site, stage, args)
    }

    fn dispatch(&self, site: CallSite, stage: usize, args: &A) -> Result<R> {
        // Deterministic production mode: no measurement, no tree
        // bookkeeping, no caching.
        if self.runtime.is_forced_to_first() {
            return self.alternatives[0].stage(stage).as_ref()(args);
        }

        let node = self.resolve_node(site);
        let size = (self.classifier)(args);
        self.runtime.set_problem_size(node, size.clone());

        // Bind the lookup first: a borrow held across the alternative
        // call would poison re-entrant dispatch into this registry.
        let best = self.state.borrow().best(&size);
        if let Some(best) = best {
            return self.alternatives[best].stage(stage).as_ref()(args);
        }

        let cursor = self.state.borrow_mut().cursor(&size);

        // The parent stays blocked until this node's selection for the
        // current problem size converges.
        self.runtime.block_parent(node);
        self.runtime.push_parent(node);
        let started = Instant::now();
        let result = self.alternatives[cursor].stage(stage).as_ref()(args);
        let elapsed = started.elapsed().as_secs_f64();
        self.runtime.pop_parent();

        // An alternative failure propagates unmodified; no sample is
        // recorded and the cursor stays put so the same alternative is
        // retried on the next call.
        let output = result?;

        if self.runtime.is_blocked(node) {
            debug!(
                registry = %self.name,
                size = %size,
                "nested tuning not yet converged; sample discarded"
            );
            return Ok(output);
        }

        match self.state.borrow_mut().record(&size, cursor, stage, elapsed) {
            SampleOutcome::Selected(best) => {
                self.runtime.unblock_parent(node);
                info!(
                    registry = %self.name,
                    size = %size,
                    winner = %self.alternatives[best].name(),
                    "alternative selected"
                );
            }
            SampleOutcome::Recorded => {
                debug!(
                    registry = %self.name,
                    size = %size,
                    alternative = %self.alternatives[cursor].name(),
                    stage,
                    elapsed_s = elapsed,
                    "sample recorded"
                );
            }
        }
        Ok(output)
    }

    fn resolve_node(&self, site: CallSite) -> NodeId {
        let parent = self.runtime.current_parent();
        let key = (parent, site);
        if let Some(node) = self.executions.borrow().get(&key) {
            return *node;
        }
        let node = self
            .runtime
            .register_node(parent, &self.name, Some(self.registry));
        self.executions.borrow_mut().insert(key, node);
        node
    }

    /// Problem size the classifier assigns to `args`.
    pub fn problem_size(&self, args: &A) -> ProblemSize {
        (self.classifier)(args)
    }

    /// Whether a best alternative has been found for the problem size
    /// these arguments classify into.
    pub fn best_found(&self, args: &A) -> bool {
        self.state.borrow().best(&self.problem_size(args)).is_some()
    }

    pub fn selected_index(&self, size: &ProblemSize) -> Option<usize> {
        self.state.borrow().best(size)
    }

    pub fn selected_name(&self, size: &ProblemSize) -> Option<String> {
        let index = self.selected_index(size)?;
        Some(self.alternatives[index].name().to_string())
    }

    /// Median elapsed time per alternative for `size`; `None` entries
    /// denote alternatives without accepted samples.
    pub fn medians(&self, size: &ProblemSize) -> Vec<Option<f64>> {
        self.state.borrow().medians(size)
    }

    pub fn sample_counts(&self, size: &ProblemSize) -> Vec<usize> {
        self.state.borrow().sample_counts(size)
    }

    /// Speedup of the selected alternative over the slowest observed
    /// one; available once a selection is cached for `size`.
    pub fn speedup(&self, size: &ProblemSize) -> Option<f64> {
        self.state.borrow().speedup(size)
    }

    /// Problem sizes with recorded tuning state, in deterministic order.
    pub fn problem_sizes(&self) -> Vec<ProblemSize> {
        self.state.borrow().problem_sizes()
    }

    /// Registry-wide timing table (one row per problem size).
    pub fn table(&self) -> String {
        crate::report::render_registry_table(&self.state.borrow(), None)
    }
}
