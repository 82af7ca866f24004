//! Candidate implementations competing for selection.

use anyhow::Result;
use std::rc::Rc;

/// One stage of a candidate implementation. All alternatives within a
/// registry accept the same argument shape per stage and return the
/// same result type; errors propagate to the caller unmodified.
pub type StageFn<A, R> = Rc<dyn Fn(&A) -> Result<R>>;

/// Wrap a closure as a pipeline stage.
pub fn stage_fn<A, R>(f: impl Fn(&A) -> Result<R> + 'static) -> StageFn<A, R> {
    Rc::new(f)
}

enum Body<A, R> {
    Single(StageFn<A, R>),
    Pipeline(Vec<StageFn<A, R>>),
}

/// A named candidate: either one callable (single-stage mode) or an
/// ordered list of per-stage callables (pipeline mode).
pub struct Alternative<A, R> {
    name: String,
    body: Body<A, R>,
}

impl<A, R> Alternative<A, R> {
    pub fn single(name: impl Into<String>, f: impl Fn(&A) -> Result<R> + 'static) -> Self {
        Self {
            name: name.into(),
            body: Body::Single(Rc::new(f)),
        }
    }

    pub fn pipeline(name: impl Into<String>, stages: Vec<StageFn<A, R>>) -> Self {
        Self {
            name: name.into(),
            body: Body::Pipeline(stages),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_pipeline(&self) -> bool {
        matches!(self.body, Body::Pipeline(_))
    }

    pub(crate) fn stage_count(&self) -> usize {
        match &self.body {
            Body::Single(_) => 1,
            Body::Pipeline(stages) => stages.len(),
        }
    }

    /// Callable for `stage`. The index has been validated by the
    /// dispatch facade before it reaches this point.
    pub(crate) fn stage(&self, stage: usize) -> &StageFn<A, R> {
        match &self.body {
            Body::Single(f) => f,
            Body::Pipeline(stages) => &stages[stage],
        }
    }
}
