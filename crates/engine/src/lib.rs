//! Runtime algorithm selection for interchangeable numerical kernels.
//!
//! Given several alternatives that implement the same operation, a
//! [`Tuned`] registry benchmarks them against live call traffic and
//! converges, independently per problem size, on the fastest one:
//!
//! - calls are classified into problem sizes by a caller-supplied
//!   classifier; each size keeps fully independent tuning state,
//! - alternatives are sampled round-robin, one timing per visit, and
//!   uncompetitive ones are pruned once their median exceeds the best
//!   median by the configured speedup ratio,
//! - nested tuned calls are tracked in an execution tree so an outer
//!   operation never records a timing contaminated by an inner
//!   operation that is still exploring,
//! - once a winner is cached for a size, dispatch degenerates to a
//!   direct call.
//!
//! All state is owned by a [`Runtime`] instance; the design is
//! single-threaded and reentrant (the runtime handle is deliberately
//! not `Send`).

pub mod alternative;
pub mod config;
pub mod error;
pub mod problem;
pub mod report;
pub mod runtime;
pub mod tuned;

mod state;
mod tree;

pub use alternative::{stage_fn, Alternative, StageFn};
pub use config::TuningConfig;
pub use error::EngineError;
pub use problem::{CallSite, ProblemSize};
pub use report::{RegistrySnapshot, RuntimeSnapshot, SizeSnapshot};
pub use runtime::Runtime;
pub use tuned::{Tuned, TunedBuilder};
