//! Problem-size keys and call-site identity tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque classification key grouping calls that are expected to share
/// performance characteristics. Equal keys share tuning state; distinct
/// keys are tuned fully independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProblemSize {
    Dims(Vec<usize>),
    Label(String),
}

impl ProblemSize {
    pub fn dims(dims: &[usize]) -> Self {
        ProblemSize::Dims(dims.to_vec())
    }

    pub fn label(label: impl Into<String>) -> Self {
        ProblemSize::Label(label.into())
    }
}

impl fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemSize::Dims(dims) => {
                let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
                write!(f, "{}", parts.join("x"))
            }
            ProblemSize::Label(label) => write!(f, "{label}"),
        }
    }
}

/// Source location token identifying one call site of a tuned operation.
///
/// Together with the execution node active at invocation time this
/// forms the nested-call-path identity under which execution-tree nodes
/// are registered: the same source line reached through two different
/// nesting contexts yields two distinct nodes, while repeated calls
/// from the identical context reuse one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

/// Capture the current source location as a [`CallSite`].
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::problem::CallSite {
            file: file!(),
            line: line!(),
            column: column!(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_display_as_shape() {
        assert_eq!(ProblemSize::dims(&[64, 128, 32]).to_string(), "64x128x32");
        assert_eq!(ProblemSize::label("warmup").to_string(), "warmup");
    }

    #[test]
    fn call_sites_on_distinct_lines_differ() {
        let a = call_site!();
        let b = call_site!();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
