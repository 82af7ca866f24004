//! Demonstration matmul kernels for the selection engine.
//!
//! These are the interchangeable implementations the engine chooses
//! among in the demo harness and the integration tests. They share one
//! call signature per mode and differ only in how they compute.

pub mod matmul;
pub mod pipeline;

pub use matmul::*;
pub use pipeline::*;
