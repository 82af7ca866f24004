//! Two-stage matmul pipelines: stage 0 prepares the right-hand side,
//! stage 1 consumes the prepared form. Used to exercise pipeline-mode
//! tuning, where both stages of one alternative are timed cumulatively.

use anyhow::{anyhow, ensure, Result};
use ndarray::{Array2, Axis};
use std::cell::RefCell;

/// Carrier for one pipeline invocation. The stages communicate through
/// interior mutability so every stage keeps the same `&MatmulTask`
/// signature; single-threaded by design, like the engine itself.
pub struct MatmulTask {
    pub lhs: Array2<f32>,
    pub rhs: Array2<f32>,
    prepared: RefCell<Option<Array2<f32>>>,
    output: RefCell<Option<Array2<f32>>>,
}

impl MatmulTask {
    pub fn new(lhs: Array2<f32>, rhs: Array2<f32>) -> Result<Self> {
        ensure!(
            lhs.ncols() == rhs.nrows(),
            "inner dimension mismatch: lhs is {:?}, rhs is {:?}",
            lhs.dim(),
            rhs.dim()
        );
        Ok(Self {
            lhs,
            rhs,
            prepared: RefCell::new(None),
            output: RefCell::new(None),
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.lhs.nrows(), self.rhs.ncols(), self.lhs.ncols()]
    }

    pub fn take_output(&self) -> Option<Array2<f32>> {
        self.output.borrow_mut().take()
    }

    /// Stage 0 of the transposed pipeline: store the right-hand side
    /// transposed so stage 1 walks both operands row-major.
    pub fn prepare_transposed(&self) -> Result<()> {
        *self.prepared.borrow_mut() = Some(self.rhs.t().to_owned());
        Ok(())
    }

    /// Stage 1 of the transposed pipeline.
    pub fn multiply_transposed(&self) -> Result<()> {
        let prepared = self.prepared.borrow_mut().take();
        let packed = prepared.ok_or_else(|| anyhow!("stage 0 has not prepared the operand"))?;
        let (m, n) = (self.lhs.nrows(), packed.nrows());
        let mut output = Array2::<f32>::zeros((m, n));
        for (row_idx, lhs_row) in self.lhs.axis_iter(Axis(0)).enumerate() {
            for (col_idx, packed_row) in packed.axis_iter(Axis(0)).enumerate() {
                output[(row_idx, col_idx)] = lhs_row.dot(&packed_row);
            }
        }
        *self.output.borrow_mut() = Some(output);
        Ok(())
    }

    /// Stage 0 of the direct pipeline: nothing to prepare.
    pub fn prepare_identity(&self) -> Result<()> {
        Ok(())
    }

    /// Stage 1 of the direct pipeline: straight dot product on the
    /// original operands.
    pub fn multiply_direct(&self) -> Result<()> {
        *self.output.borrow_mut() = Some(self.lhs.dot(&self.rhs));
        Ok(())
    }
}
