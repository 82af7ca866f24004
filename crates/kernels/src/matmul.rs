//! Single-stage matmul alternatives.

use anyhow::{ensure, Result};
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;

fn validate(lhs: &ArrayView2<'_, f32>, rhs: &ArrayView2<'_, f32>) -> Result<()> {
    ensure!(
        lhs.ncols() == rhs.nrows(),
        "inner dimension mismatch: lhs is {:?}, rhs is {:?}",
        lhs.dim(),
        rhs.dim()
    );
    Ok(())
}

/// Straight `ndarray` dot product; the baseline every other alternative
/// is measured against.
pub fn reference_matmul(lhs: ArrayView2<'_, f32>, rhs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    validate(&lhs, &rhs)?;
    Ok(lhs.dot(&rhs))
}

/// Cache-blocked triple loop.
pub fn blocked_matmul(
    lhs: ArrayView2<'_, f32>,
    rhs: ArrayView2<'_, f32>,
    tile: usize,
) -> Result<Array2<f32>> {
    validate(&lhs, &rhs)?;
    let (m, k) = lhs.dim();
    let n = rhs.ncols();
    let tile = tile.max(1);

    let mut output = Array2::<f32>::zeros((m, n));
    for i0 in (0..m).step_by(tile) {
        let i_max = (i0 + tile).min(m);
        for j0 in (0..n).step_by(tile) {
            let j_max = (j0 + tile).min(n);
            for p0 in (0..k).step_by(tile) {
                let p_max = (p0 + tile).min(k);
                let a_block = lhs.slice(s![i0..i_max, p0..p_max]);
                let b_block = rhs.slice(s![p0..p_max, j0..j_max]);
                let mut c_block = output.slice_mut(s![i0..i_max, j0..j_max]);

                for (row_idx, a_row) in a_block.outer_iter().enumerate() {
                    for (col_idx, b_col) in b_block.axis_iter(Axis(1)).enumerate() {
                        c_block[(row_idx, col_idx)] += a_row.dot(&b_col);
                    }
                }
            }
        }
    }
    Ok(output)
}

/// Row-parallel matmul over a rayon pool.
pub fn parallel_matmul(lhs: ArrayView2<'_, f32>, rhs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    validate(&lhs, &rhs)?;
    let (m, _) = lhs.dim();
    let n = rhs.ncols();

    let mut output = Array2::<f32>::zeros((m, n));
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row_idx, mut row)| {
            let lhs_row = lhs.row(row_idx);
            for (col_idx, value) in row.iter_mut().enumerate() {
                *value = lhs_row.dot(&rhs.column(col_idx));
            }
        });
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn inputs(m: usize, k: usize, n: usize) -> (Array2<f32>, Array2<f32>) {
        let lhs = Array2::from_shape_fn((m, k), |(i, j)| (i + j) as f32 * 0.1);
        let rhs = Array2::from_shape_fn((k, n), |(i, j)| (i * j + 1) as f32 * 0.05);
        (lhs, rhs)
    }

    #[test]
    fn blocked_matches_reference() {
        let (lhs, rhs) = inputs(33, 17, 29);
        let reference = reference_matmul(lhs.view(), rhs.view()).expect("reference");
        let blocked = blocked_matmul(lhs.view(), rhs.view(), 8).expect("blocked");
        for (a, b) in reference.iter().zip(blocked.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn parallel_matches_reference() {
        let (lhs, rhs) = inputs(32, 24, 16);
        let reference = reference_matmul(lhs.view(), rhs.view()).expect("reference");
        let parallel = parallel_matmul(lhs.view(), rhs.view()).expect("parallel");
        for (a, b) in reference.iter().zip(parallel.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn rejects_shape_mismatch() {
        let lhs = Array2::<f32>::zeros((4, 3));
        let rhs = Array2::<f32>::zeros((5, 2));
        assert!(reference_matmul(lhs.view(), rhs.view()).is_err());
    }
}
