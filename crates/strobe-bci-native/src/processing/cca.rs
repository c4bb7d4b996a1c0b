//! Canonical correlation analysis
//!
//! Only the leading canonical correlation is needed for scoring. It equals the
//! largest singular value of `Qx^T Qy`, where `Qx` and `Qy` are orthonormal
//! bases of the column-centered inputs.

use nalgebra::{DMatrix, SVD};

use crate::error::{CcaError, CcaResult};

/// Singular values below `max * RANK_TOLERANCE` are treated as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Iteration cap for the SVD
const SVD_MAX_ITERATIONS: usize = 1000;

/// Leading canonical correlation between `signal` (`n × p`) and
/// `reference` (`n × q`), in `[0, 1]`.
///
/// # Errors
///
/// Returns [`CcaError::ShapeMismatch`] when the row counts differ or are
/// below two, [`CcaError::Degenerate`] when either side has no variance,
/// and [`CcaError::NoConvergence`] / [`CcaError::NonFinite`] on numerical
/// failure.
pub fn leading_canonical_correlation(signal: &DMatrix<f64>, reference: &DMatrix<f64>) -> CcaResult<f64> {
    if signal.nrows() != reference.nrows() || signal.nrows() < 2 {
        return Err(CcaError::ShapeMismatch {
            signal_rows: signal.nrows(),
            reference_rows: reference.nrows(),
        });
    }

    let qx = orthonormal_basis(signal, "signal")?;
    let qy = orthonormal_basis(reference, "reference")?;

    let cross = qx.transpose() * qy;
    let svd = SVD::try_new(cross, false, false, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or(CcaError::NoConvergence)?;
    let r = svd.singular_values.max();
    if !r.is_finite() {
        return Err(CcaError::NonFinite);
    }
    Ok(r.clamp(0.0, 1.0))
}

/// Orthonormal basis for the column space of `m` after centering
fn orthonormal_basis(m: &DMatrix<f64>, which: &'static str) -> CcaResult<DMatrix<f64>> {
    if m.ncols() == 0 || m.iter().any(|v| !v.is_finite()) {
        return Err(CcaError::Degenerate { which });
    }

    let mut centered = m.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }

    let svd = SVD::try_new(centered, true, false, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or(CcaError::NoConvergence)?;
    let u = svd.u.ok_or(CcaError::NoConvergence)?;
    // Centering a constant column leaves rounding residue, so compare
    // against the input's own scale
    #[allow(clippy::cast_precision_loss)]
    let scale = m.amax() * (m.nrows() as f64).sqrt();
    let largest = svd.singular_values.max();
    if largest <= scale * 1e-12 || largest <= 0.0 {
        return Err(CcaError::Degenerate { which });
    }

    let keep: Vec<usize> = svd
        .singular_values
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s > largest * RANK_TOLERANCE)
        .map(|(i, _)| i)
        .collect();
    Ok(u.select_columns(keep.iter()))
}
