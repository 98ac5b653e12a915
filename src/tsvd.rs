use crate::estimate::LdaError;
use crate::faer_ndarray::{FaerThinSvd, fast_atb};
use ndarray::{Array1, Array2};

/// Rank-truncated pseudo-inverse solve.
///
/// The design matrix is factored once; only the k largest singular values
/// keep their reciprocals, the rest of the spectrum is discarded. k is
/// clamped to the number of singular values, so k = 0 yields the all-zero
/// solution and k >= rank reproduces the least-squares solution.
pub fn solve(d: &Array2<f64>, data: &Array2<f64>, k: usize) -> Result<Array2<f64>, LdaError> {
    if data.nrows() != d.nrows() {
        return Err(LdaError::DimensionMismatch {
            expected: d.nrows(),
            found: data.nrows(),
            what: "data rows vs. design matrix rows",
        });
    }

    let (u, singular, vt) = d.thin_svd()?;
    let kept = k.min(singular.len());

    // Singular values are ordered non-increasing, so the k largest are a
    // prefix. Numerically-zero values inside the prefix still invert to
    // zero, pseudo-inverse style.
    let s_max = singular.iter().cloned().fold(0.0f64, f64::max);
    let cutoff = s_max * d.nrows().max(d.ncols()) as f64 * f64::EPSILON;
    let recip = Array1::from_iter(singular.iter().enumerate().map(|(i, &s)| {
        if i < kept && s > cutoff { 1.0 / s } else { 0.0 }
    }));

    let mut projected = fast_atb(&u, data);
    for (i, mut row) in projected.rows_mut().into_iter().enumerate() {
        row.mapv_inplace(|v| v * recip[i]);
    }
    Ok(fast_atb(&vt, &projected))
}
