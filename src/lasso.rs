use crate::estimate::LdaError;
use crate::faer_ndarray::{fast_ata, fast_atb};
use ndarray::{Array1, Array2, Axis, s};
use rayon::prelude::*;

const POWER_ITERATION_LIMIT: usize = 500;
const POWER_ITERATION_TOL: f64 = 1e-12;

/// Knobs for the coordinate-descent inner loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LassoOptions {
    /// Relative-change threshold per coordinate.
    pub tolerance: f64,
    /// Iteration cap per coordinate before the solve is abandoned.
    pub max_iterations: usize,
}

impl Default for LassoOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-11,
            max_iterations: 10_000,
        }
    }
}

/// L1-penalized solve by majorize-minimize coordinate descent.
///
/// With cov = D'D and g an upper bound on its spectrum, each coordinate is
/// driven to the fixed point of
///
/// ```text
/// U_i = (D'A)_i + ((g I - cov) x)_i
/// x_i <- sign(U_i) * max((|U_i| - alpha) / g, 0)
/// ```
///
/// Coordinates whose warm-start value is zero are left untouched; the warm
/// start decides the active set. Wavelength columns are independent and run
/// in parallel.
pub fn solve(
    d: &Array2<f64>,
    data: &Array2<f64>,
    alpha: f64,
    x_init: &Array2<f64>,
    options: &LassoOptions,
) -> Result<Array2<f64>, LdaError> {
    let (n_times, p) = d.dim();
    let n_wls = data.ncols();

    if data.nrows() != n_times {
        return Err(LdaError::DimensionMismatch {
            expected: n_times,
            found: data.nrows(),
            what: "data rows vs. design matrix rows",
        });
    }
    if x_init.dim() != (p, n_wls) {
        return Err(LdaError::DimensionMismatch {
            expected: p,
            found: x_init.nrows(),
            what: "warm start shape vs. design matrix columns",
        });
    }
    if !(alpha >= 0.0) {
        return Err(LdaError::InvalidGrid(
            "LASSO penalty must be non-negative".to_string(),
        ));
    }

    let cov = fast_ata(d);
    let g = top_eigenvalue(&cov);
    if !(g > 0.0) {
        return Err(LdaError::InvalidInput(
            "design matrix has no signal, Lipschitz bound is zero".to_string(),
        ));
    }
    log::debug!("[LDA lasso] Lipschitz bound g = {g:.6e} for alpha = {alpha:.6e}");

    // B = g I - cov, so U splits into a data term and a coupling term.
    let mut b = -&cov;
    for i in 0..p {
        b[[i, i]] += g;
    }
    let dta = fast_atb(d, data);

    let columns: Vec<Array1<f64>> = (0..n_wls)
        .into_par_iter()
        .map(|j| {
            descend_column(
                &b,
                dta.column(j).to_owned(),
                x_init.column(j).to_owned(),
                alpha,
                g,
                options,
            )
        })
        .collect::<Result<Vec<_>, LdaError>>()?;

    let mut x = Array2::<f64>::zeros((p, n_wls));
    for (j, column) in columns.iter().enumerate() {
        x.slice_mut(s![.., j]).assign(column);
    }
    Ok(x)
}

fn descend_column(
    b: &Array2<f64>,
    dta: Array1<f64>,
    mut x: Array1<f64>,
    alpha: f64,
    g: f64,
    options: &LassoOptions,
) -> Result<Array1<f64>, LdaError> {
    let p = x.len();
    for i in 0..p {
        let mut iterations = 0usize;
        // A zero coordinate has no previous value to measure change
        // against; it stays out of the active set.
        while x[i] != 0.0 {
            let previous = x[i];
            let coupling = b.row(i).dot(&x);
            let u = dta[i] + coupling;
            let updated = soft_threshold(u, alpha) / g;
            x[i] = updated;
            let change = ((updated - previous) / previous).abs();
            if change <= options.tolerance {
                break;
            }
            iterations += 1;
            if iterations >= options.max_iterations {
                return Err(LdaError::CoordinateDescentDidNotConverge {
                    max_iterations: options.max_iterations,
                    last_change: change,
                });
            }
        }
    }
    Ok(x)
}

/// sign(v) * max(|v| - threshold, 0), exact zero inside the threshold band.
#[inline]
pub(crate) fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Largest eigenvalue of a symmetric positive semi-definite matrix by
/// power iteration with a Rayleigh-quotient stopping rule. Falls back to
/// the Gershgorin row bound when the iteration stalls; the bound is always
/// a valid majorizer.
pub(crate) fn top_eigenvalue(matrix: &Array2<f64>) -> f64 {
    let p = matrix.nrows();
    if p == 0 {
        return 0.0;
    }
    let mut v = Array1::<f64>::from_elem(p, 1.0 / (p as f64).sqrt());
    let mut lambda = 0.0f64;
    for _ in 0..POWER_ITERATION_LIMIT {
        let w = matrix.dot(&v);
        let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            return 0.0;
        }
        let next = w / norm;
        let rayleigh = next.dot(&matrix.dot(&next));
        if (rayleigh - lambda).abs() <= POWER_ITERATION_TOL * rayleigh.abs().max(1.0) {
            return rayleigh;
        }
        lambda = rayleigh;
        v = next;
    }
    log::warn!(
        "[LDA lasso] power iteration did not settle after {POWER_ITERATION_LIMIT} steps, \
         using the Gershgorin bound"
    );
    gershgorin_bound(matrix)
}

/// Row-sum upper bound on the spectrum of a symmetric matrix.
fn gershgorin_bound(matrix: &Array2<f64>) -> f64 {
    matrix
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0f64, f64::max)
}
