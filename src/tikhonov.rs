use crate::estimate::LdaError;
use crate::faer_ndarray::{FaerThinSvd, fast_ab, fast_ata, fast_atb};
use crate::types::{CriterionValues, RegularizationOperator};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use rayon::prelude::*;

/// Tikhonov solutions over an alpha grid together with the model-selection
/// criteria computed from them.
#[derive(Debug, Clone)]
pub struct TikhonovFit {
    solution: Array3<f64>,
    gcv: CriterionValues,
    cp: CriterionValues,
    rss: CriterionValues,
    smooth_norm: CriterionValues,
}

impl TikhonovFit {
    /// Amplitudes shaped (lifetime, wavelength, alpha).
    #[inline]
    pub fn solution(&self) -> &Array3<f64> {
        &self.solution
    }

    #[inline]
    pub fn gcv(&self) -> &CriterionValues {
        &self.gcv
    }

    #[inline]
    pub fn cp(&self) -> &CriterionValues {
        &self.cp
    }

    /// Residual sum of squares per alpha series.
    #[inline]
    pub fn rss(&self) -> &CriterionValues {
        &self.rss
    }

    /// ||L x|| per alpha series, the L-curve ordinate.
    #[inline]
    pub fn smooth_norm(&self) -> &CriterionValues {
        &self.smooth_norm
    }

    /// Consume the fit, keeping only the amplitude tensor.
    #[inline]
    pub fn into_solution(self) -> Array3<f64> {
        self.solution
    }
}

/// Per-alpha intermediate products gathered before criteria are assembled.
struct AlphaSolve {
    x: Array2<f64>,
    trace_h: f64,
    rss_per_wl: Array1<f64>,
    smooth_sq_per_wl: Array1<f64>,
}

/// Solve the penalized least-squares problem for every alpha.
///
/// For each alpha the augmented system [D; sqrt(alpha) L] x = [A; 0] is
/// solved through a thin SVD with pseudo-inverse semantics (singular values
/// below the numerical cutoff contribute zero). The influence-matrix trace
/// needed by GCV and Cp is taken as trace((D'D + alpha L'L)^+ D'D), which
/// avoids forming the full (time x time) hat matrix.
///
/// The noise variance entering Cp is estimated once, from the residual of
/// the first alpha entry, and reused for the whole grid; callers put
/// alpha = 0 first so the estimate comes from the unregularized fit.
pub fn solve(
    d: &Array2<f64>,
    data: &Array2<f64>,
    l_op: &RegularizationOperator,
    alphas: &Array1<f64>,
    simultaneous: bool,
) -> Result<TikhonovFit, LdaError> {
    let (n_times, n_lifetimes) = d.dim();
    let n_wls = data.ncols();

    if data.nrows() != n_times {
        return Err(LdaError::DimensionMismatch {
            expected: n_times,
            found: data.nrows(),
            what: "data rows vs. design matrix rows",
        });
    }
    if l_op.size() != n_lifetimes {
        return Err(LdaError::DimensionMismatch {
            expected: n_lifetimes,
            found: l_op.size(),
            what: "regularization operator size vs. design matrix columns",
        });
    }
    if alphas.is_empty() {
        return Err(LdaError::InvalidGrid("alpha grid is empty".to_string()));
    }

    let l = l_op.matrix();
    let dtd = fast_ata(d);
    let ltl = fast_ata(l);

    let solves: Vec<AlphaSolve> = (0..alphas.len())
        .into_par_iter()
        .map(|ai| solve_one_alpha(d, data, l, &dtd, &ltl, alphas[ai]))
        .collect::<Result<Vec<_>, LdaError>>()?;

    let mut solution = Array3::<f64>::zeros((n_lifetimes, n_wls, alphas.len()));
    for (ai, alpha_solve) in solves.iter().enumerate() {
        solution
            .slice_mut(s![.., .., ai])
            .assign(&alpha_solve.x);
    }

    // Noise variance for Cp from the first alpha entry only.
    let n = n_times as f64;
    let (rss, smooth_norm, gcv, cp) = if simultaneous {
        let total_rss =
            Array1::from_iter(solves.iter().map(|solve| solve.rss_per_wl.sum()));
        let total_smooth = Array1::from_iter(
            solves
                .iter()
                .map(|solve| solve.smooth_sq_per_wl.sum().sqrt()),
        );
        let var = total_rss[0] / n;
        let gcv_values = Array1::from_iter(solves.iter().enumerate().map(|(ai, solve)| {
            let shrink = ((n - solve.trace_h) / n).powi(2);
            total_rss[ai] / shrink
        }));
        let cp_values = Array1::from_iter(
            solves
                .iter()
                .enumerate()
                .map(|(ai, solve)| total_rss[ai] + 2.0 * var * solve.trace_h),
        );
        (
            CriterionValues::Simultaneous(total_rss),
            CriterionValues::Simultaneous(total_smooth),
            CriterionValues::Simultaneous(gcv_values),
            CriterionValues::Simultaneous(cp_values),
        )
    } else {
        let mut rss_values = Array2::<f64>::zeros((n_wls, alphas.len()));
        let mut smooth_values = Array2::<f64>::zeros((n_wls, alphas.len()));
        let mut gcv_values = Array2::<f64>::zeros((n_wls, alphas.len()));
        let mut cp_values = Array2::<f64>::zeros((n_wls, alphas.len()));
        for (ai, solve) in solves.iter().enumerate() {
            let shrink = ((n - solve.trace_h) / n).powi(2);
            for wl in 0..n_wls {
                let wl_rss = solve.rss_per_wl[wl];
                let var = solves[0].rss_per_wl[wl] / n;
                rss_values[[wl, ai]] = wl_rss;
                smooth_values[[wl, ai]] = solve.smooth_sq_per_wl[wl].sqrt();
                gcv_values[[wl, ai]] = wl_rss / shrink;
                cp_values[[wl, ai]] = wl_rss + 2.0 * var * solve.trace_h;
            }
        }
        (
            CriterionValues::PerWavelength(rss_values),
            CriterionValues::PerWavelength(smooth_values),
            CriterionValues::PerWavelength(gcv_values),
            CriterionValues::PerWavelength(cp_values),
        )
    };

    Ok(TikhonovFit {
        solution,
        gcv,
        cp,
        rss,
        smooth_norm,
    })
}

fn solve_one_alpha(
    d: &Array2<f64>,
    data: &Array2<f64>,
    l: &Array2<f64>,
    dtd: &Array2<f64>,
    ltl: &Array2<f64>,
    alpha: f64,
) -> Result<AlphaSolve, LdaError> {
    let (n_times, n_lifetimes) = d.dim();
    let n_wls = data.ncols();

    let mut augmented = Array2::<f64>::zeros((n_times + n_lifetimes, n_lifetimes));
    augmented.slice_mut(s![..n_times, ..]).assign(d);
    let sqrt_alpha = alpha.sqrt();
    augmented
        .slice_mut(s![n_times.., ..])
        .assign(&(l * sqrt_alpha));

    let mut rhs = Array2::<f64>::zeros((n_times + n_lifetimes, n_wls));
    rhs.slice_mut(s![..n_times, ..]).assign(data);

    let (u, singular, vt) = augmented.thin_svd()?;
    let x = pinv_apply(&u, &singular, &vt, rhs.view());

    // trace(H) through the normal matrix, never materializing H itself.
    let normal = dtd + &(ltl * alpha);
    let (nu, ns, nvt) = normal.thin_svd()?;
    let normal_pinv = pinv_matrix(&nu, &ns, &nvt);
    let trace_h = (&normal_pinv * dtd).sum();

    let fitted = fast_ab(d, &x);
    let residual = &fitted - data;
    let rss_per_wl = residual.map_axis(Axis(0), |col| col.iter().map(|r| r * r).sum());

    let penalized = fast_ab(l, &x);
    let smooth_sq_per_wl = penalized.map_axis(Axis(0), |col| col.iter().map(|v| v * v).sum());

    Ok(AlphaSolve {
        x,
        trace_h,
        rss_per_wl,
        smooth_sq_per_wl,
    })
}

/// Reciprocal cutoff for pseudo-inverse singular values, relative to the
/// largest singular value.
fn singular_cutoff(singular: &Array1<f64>, rows: usize, cols: usize) -> f64 {
    let s_max = singular.iter().cloned().fold(0.0f64, f64::max);
    s_max * rows.max(cols) as f64 * f64::EPSILON
}

/// Apply the Moore-Penrose pseudo-inverse V S^+ U' to a right-hand side,
/// given the thin SVD factors. Singular values at or below the cutoff
/// contribute zero.
fn pinv_apply(
    u: &Array2<f64>,
    singular: &Array1<f64>,
    vt: &Array2<f64>,
    rhs: ArrayView2<'_, f64>,
) -> Array2<f64> {
    let cutoff = singular_cutoff(singular, u.nrows(), vt.ncols());
    let mut projected = fast_atb(u, &rhs);
    for (k, mut row) in projected.rows_mut().into_iter().enumerate() {
        let recip = if singular[k] > cutoff {
            1.0 / singular[k]
        } else {
            0.0
        };
        row.mapv_inplace(|v| v * recip);
    }
    fast_atb(vt, &projected)
}

/// Dense Moore-Penrose pseudo-inverse from thin SVD factors.
fn pinv_matrix(u: &Array2<f64>, singular: &Array1<f64>, vt: &Array2<f64>) -> Array2<f64> {
    let cutoff = singular_cutoff(singular, u.nrows(), vt.ncols());
    let mut scaled_ut = u.t().to_owned();
    for (k, mut row) in scaled_ut.rows_mut().into_iter().enumerate() {
        let recip = if singular[k] > cutoff {
            1.0 / singular[k]
        } else {
            0.0
        };
        row.mapv_inplace(|v| v * recip);
    }
    fast_atb(vt, &scaled_ut)
}
