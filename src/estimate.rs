use crate::design::{self, DesignMatrix};
use crate::elastic_net;
use crate::faer_ndarray::{FaerLinalgError, fast_ab};
use crate::lasso::{self, LassoOptions};
use crate::selection::{self, LcurveReport};
use crate::tikhonov::{self, TikhonovFit};
use crate::tsvd;
use crate::types::{CriterionValues, Dataset, LdaConfig, RegularizationMode, Solution};
use ndarray::{Array1, Array2, Array3, Axis, s};
use rayon::prelude::*;
use thiserror::Error;

/// Crate-level error type. Structural problems fail fast; numerical
/// degeneracy in the design matrix is a diagnostic, not an error.
#[derive(Debug, Error)]
pub enum LdaError {
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        what: &'static str,
    },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("linear algebra backend failed: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error(
        "coordinate descent did not converge within {max_iterations} iterations \
         (last relative change: {last_change:.3e})"
    )]
    CoordinateDescentDidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Model-selection summary for the penalized least-squares modes.
#[derive(Debug, Clone)]
pub struct SelectionReport {
    gcv: CriterionValues,
    cp: CriterionValues,
    gcv_min_indices: Vec<usize>,
    cp_min_indices: Vec<usize>,
    lcurve: LcurveReport,
}

impl SelectionReport {
    #[inline]
    pub fn gcv(&self) -> &CriterionValues {
        &self.gcv
    }

    #[inline]
    pub fn cp(&self) -> &CriterionValues {
        &self.cp
    }

    /// GCV argmin per series, a recommended alpha index.
    #[inline]
    pub fn gcv_min_indices(&self) -> &[usize] {
        &self.gcv_min_indices
    }

    /// Cp argmin per series, a recommended alpha index.
    #[inline]
    pub fn cp_min_indices(&self) -> &[usize] {
        &self.cp_min_indices
    }

    #[inline]
    pub fn lcurve(&self) -> &LcurveReport {
        &self.lcurve
    }
}

/// Everything a run produces: the amplitude tensor, the design-matrix
/// diagnostics, and (for the L2-backed modes) the selection criteria.
#[derive(Debug, Clone)]
pub struct LdaOutput {
    solution: Solution,
    design: DesignMatrix,
    criteria: Option<SelectionReport>,
    l1_norms: Option<CriterionValues>,
}

impl LdaOutput {
    #[inline]
    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    #[inline]
    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    #[inline]
    pub fn criteria(&self) -> Option<&SelectionReport> {
        self.criteria.as_ref()
    }

    /// ||L x||_1 per alpha series; populated in L1 mode.
    #[inline]
    pub fn l1_norms(&self) -> Option<&CriterionValues> {
        self.l1_norms.as_ref()
    }
}

/// Run one full analysis: build the design matrix for the configured
/// lifetime grid, then dispatch on the regularization mode.
///
/// The config is immutable for the duration of the run and nothing is
/// cached across calls.
pub fn run_lda(dataset: &Dataset, config: &LdaConfig) -> Result<LdaOutput, LdaError> {
    config.validate()?;
    let design = design::build_design_matrix(
        dataset.times().view(),
        config.lifetimes.view(),
        dataset.irf(),
    )?;
    let d = design.matrix();
    let data = dataset.data();

    match config.mode {
        RegularizationMode::L2 => {
            let fit = tikhonov::solve(
                d,
                data,
                &config.operator,
                &config.alphas,
                config.simultaneous_fit,
            )?;
            let report = selection_report(&fit)?;
            Ok(LdaOutput {
                solution: Solution::Plain(fit.into_solution()),
                design,
                criteria: Some(report),
                l1_norms: None,
            })
        }
        RegularizationMode::L1 => {
            // The unregularized pass supplies both the warm start (its
            // alpha index 0 slice) and the selection criteria.
            let fit = tikhonov::solve(
                d,
                data,
                &config.operator,
                &config.alphas,
                config.simultaneous_fit,
            )?;
            let report = selection_report(&fit)?;
            let warm = fit.solution().slice(s![.., .., 0]).to_owned();
            let options = LassoOptions::default();

            let per_alpha: Vec<Array2<f64>> = (0..config.alphas.len())
                .into_par_iter()
                .map(|ai| lasso::solve(d, data, config.alphas[ai], &warm, &options))
                .collect::<Result<Vec<_>, LdaError>>()?;

            let mut solution =
                Array3::<f64>::zeros((d.ncols(), data.ncols(), config.alphas.len()));
            for (ai, x) in per_alpha.iter().enumerate() {
                solution.slice_mut(s![.., .., ai]).assign(x);
            }
            let l1_norms = penalized_l1_norms(
                config.operator.matrix(),
                &solution,
                config.simultaneous_fit,
            );
            Ok(LdaOutput {
                solution: Solution::Plain(solution),
                design,
                criteria: Some(report),
                l1_norms: Some(l1_norms),
            })
        }
        RegularizationMode::ElasticNet => {
            // Warm start from the unregularized Tikhonov solution; a zero
            // warm start would leave every coordinate out of the active set.
            let warm_fit = tikhonov::solve(
                d,
                data,
                &config.operator,
                &Array1::zeros(1),
                config.simultaneous_fit,
            )?;
            let warm = warm_fit.solution().slice(s![.., .., 0]).to_owned();
            let solution = elastic_net::solve(
                d,
                data,
                &config.operator,
                &config.alphas,
                &config.rhos,
                &warm,
                &LassoOptions::default(),
            )?;
            Ok(LdaOutput {
                solution: Solution::ElasticNet(solution),
                design,
                criteria: None,
                l1_norms: None,
            })
        }
        RegularizationMode::Tsvd => {
            let x = tsvd::solve(d, data, config.truncation_rank)?;
            let mut solution = Array3::<f64>::zeros((d.ncols(), data.ncols(), 1));
            solution.slice_mut(s![.., .., 0]).assign(&x);
            Ok(LdaOutput {
                solution: Solution::Plain(solution),
                design,
                criteria: None,
                l1_norms: None,
            })
        }
    }
}

fn selection_report(fit: &TikhonovFit) -> Result<SelectionReport, LdaError> {
    let lcurve = selection::lcurve_report(fit.rss(), fit.smooth_norm())?;
    Ok(SelectionReport {
        gcv: fit.gcv().clone(),
        cp: fit.cp().clone(),
        gcv_min_indices: fit.gcv().argmin(),
        cp_min_indices: fit.cp().argmin(),
        lcurve,
    })
}

/// ||L x||_1 per alpha, aggregated over wavelengths or kept per wavelength.
fn penalized_l1_norms(
    l: &Array2<f64>,
    solution: &Array3<f64>,
    simultaneous: bool,
) -> CriterionValues {
    let n_alphas = solution.len_of(Axis(2));
    let n_wls = solution.len_of(Axis(1));
    let mut per_wl = Array2::<f64>::zeros((n_wls, n_alphas));
    for ai in 0..n_alphas {
        let x = solution.slice(s![.., .., ai]);
        let penalized = fast_ab(l, &x);
        for wl in 0..n_wls {
            per_wl[[wl, ai]] = penalized.column(wl).iter().map(|v| v.abs()).sum();
        }
    }
    if simultaneous {
        CriterionValues::Simultaneous(per_wl.sum_axis(Axis(0)))
    } else {
        CriterionValues::PerWavelength(per_wl)
    }
}
