use crate::estimate::LdaError;
use ndarray::{Array1, Array2, Array3, Array4};
use serde::{Deserialize, Serialize};

/// Gaussian instrument-response parameters as reported by the data provider.
///
/// Only `fwhm` and `center` enter the design matrix; `order` and
/// `reference_wavelength` are carried through for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrfParams {
    pub order: u32,
    pub fwhm: f64,
    pub center: f64,
    pub reference_wavelength: f64,
}

impl IrfParams {
    /// Gaussian width sigma derived from the full-width-half-maximum,
    /// sigma = fwhm / (2 sqrt(ln 2)).
    #[inline]
    pub fn sigma(&self) -> f64 {
        self.fwhm / (2.0 * std::f64::consts::LN_2.sqrt())
    }
}

/// One analysis session's worth of time-resolved measurement data.
///
/// Immutable during a solve; validated once on construction.
#[derive(Debug, Clone)]
pub struct Dataset {
    data: Array2<f64>,
    times: Array1<f64>,
    wavelengths: Array1<f64>,
    irf: IrfParams,
}

impl Dataset {
    pub fn new(
        data: Array2<f64>,
        times: Array1<f64>,
        wavelengths: Array1<f64>,
        irf: IrfParams,
    ) -> Result<Self, LdaError> {
        if times.is_empty() {
            return Err(LdaError::InvalidGrid("time grid is empty".to_string()));
        }
        if times.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(LdaError::InvalidGrid(
                "time samples must be strictly increasing".to_string(),
            ));
        }
        if data.nrows() != times.len() {
            return Err(LdaError::DimensionMismatch {
                expected: times.len(),
                found: data.nrows(),
                what: "data rows vs. time samples",
            });
        }
        if data.ncols() != wavelengths.len() {
            return Err(LdaError::DimensionMismatch {
                expected: wavelengths.len(),
                found: data.ncols(),
                what: "data columns vs. wavelength samples",
            });
        }
        Ok(Self {
            data,
            times,
            wavelengths,
            irf,
        })
    }

    #[inline]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    #[inline]
    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    #[inline]
    pub fn wavelengths(&self) -> &Array1<f64> {
        &self.wavelengths
    }

    #[inline]
    pub fn irf(&self) -> &IrfParams {
        &self.irf
    }
}

/// Solver family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizationMode {
    /// Tikhonov smoothness penalty with GCV/Cp/L-curve selection.
    L2,
    /// LASSO sparsity penalty via coordinate descent.
    L1,
    /// Convex L1/L2 mixture, reduced to LASSO by augmentation.
    ElasticNet,
    /// Rank-truncated pseudo-inverse.
    Tsvd,
}

/// Square penalty operator applied to the amplitude vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularizationOperator {
    matrix: Array2<f64>,
}

impl RegularizationOperator {
    /// Ridge-like identity penalty.
    pub fn identity(size: usize) -> Self {
        Self {
            matrix: Array2::eye(size),
        }
    }

    /// Second-difference smoothness penalty. Boundary rows are left zero so
    /// the operator stays square.
    pub fn second_difference(size: usize) -> Self {
        let mut matrix = Array2::zeros((size, size));
        for i in 1..size.saturating_sub(1) {
            matrix[[i, i - 1]] = 1.0;
            matrix[[i, i]] = -2.0;
            matrix[[i, i + 1]] = 1.0;
        }
        Self { matrix }
    }

    pub fn custom(matrix: Array2<f64>) -> Result<Self, LdaError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(LdaError::DimensionMismatch {
                expected: matrix.nrows(),
                found: matrix.ncols(),
                what: "regularization operator rows vs. columns",
            });
        }
        Ok(Self { matrix })
    }

    #[inline]
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }
}

/// Log-spaced lifetime grid over base-10 exponents, the analogue of
/// `logspace(start, stop, count)`.
pub fn log_spaced_lifetimes(start_exp: f64, stop_exp: f64, count: usize) -> Array1<f64> {
    if count == 1 {
        return Array1::from_elem(1, 10f64.powf(start_exp));
    }
    let step = (stop_exp - start_exp) / (count as f64 - 1.0);
    Array1::from_iter((0..count).map(|i| 10f64.powf(start_exp + step * i as f64)))
}

/// Evenly spaced grid over a closed interval, the analogue of
/// `linspace(start, stop, count)`.
pub fn linear_grid(start: f64, stop: f64, count: usize) -> Array1<f64> {
    if count == 1 {
        return Array1::from_elem(1, start);
    }
    let step = (stop - start) / (count as f64 - 1.0);
    Array1::from_iter((0..count).map(|i| start + step * i as f64))
}

pub fn default_lifetime_grid() -> Array1<f64> {
    log_spaced_lifetimes(-1.0, 4.0, 100)
}

pub fn default_rho_grid() -> Array1<f64> {
    linear_grid(0.1, 0.9, 9)
}

/// Immutable per-invocation solver configuration.
///
/// A fresh config is passed to every run; the solvers hold no state across
/// invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdaConfig {
    pub mode: RegularizationMode,
    /// Aggregate model-selection criteria across wavelengths when true,
    /// otherwise compute them per wavelength.
    pub simultaneous_fit: bool,
    pub lifetimes: Array1<f64>,
    pub operator: RegularizationOperator,
    /// Regularization strengths, non-negative. Index 0 is assumed to hold
    /// alpha = 0 by the Cp variance estimate and the LASSO warm start.
    pub alphas: Array1<f64>,
    /// Elastic-Net mixing fractions in (0, 1). Ignored by other modes.
    pub rhos: Array1<f64>,
    /// Number of singular components kept by TSVD. Ignored by other modes.
    pub truncation_rank: usize,
}

impl LdaConfig {
    /// Config with the conventional defaults: 100 log-spaced lifetimes over
    /// 1e-1..1e4, identity operator, nine rhos evenly spaced in 0.1..0.9.
    /// The alpha grid is left empty and must be supplied by the caller.
    pub fn new(mode: RegularizationMode) -> Self {
        let lifetimes = default_lifetime_grid();
        let operator = RegularizationOperator::identity(lifetimes.len());
        Self {
            mode,
            simultaneous_fit: true,
            lifetimes,
            operator,
            alphas: Array1::zeros(0),
            rhos: default_rho_grid(),
            truncation_rank: 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), LdaError> {
        if self.lifetimes.is_empty() {
            return Err(LdaError::InvalidGrid("lifetime grid is empty".to_string()));
        }
        if self.lifetimes.iter().any(|&tau| !(tau > 0.0)) {
            return Err(LdaError::InvalidGrid(
                "lifetime grid must be strictly positive".to_string(),
            ));
        }
        if self.operator.size() != self.lifetimes.len() {
            return Err(LdaError::DimensionMismatch {
                expected: self.lifetimes.len(),
                found: self.operator.size(),
                what: "regularization operator size vs. lifetime grid",
            });
        }
        match self.mode {
            RegularizationMode::Tsvd => {}
            RegularizationMode::ElasticNet => {
                self.validate_alphas()?;
                if self.rhos.is_empty() {
                    return Err(LdaError::InvalidGrid("rho grid is empty".to_string()));
                }
                if self.rhos.iter().any(|&rho| !(rho > 0.0 && rho < 1.0)) {
                    return Err(LdaError::InvalidGrid(
                        "rho grid must lie strictly inside (0, 1)".to_string(),
                    ));
                }
            }
            RegularizationMode::L2 | RegularizationMode::L1 => self.validate_alphas()?,
        }
        Ok(())
    }

    fn validate_alphas(&self) -> Result<(), LdaError> {
        if self.alphas.is_empty() {
            return Err(LdaError::InvalidGrid("alpha grid is empty".to_string()));
        }
        if self.alphas.iter().any(|&a| !(a >= 0.0)) {
            return Err(LdaError::InvalidGrid(
                "alpha grid must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recovered lifetime-density map, tagged by tensor rank so the Elastic-Net
/// layout is a distinct type rather than an inferred shape.
#[derive(Debug, Clone)]
pub enum Solution {
    /// (lifetime, wavelength, alpha) amplitudes for L2/L1/TSVD modes.
    Plain(Array3<f64>),
    /// (lifetime, wavelength, alpha, rho) amplitudes for Elastic Net.
    ElasticNet(Array4<f64>),
}

impl Solution {
    pub fn plain(&self) -> Option<&Array3<f64>> {
        match self {
            Solution::Plain(tensor) => Some(tensor),
            Solution::ElasticNet(_) => None,
        }
    }

    pub fn elastic_net(&self) -> Option<&Array4<f64>> {
        match self {
            Solution::Plain(_) => None,
            Solution::ElasticNet(tensor) => Some(tensor),
        }
    }
}

/// Model-selection scalars, stored per alpha (simultaneous fit) or per
/// wavelength and alpha.
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionValues {
    Simultaneous(Array1<f64>),
    /// Shape (wavelength, alpha).
    PerWavelength(Array2<f64>),
}

impl CriterionValues {
    /// Number of alpha entries per series.
    pub fn series_len(&self) -> usize {
        match self {
            CriterionValues::Simultaneous(values) => values.len(),
            CriterionValues::PerWavelength(values) => values.ncols(),
        }
    }

    /// Index of the smallest value, one per series.
    pub fn argmin(&self) -> Vec<usize> {
        self.arg_by(|best, candidate| candidate < best)
    }

    /// Index of the largest value, one per series.
    pub fn argmax(&self) -> Vec<usize> {
        self.arg_by(|best, candidate| candidate > best)
    }

    fn arg_by(&self, better: impl Fn(f64, f64) -> bool) -> Vec<usize> {
        let pick = |row: ndarray::ArrayView1<'_, f64>| {
            let mut idx = 0;
            for (i, &v) in row.iter().enumerate() {
                if better(row[idx], v) {
                    idx = i;
                }
            }
            idx
        };
        match self {
            CriterionValues::Simultaneous(values) => vec![pick(values.view())],
            CriterionValues::PerWavelength(values) => values.rows().into_iter().map(pick).collect(),
        }
    }
}
