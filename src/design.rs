use crate::estimate::LdaError;
use crate::special::erf;
use crate::types::IrfParams;
use ndarray::{Array2, ArrayView1};

/// Fraction of clamped entries above which a numerical-health warning fires.
const CLAMP_WARN_FRACTION: f64 = 0.01;

/// IRF-convolved exponential basis evaluated on a time grid, together with
/// the count of non-finite entries that were replaced by zero.
///
/// Short lifetimes combined with a late IRF center can overflow the
/// exponential prefactor; those entries carry no usable signal and are
/// zeroed, but the count is kept so callers can see how much of the basis
/// was lost instead of silently fitting a mutilated matrix.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    clamped: usize,
}

impl DesignMatrix {
    #[inline]
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Number of non-finite entries replaced by zero during construction.
    #[inline]
    pub fn clamped(&self) -> usize {
        self.clamped
    }

    #[inline]
    pub fn clamped_fraction(&self) -> f64 {
        let total = self.matrix.len();
        if total == 0 {
            0.0
        } else {
            self.clamped as f64 / total as f64
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Build the (time x lifetime) design matrix of exponential decays convolved
/// with a Gaussian instrument response.
///
/// Entry (i, j) for time t and lifetime tau, with mu the IRF center and
/// sigma its Gaussian width:
///
/// ```text
/// 0.5 * exp(-t/tau) * exp((mu + sigma^2/(2 tau)) / tau)
///     * (1 + erf((t - (mu + sigma^2/tau)) / (sqrt(2) * sigma)))
/// ```
///
/// Pure function of its inputs; the result is owned by the caller and never
/// cached across runs.
pub fn build_design_matrix(
    times: ArrayView1<'_, f64>,
    lifetimes: ArrayView1<'_, f64>,
    irf: &IrfParams,
) -> Result<DesignMatrix, LdaError> {
    if times.is_empty() {
        return Err(LdaError::InvalidGrid("time grid is empty".to_string()));
    }
    if lifetimes.is_empty() {
        return Err(LdaError::InvalidGrid("lifetime grid is empty".to_string()));
    }
    if lifetimes.iter().any(|&tau| !(tau > 0.0)) {
        return Err(LdaError::InvalidGrid(
            "lifetime grid must be strictly positive".to_string(),
        ));
    }
    let sigma = irf.sigma();
    if !(sigma > 0.0) || !sigma.is_finite() {
        return Err(LdaError::InvalidInput(format!(
            "IRF width must be positive and finite, got fwhm = {}",
            irf.fwhm
        )));
    }

    let mu = irf.center;
    let sqrt2_sigma = std::f64::consts::SQRT_2 * sigma;

    let mut matrix = Array2::<f64>::zeros((times.len(), lifetimes.len()));
    let mut clamped = 0usize;

    for (j, &tau) in lifetimes.iter().enumerate() {
        let prefactor_arg = (mu + sigma * sigma / (2.0 * tau)) / tau;
        let rise_shift = mu + sigma * sigma / tau;
        for (i, &t) in times.iter().enumerate() {
            let decay = (-t / tau).exp();
            let rise = 1.0 + erf((t - rise_shift) / sqrt2_sigma);
            let value = 0.5 * decay * prefactor_arg.exp() * rise;
            if value.is_finite() {
                matrix[[i, j]] = value;
            } else {
                clamped += 1;
            }
        }
    }

    let design = DesignMatrix { matrix, clamped };
    if design.clamped_fraction() > CLAMP_WARN_FRACTION {
        log::warn!(
            "[LDA design] {} of {} design entries were non-finite and clamped to zero ({:.2}%); \
             the shortest lifetimes are likely unresolvable at this IRF width",
            design.clamped,
            design.matrix.len(),
            100.0 * design.clamped_fraction()
        );
    }

    Ok(design)
}
