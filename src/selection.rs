use crate::estimate::LdaError;
use crate::types::CriterionValues;
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// L-curve diagnostics over an alpha grid: the curve coordinates, the
/// minimum-product (MPM) values, the curvature, and the recommended alpha
/// indices derived from them.
///
/// Corner and product minimizers are recommendations, not selections; the
/// caller decides which alpha to act on.
#[derive(Debug, Clone)]
pub struct LcurveReport {
    x: CriterionValues,
    y: CriterionValues,
    product: CriterionValues,
    curvature: CriterionValues,
    corner_indices: Vec<usize>,
    product_min_indices: Vec<usize>,
}

impl LcurveReport {
    /// sqrt(RSS) per alpha, the L-curve abscissa.
    #[inline]
    pub fn x(&self) -> &CriterionValues {
        &self.x
    }

    /// ||L x_opt|| per alpha, the L-curve ordinate.
    #[inline]
    pub fn y(&self) -> &CriterionValues {
        &self.y
    }

    /// Minimum-product criterion values x * y.
    #[inline]
    pub fn product(&self) -> &CriterionValues {
        &self.product
    }

    /// |y''| / (1 + y'^2)^1.5 along the curve, non-negative.
    #[inline]
    pub fn curvature(&self) -> &CriterionValues {
        &self.curvature
    }

    /// Curvature argmax per series, the L-curve corner.
    #[inline]
    pub fn corner_indices(&self) -> &[usize] {
        &self.corner_indices
    }

    /// Product argmin per series.
    #[inline]
    pub fn product_min_indices(&self) -> &[usize] {
        &self.product_min_indices
    }
}

/// Assemble the L-curve report from per-alpha residual and smoothness
/// norms, as produced by the Tikhonov solver.
pub fn lcurve_report(
    rss: &CriterionValues,
    smooth_norm: &CriterionValues,
) -> Result<LcurveReport, LdaError> {
    let report = match (rss, smooth_norm) {
        (CriterionValues::Simultaneous(rss), CriterionValues::Simultaneous(smooth)) => {
            if rss.len() != smooth.len() {
                return Err(LdaError::DimensionMismatch {
                    expected: rss.len(),
                    found: smooth.len(),
                    what: "smoothness norms vs. residual norms",
                });
            }
            let x = rss.mapv(f64::sqrt);
            let y = smooth.clone();
            let product = &x * &y;
            let curvature = series_curvature(x.view(), y.view());
            LcurveReport {
                x: CriterionValues::Simultaneous(x),
                y: CriterionValues::Simultaneous(y),
                product: CriterionValues::Simultaneous(product.clone()),
                curvature: CriterionValues::Simultaneous(curvature.clone()),
                corner_indices: CriterionValues::Simultaneous(curvature).argmax(),
                product_min_indices: CriterionValues::Simultaneous(product).argmin(),
            }
        }
        (CriterionValues::PerWavelength(rss), CriterionValues::PerWavelength(smooth)) => {
            if rss.dim() != smooth.dim() {
                return Err(LdaError::DimensionMismatch {
                    expected: rss.len(),
                    found: smooth.len(),
                    what: "smoothness norms vs. residual norms",
                });
            }
            let x = rss.mapv(f64::sqrt);
            let y = smooth.clone();
            let product = &x * &y;
            let mut curvature = Array2::<f64>::zeros(x.raw_dim());
            for (wl, mut row) in curvature.axis_iter_mut(Axis(0)).enumerate() {
                row.assign(&series_curvature(x.row(wl), y.row(wl)));
            }
            LcurveReport {
                x: CriterionValues::PerWavelength(x),
                y: CriterionValues::PerWavelength(y),
                product: CriterionValues::PerWavelength(product.clone()),
                curvature: CriterionValues::PerWavelength(curvature.clone()),
                corner_indices: CriterionValues::PerWavelength(curvature).argmax(),
                product_min_indices: CriterionValues::PerWavelength(product).argmin(),
            }
        }
        _ => {
            return Err(LdaError::InvalidInput(
                "residual and smoothness norms must share the same aggregation".to_string(),
            ));
        }
    };
    Ok(report)
}

/// Curvature of y(x) sampled at unevenly spaced points:
/// k = |y''| / (1 + y'^2)^1.5 with both derivatives taken against the x
/// coordinates by second-order central differences (one-sided at the ends).
fn series_curvature(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Array1<f64> {
    let dy = gradient(y, x);
    let d2y = gradient(dy.view(), x);
    Array1::from_iter(
        dy.iter()
            .zip(d2y.iter())
            .map(|(&dy_i, &d2y_i)| d2y_i.abs() / (1.0 + dy_i * dy_i).powf(1.5)),
    )
}

/// Second-order finite-difference derivative of `values` against the
/// `coords` sample positions. Degenerate spacings contribute zero instead
/// of propagating non-finite values into the curvature.
fn gradient(values: ArrayView1<'_, f64>, coords: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = values.len();
    let mut out = Array1::<f64>::zeros(n);
    if n < 2 {
        return out;
    }

    let ratio = |num: f64, den: f64| if den != 0.0 { num / den } else { 0.0 };

    out[0] = ratio(values[1] - values[0], coords[1] - coords[0]);
    out[n - 1] = ratio(values[n - 1] - values[n - 2], coords[n - 1] - coords[n - 2]);
    for i in 1..n - 1 {
        let hs = coords[i] - coords[i - 1];
        let hd = coords[i + 1] - coords[i];
        let num = hs * hs * values[i + 1] + (hd * hd - hs * hs) * values[i]
            - hd * hd * values[i - 1];
        out[i] = ratio(num, hs * hd * (hd + hs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{gradient, lcurve_report};
    use crate::types::CriterionValues;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn gradient_is_exact_for_quadratics_on_uneven_grids() {
        let coords = array![0.0, 0.3, 1.0, 1.4, 2.5];
        let values = coords.mapv(|x: f64| 3.0 * x * x - 2.0 * x + 1.0);
        let grad = gradient(values.view(), coords.view());
        // Central differences are exact for quadratics at interior points.
        for i in 1..coords.len() - 1 {
            assert_abs_diff_eq!(grad[i], 6.0 * coords[i] - 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn curvature_matches_circle_arc() {
        let radius = 2.0f64;
        let x = Array1::linspace(0.5, 1.5, 41);
        let y = x.mapv(|xi| (radius * radius - xi * xi).sqrt());
        let rss = x.mapv(|xi: f64| xi * xi);
        let report = lcurve_report(
            &CriterionValues::Simultaneous(rss),
            &CriterionValues::Simultaneous(y),
        )
        .expect("report");
        let curvature = match report.curvature() {
            CriterionValues::Simultaneous(k) => k,
            CriterionValues::PerWavelength(_) => unreachable!(),
        };
        // Interior points approximate 1/R; the one-sided ends are skipped.
        for i in 2..curvature.len() - 2 {
            assert_abs_diff_eq!(curvature[i], 1.0 / radius, epsilon = 5e-3);
        }
    }

    #[test]
    fn curvature_is_non_negative() {
        let rss = array![9.0, 4.0, 1.0, 0.25, 0.04];
        let smooth = array![0.1, 0.3, 1.0, 3.0, 9.0];
        let report = lcurve_report(
            &CriterionValues::Simultaneous(rss),
            &CriterionValues::Simultaneous(smooth),
        )
        .expect("report");
        match report.curvature() {
            CriterionValues::Simultaneous(k) => assert!(k.iter().all(|&v| v >= 0.0)),
            CriterionValues::PerWavelength(_) => unreachable!(),
        }
    }

    #[test]
    fn corner_sits_at_the_bend() {
        // A hockey-stick curve: steep drop in y, then flat. The curvature
        // maximum marks the transition.
        let x = array![1.0, 1.01, 1.02, 1.03, 2.0, 3.0, 4.0];
        let y = array![4.0, 3.0, 2.0, 1.0, 0.9, 0.85, 0.8];
        let rss = x.mapv(|v: f64| v * v);
        let report = lcurve_report(
            &CriterionValues::Simultaneous(rss),
            &CriterionValues::Simultaneous(y),
        )
        .expect("report");
        let corner = report.corner_indices()[0];
        assert!((3..=4).contains(&corner), "corner at {corner}");
    }

    #[test]
    fn product_minimum_is_reported_per_wavelength() {
        let rss = array![[4.0, 1.0, 0.25], [9.0, 0.04, 1.0]];
        let smooth = array![[1.0, 1.5, 8.0], [0.1, 2.0, 9.0]];
        let report = lcurve_report(
            &CriterionValues::PerWavelength(rss),
            &CriterionValues::PerWavelength(smooth),
        )
        .expect("report");
        assert_eq!(report.product_min_indices(), &[1, 0]);
    }

    #[test]
    fn mixed_aggregation_is_rejected() {
        let err = lcurve_report(
            &CriterionValues::Simultaneous(array![1.0, 2.0]),
            &CriterionValues::PerWavelength(array![[1.0, 2.0]]),
        )
        .unwrap_err();
        assert!(matches!(err, crate::estimate::LdaError::InvalidInput(_)));
    }
}
