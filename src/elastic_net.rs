use crate::estimate::LdaError;
use crate::lasso::{self, LassoOptions};
use crate::types::RegularizationOperator;
use ndarray::{Array1, Array2, Array4, s};
use rayon::prelude::*;

/// Elastic-Net solve by reduction to LASSO on an augmented system.
///
/// For mixing fraction rho the penalty splits into a1 = rho * alpha on the
/// L1 side and a2 = (1 - rho) * alpha on the L2 side. The L2 part is folded
/// into the design,
///
/// ```text
/// D_aug = [D; sqrt(a2) L] * (1 + a2)^(-1/2)     A_aug = [A; 0]
/// ```
///
/// leaving a pure LASSO problem with penalty a1 / sqrt(1 + a2). The naive
/// solution is rescaled by (1 + a2) to undo the double shrinkage.
///
/// Output is shaped (lifetime, wavelength, alpha, rho). Every (alpha, rho)
/// cell is independent and runs in parallel off the shared warm start.
pub fn solve(
    d: &Array2<f64>,
    data: &Array2<f64>,
    l_op: &RegularizationOperator,
    alphas: &Array1<f64>,
    rhos: &Array1<f64>,
    x_init: &Array2<f64>,
    options: &LassoOptions,
) -> Result<Array4<f64>, LdaError> {
    let (n_times, p) = d.dim();
    let n_wls = data.ncols();

    if data.nrows() != n_times {
        return Err(LdaError::DimensionMismatch {
            expected: n_times,
            found: data.nrows(),
            what: "data rows vs. design matrix rows",
        });
    }
    if l_op.size() != p {
        return Err(LdaError::DimensionMismatch {
            expected: p,
            found: l_op.size(),
            what: "regularization operator size vs. design matrix columns",
        });
    }
    if alphas.is_empty() {
        return Err(LdaError::InvalidGrid("alpha grid is empty".to_string()));
    }
    if rhos.is_empty() {
        return Err(LdaError::InvalidGrid("rho grid is empty".to_string()));
    }

    let l = l_op.matrix();
    let mut rhs = Array2::<f64>::zeros((n_times + p, n_wls));
    rhs.slice_mut(s![..n_times, ..]).assign(data);

    let cells: Vec<(usize, usize, Array2<f64>)> = (0..alphas.len() * rhos.len())
        .into_par_iter()
        .map(|cell| -> Result<(usize, usize, Array2<f64>), LdaError> {
            let ai = cell / rhos.len();
            let ri = cell % rhos.len();
            let alpha = alphas[ai];
            let rho = rhos[ri];
            let a1 = rho * alpha;
            let a2 = (1.0 - rho) * alpha;
            let scale = (1.0 + a2).powf(-0.5);
            let atil = a1 / (1.0 + a2).sqrt();

            let mut augmented = Array2::<f64>::zeros((n_times + p, p));
            augmented.slice_mut(s![..n_times, ..]).assign(d);
            augmented
                .slice_mut(s![n_times.., ..])
                .assign(&(l * a2.sqrt()));
            augmented *= scale;

            let naive = lasso::solve(&augmented, &rhs, atil, x_init, options)?;
            Ok((ai, ri, naive * (1.0 + a2)))
        })
        .collect::<Result<Vec<_>, LdaError>>()?;

    let mut solution = Array4::<f64>::zeros((p, n_wls, alphas.len(), rhos.len()));
    for (ai, ri, x) in cells {
        solution.slice_mut(s![.., .., ai, ri]).assign(&x);
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::solve;
    use crate::lasso::{self, LassoOptions};
    use crate::types::RegularizationOperator;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array, s};

    #[test]
    fn output_has_alpha_by_rho_layout() {
        let d: Array2<f64> = Array2::eye(3);
        let data = array![[1.0, 2.0], [0.5, -1.0], [0.25, 0.75]];
        let l_op = RegularizationOperator::identity(3);
        let alphas = array![0.0, 0.1];
        let rhos = array![0.25, 0.5, 0.75];
        let x_init = Array2::from_elem((3, 2), 1.0);
        let solution = solve(
            &d,
            &data,
            &l_op,
            &alphas,
            &rhos,
            &x_init,
            &LassoOptions::default(),
        )
        .expect("solve");
        assert_eq!(solution.dim(), (3, 2, 2, 3));
    }

    #[test]
    fn zero_alpha_reduces_to_the_unpenalized_projection() {
        let d: Array2<f64> = Array2::eye(3);
        let data = array![[1.5], [-0.5], [0.75]];
        let l_op = RegularizationOperator::identity(3);
        let alphas = array![0.0];
        let rhos = array![0.5];
        let x_init = Array2::from_elem((3, 1), 1.0);
        let solution = solve(
            &d,
            &data,
            &l_op,
            &alphas,
            &rhos,
            &x_init,
            &LassoOptions::default(),
        )
        .expect("solve");
        let x: ndarray::ArrayView2<f64> = solution.slice(s![.., .., 0, 0]);
        assert_abs_diff_eq!(x[[0, 0]], 1.5, epsilon = 1e-10);
        assert_abs_diff_eq!(x[[1, 0]], -0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(x[[2, 0]], 0.75, epsilon = 1e-10);
    }

    #[test]
    fn rho_near_one_approaches_the_lasso_solution() {
        let d = array![
            [1.0, 0.2, 0.1],
            [0.5, 1.1, 0.3],
            [0.2, 0.4, 1.3],
            [0.8, 0.1, 0.5]
        ];
        let data = array![[1.0], [0.8], [0.6], [0.5]];
        let l_op = RegularizationOperator::identity(3);
        let alpha = 0.2;
        let rhos = array![0.999_999];
        let alphas = array![alpha];
        let x_init = Array2::from_elem((3, 1), 1.0);
        let options = LassoOptions::default();
        let elnet = solve(&d, &data, &l_op, &alphas, &rhos, &x_init, &options).expect("elnet");
        let lasso_x = lasso::solve(&d, &data, alpha * rhos[0], &x_init, &options).expect("lasso");
        let en = elnet.slice(s![.., .., 0, 0]);
        for i in 0..3 {
            assert_abs_diff_eq!(en[[i, 0]], lasso_x[[i, 0]], epsilon = 1e-5);
        }
    }
}
