use approx::assert_abs_diff_eq;
use lda::{
    Dataset, IrfParams, LdaConfig, RegularizationMode, RegularizationOperator, Solution,
    elastic_net, lasso, run_lda, tikhonov, tsvd,
};
use ndarray::{Array1, Array2, array, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn well_conditioned_system(seed: u64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("normal");
    let mut d = Array2::<f64>::zeros((20, 4));
    for v in d.iter_mut() {
        *v = normal.sample(&mut rng);
    }
    let mut data = Array2::<f64>::zeros((20, 2));
    for v in data.iter_mut() {
        *v = normal.sample(&mut rng);
    }
    (d, data)
}

#[test]
fn tikhonov_at_zero_alpha_matches_the_full_rank_tsvd() {
    let (d, data) = well_conditioned_system(3);
    let l_op = RegularizationOperator::identity(4);
    let alphas = array![0.0];
    let fit = tikhonov::solve(&d, &data, &l_op, &alphas, true).expect("tikhonov");
    let ridge = fit.solution().slice(s![.., .., 0]).to_owned();
    let ols = tsvd::solve(&d, &data, 4).expect("tsvd");
    assert_abs_diff_eq!(ridge, ols, epsilon = 1e-8);
}

#[test]
fn elastic_net_near_rho_one_tracks_the_lasso_path() {
    let dataset = decay_dataset(17);
    let rho = 0.999_999;
    let alphas = array![0.0, 0.5];

    let mut l1_config = LdaConfig::new(RegularizationMode::L1);
    l1_config.lifetimes = array![0.5, 1.0, 2.0, 5.0, 10.0];
    l1_config.operator = RegularizationOperator::identity(5);
    l1_config.alphas = alphas.clone();
    let l1_output = run_lda(&dataset, &l1_config).expect("l1 run");
    let l1_tensor = match l1_output.solution() {
        Solution::Plain(tensor) => tensor.clone(),
        Solution::ElasticNet(_) => panic!("L1 must yield a plain tensor"),
    };

    let mut en_config = LdaConfig::new(RegularizationMode::ElasticNet);
    en_config.lifetimes = array![0.5, 1.0, 2.0, 5.0, 10.0];
    en_config.operator = RegularizationOperator::identity(5);
    en_config.alphas = alphas;
    en_config.rhos = array![rho];
    let en_output = run_lda(&dataset, &en_config).expect("elastic net run");
    let en_tensor = match en_output.solution() {
        Solution::ElasticNet(tensor) => tensor.clone(),
        Solution::Plain(_) => panic!("Elastic Net must yield a rho-resolved tensor"),
    };

    for ai in 0..2 {
        let lasso_slice = l1_tensor.slice(s![.., .., ai]);
        let en_slice = en_tensor.slice(s![.., .., ai, 0]);
        for (a, b) in lasso_slice.iter().zip(en_slice.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }
}

#[test]
fn elastic_net_near_rho_zero_points_along_the_ridge_direction() {
    // With an orthonormal design the augmented problem stays orthonormal,
    // so the rho -> 0 limit is the ridge solution up to the naive-elastic-net
    // rescale; the directions must agree.
    let d: Array2<f64> = Array2::eye(3);
    let data = array![[3.0], [1.0], [2.0]];
    let l_op = RegularizationOperator::identity(3);
    let alpha = 2.0;
    let rho = 1e-3;
    let x_init = Array2::from_elem((3, 1), 1.0);
    let en = elastic_net::solve(
        &d,
        &data,
        &l_op,
        &array![alpha],
        &array![rho],
        &x_init,
        &lasso::LassoOptions::default(),
    )
    .expect("elastic net");

    let a2 = (1.0 - rho) * alpha;
    let ridge_fit = tikhonov::solve(&d, &data, &l_op, &array![a2], true).expect("ridge");

    let en_col: Array1<f64> = en.slice(s![.., 0, 0, 0]).to_owned();
    let ridge_col: Array1<f64> = ridge_fit.solution().slice(s![.., 0, 0]).to_owned();
    let en_norm = en_col.iter().map(|v| v * v).sum::<f64>().sqrt();
    let ridge_norm = ridge_col.iter().map(|v| v * v).sum::<f64>().sqrt();
    for i in 0..3 {
        assert_abs_diff_eq!(
            en_col[i] / en_norm,
            ridge_col[i] / ridge_norm,
            epsilon = 1e-3
        );
    }
}

#[test]
fn lasso_at_zero_alpha_keeps_the_warm_start_fixed_points() {
    // With an orthonormal design and no penalty the fixed point of every
    // active coordinate is the projection itself.
    let d: Array2<f64> = Array2::eye(5);
    let data = array![[1.0], [-2.0], [0.5], [3.0], [-0.25]];
    let x_init = Array2::from_elem((5, 1), 1.0);
    let x = lasso::solve(&d, &data, 0.0, &x_init, &lasso::LassoOptions::default())
        .expect("lasso");
    assert_abs_diff_eq!(x, data, epsilon = 1e-10);
}

fn decay_dataset(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.01).expect("normal");
    let times = Array1::linspace(0.0, 8.0, 30);
    let wavelengths = array![420.0, 440.0];
    let mut data = Array2::<f64>::zeros((30, 2));
    for (i, &t) in times.iter().enumerate() {
        for wl in 0..2 {
            let amp = 1.0 + 0.5 * wl as f64;
            data[[i, wl]] = amp * (-t / 2.0f64).exp() + noise.sample(&mut rng);
        }
    }
    let irf = IrfParams {
        order: 1,
        fwhm: 0.05,
        center: 0.0,
        reference_wavelength: 420.0,
    };
    Dataset::new(data, times, wavelengths, irf).expect("dataset")
}
