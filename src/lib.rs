#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod design;
pub mod elastic_net;
pub mod estimate;
pub mod faer_ndarray;
pub mod lasso;
pub mod selection;
pub mod special;
pub mod tikhonov;
pub mod tsvd;
pub mod types;

pub use design::{DesignMatrix, build_design_matrix};
pub use estimate::{LdaError, LdaOutput, SelectionReport, run_lda};
pub use lasso::LassoOptions;
pub use selection::LcurveReport;
pub use tikhonov::TikhonovFit;
pub use types::{
    CriterionValues, Dataset, IrfParams, LdaConfig, RegularizationMode, RegularizationOperator,
    Solution, default_lifetime_grid, default_rho_grid, linear_grid, log_spaced_lifetimes,
};
