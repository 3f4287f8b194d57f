//! Numeric kernels and acceptance metrics shared by the engines

pub mod divergence;
pub mod intervals;
pub mod linalg;
pub mod logistic;
pub mod metrics;

pub use divergence::{bin_label, kl_divergence};
pub use intervals::{
    beta_credible_interval, beta_posterior, gamma_interval, normal_interval, z_value,
};
pub use logistic::{LogisticModel, sigmoid};
pub use metrics::{DetectionScore, auc, mad, mape, mean, median, quantile, rmse, rmse_pct, slope, std_dev};
