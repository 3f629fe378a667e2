//! # Estimators
//!
//! $$
//! \hat\mu_i=\Big(\frac{p_{i,T}}{p_{i,1}}\Big)^{f/(T-1)}-1,\qquad
//! \hat\Sigma=f\cdot\widehat{\operatorname{Cov}}(r)
//! $$
//!
//! Expected-return and covariance estimators built from a [`PriceTable`](crate::data::PriceTable).

pub mod estimator;
pub mod expected_returns;
pub mod risk_models;

pub use estimator::Estimator;
pub use estimator::EstimatorConfig;
pub use expected_returns::ema_historical_return;
pub use expected_returns::mean_historical_return;
pub use expected_returns::ReturnMethod;
pub use risk_models::cov_to_corr;
pub use risk_models::fix_nonpositive_semidefinite;
pub use risk_models::ledoit_wolf;
pub use risk_models::sample_cov;
pub use risk_models::shrunk_covariance;
pub use risk_models::RiskModel;
pub use risk_models::ShrinkageTarget;

/// Trading days per year.
pub const TRADING_DAYS: f64 = 252.0;
