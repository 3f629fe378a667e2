//! # Portfolio Performance
//!
//! $$
//! R_p=\mu^\top w,\qquad \sigma_p=\sqrt{w^\top\Sigma w},\qquad S=\frac{R_p-r_f}{\sigma_p}
//! $$
//!
use serde::Serialize;

use crate::assets::CovarianceMatrix;
use crate::assets::ReturnVector;
use crate::assets::WeightVector;
use crate::error::Result;

/// Annualised expected return, volatility and Sharpe ratio of a portfolio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioPerformance {
  /// Absent when no return estimate was supplied.
  pub expected_return: Option<f64>,
  pub volatility: f64,
  /// Absent without a return estimate or for a zero-risk portfolio.
  pub sharpe: Option<f64>,
}

pub fn portfolio_performance(
  weights: &WeightVector,
  mu: Option<&ReturnVector>,
  cov: &CovarianceMatrix,
  risk_free_rate: f64,
) -> Result<PortfolioPerformance> {
  weights.assets().ensure_same(cov.assets())?;
  let volatility = cov.quad_form(weights.values()).max(0.0).sqrt();
  let expected_return = mu.map(|m| m.dot(weights)).transpose()?;
  let sharpe = expected_return
    .filter(|_| volatility > 0.0)
    .map(|r| (r - risk_free_rate) / volatility);
  Ok(PortfolioPerformance {
    expected_return,
    volatility,
    sharpe,
  })
}
