//! # Estimator
//!
//! $$
//! \text{PriceTable}\ \mapsto\ (\hat\mu,\hat\Sigma)
//! $$
//!
use nalgebra::DMatrix;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::expected_returns::ReturnMethod;
use super::risk_models::RiskModel;
use super::TRADING_DAYS;
use crate::assets::CovarianceMatrix;
use crate::assets::ReturnVector;
use crate::data::PriceTable;
use crate::error::PortfolioError;
use crate::error::Result;

/// Runtime configuration for [`Estimator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
  /// Expected-return estimator.
  pub returns: ReturnMethod,
  /// Covariance estimator.
  pub risk_model: RiskModel,
  /// Periods per year used for annualisation.
  pub frequency: f64,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      returns: ReturnMethod::default(),
      risk_model: RiskModel::Sample,
      frequency: TRADING_DAYS,
    }
  }
}

/// Turns a price table into annualised return and covariance estimates.
#[derive(Clone, Debug, Default)]
pub struct Estimator {
  config: EstimatorConfig,
}

impl Estimator {
  pub fn new(config: EstimatorConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EstimatorConfig {
    &self.config
  }

  /// Same estimator with a different risk model.
  pub fn with_risk_model(&self, risk_model: RiskModel) -> Self {
    Self {
      config: EstimatorConfig {
        risk_model,
        ..self.config.clone()
      },
    }
  }

  /// Expected returns and covariance in one pass.
  pub fn estimate(&self, prices: &PriceTable) -> Result<(ReturnVector, CovarianceMatrix)> {
    let returns = self.validated_returns(prices)?;
    let mu = self.config.returns.estimate(prices, self.config.frequency)?;
    let cov = self.covariance_from_returns(prices, &returns)?;
    debug!(
      assets = prices.n_assets(),
      observations = returns.nrows(),
      returns = ?self.config.returns,
      risk_model = ?self.config.risk_model,
      "estimated return and risk inputs"
    );
    Ok((mu, cov))
  }

  pub fn expected_returns(&self, prices: &PriceTable) -> Result<ReturnVector> {
    self.validated_returns(prices)?;
    self.config.returns.estimate(prices, self.config.frequency)
  }

  pub fn risk_matrix(&self, prices: &PriceTable) -> Result<CovarianceMatrix> {
    let returns = self.validated_returns(prices)?;
    self.covariance_from_returns(prices, &returns)
  }

  fn covariance_from_returns(
    &self,
    prices: &PriceTable,
    returns: &Array2<f64>,
  ) -> Result<CovarianceMatrix> {
    let cov = self.config.risk_model.estimate(returns, self.config.frequency)?;
    let n = cov.nrows();
    CovarianceMatrix::new(
      prices.assets().clone(),
      DMatrix::from_fn(n, n, |i, j| cov[[i, j]]),
    )
  }

  /// Periodic returns, checked for length and for constant series.
  fn validated_returns(&self, prices: &PriceTable) -> Result<Array2<f64>> {
    if !(self.config.frequency > 0.0) {
      return Err(PortfolioError::invalid("frequency must be positive"));
    }

    let returns = prices.returns();
    if returns.nrows() < 2 {
      return Err(PortfolioError::InsufficientData {
        observations: returns.nrows(),
        required: 2,
      });
    }

    for (j, col) in returns.columns().into_iter().enumerate() {
      let n = col.len() as f64;
      let mean = col.sum() / n;
      let var = col.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
      if var <= 1e-20 {
        return Err(PortfolioError::DegenerateAsset {
          asset: prices.assets().get(j).unwrap_or("?").to_string(),
        });
      }
    }

    Ok(returns)
  }
}
