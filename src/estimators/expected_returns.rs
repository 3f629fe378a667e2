//! # Expected Returns
//!
//! $$
//! \hat\mu^{\mathrm{geo}}_i=\prod_t(1+r_{i,t})^{f/n}-1,\qquad
//! \hat\mu^{\mathrm{ema}}_i=\frac{\sum_k (1-\alpha)^k r_{i,T-k}}{\sum_k(1-\alpha)^k}
//! $$
//!
use ndarray::Array2;
use ndarray::ArrayView1;
use serde::Deserialize;
use serde::Serialize;

use crate::assets::ReturnVector;
use crate::data::PriceTable;
use crate::error::PortfolioError;
use crate::error::Result;

/// How the expected-return vector is estimated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ReturnMethod {
  /// Historical mean, geometric when `compounding` is set.
  MeanHistorical { compounding: bool },
  /// Exponentially weighted mean giving more weight to recent returns.
  Ema { span: usize, compounding: bool },
}

impl Default for ReturnMethod {
  fn default() -> Self {
    Self::MeanHistorical { compounding: true }
  }
}

impl ReturnMethod {
  pub fn estimate(&self, prices: &PriceTable, frequency: f64) -> Result<ReturnVector> {
    match *self {
      Self::MeanHistorical { compounding } => mean_historical_return(prices, compounding, frequency),
      Self::Ema { span, compounding } => ema_historical_return(prices, span, compounding, frequency),
    }
  }
}

fn annualize(periodic: f64, compounding: bool, frequency: f64) -> f64 {
  if compounding {
    (1.0 + periodic).powf(frequency) - 1.0
  } else {
    periodic * frequency
  }
}

fn checked_returns(prices: &PriceTable) -> Result<Array2<f64>> {
  let returns = prices.returns();
  if returns.nrows() == 0 {
    return Err(PortfolioError::InsufficientData {
      observations: 0,
      required: 1,
    });
  }
  Ok(returns)
}

/// Annualised historical mean return per asset.
///
/// With compounding this is the geometric growth rate over the sample,
/// otherwise the arithmetic mean of periodic returns scaled by `frequency`.
pub fn mean_historical_return(
  prices: &PriceTable,
  compounding: bool,
  frequency: f64,
) -> Result<ReturnVector> {
  let returns = checked_returns(prices)?;
  let n = returns.nrows() as f64;

  let mu = returns
    .columns()
    .into_iter()
    .map(|col| {
      if compounding {
        let growth: f64 = col.iter().map(|r| 1.0 + r).product();
        growth.powf(frequency / n) - 1.0
      } else {
        col.sum() / n * frequency
      }
    })
    .collect();

  ReturnVector::new(prices.assets().clone(), mu)
}

fn ema(col: ArrayView1<'_, f64>, alpha: f64) -> f64 {
  let mut num = 0.0;
  let mut den = 0.0;
  let mut weight = 1.0;
  for r in col.iter().rev() {
    num += weight * r;
    den += weight;
    weight *= 1.0 - alpha;
  }
  num / den
}

/// Annualised exponentially weighted mean return with the given `span`.
pub fn ema_historical_return(
  prices: &PriceTable,
  span: usize,
  compounding: bool,
  frequency: f64,
) -> Result<ReturnVector> {
  if span == 0 {
    return Err(PortfolioError::invalid("ema span must be positive"));
  }
  let returns = checked_returns(prices)?;
  let alpha = 2.0 / (span as f64 + 1.0);

  let mu = returns
    .columns()
    .into_iter()
    .map(|col| annualize(ema(col, alpha), compounding, frequency))
    .collect();

  ReturnVector::new(prices.assets().clone(), mu)
}
