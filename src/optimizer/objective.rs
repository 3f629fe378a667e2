//! # Objectives
//!
//! $$
//! \max_w \frac{\mu^\top w - r_f}{\sqrt{w^\top\Sigma w}},\quad
//! \min_w w^\top\Sigma w,\quad
//! \max_w \mu^\top w\ \text{s.t.}\ \sigma_p\le\sigma^\*,\quad
//! \min_w w^\top\Sigma w\ \text{s.t.}\ \mu^\top w=r^\*
//! $$
//!
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Default annual risk-free rate.
pub const RISK_FREE_RATE: f64 = 0.02;

fn default_risk_free_rate() -> f64 {
  RISK_FREE_RATE
}

/// What an efficient portfolio optimises.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Objective {
  /// Tangency portfolio.
  MaxSharpe {
    #[serde(default = "default_risk_free_rate")]
    risk_free_rate: f64,
  },
  /// Global minimum variance.
  MinVolatility,
  /// Highest return with annual volatility at most `target`.
  TargetVolatility { target: f64 },
  /// Lowest variance with expected annual return exactly `target`.
  TargetReturn { target: f64 },
}

impl Default for Objective {
  fn default() -> Self {
    Self::MaxSharpe {
      risk_free_rate: RISK_FREE_RATE,
    }
  }
}

impl Objective {
  /// Whether the objective reads the expected-return vector.
  pub fn needs_returns(&self) -> bool {
    !matches!(self, Self::MinVolatility)
  }
}

impl fmt::Display for Objective {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MaxSharpe { risk_free_rate } => write!(f, "max Sharpe (rf {:.2}%)", risk_free_rate * 100.0),
      Self::MinVolatility => write!(f, "min volatility"),
      Self::TargetVolatility { target } => write!(f, "target volatility {:.2}%", target * 100.0),
      Self::TargetReturn { target } => write!(f, "target return {:.2}%", target * 100.0),
    }
  }
}
