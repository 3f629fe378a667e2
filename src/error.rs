//! # Errors
//!
//! Failure taxonomy shared by the estimator, the solvers, the optimizer and
//! the allocator. Every public fallible operation returns [`Result`].

use thiserror::Error;

/// Errors surfaced by the portfolio pipeline.
#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Not enough observations to estimate returns or risk.
  #[error("insufficient data: {observations} observations, at least {required} required")]
  InsufficientData {
    /// Observations available.
    observations: usize,
    /// Observations required.
    required: usize,
  },

  /// An asset whose return series has zero variance.
  #[error("asset {asset} has a constant price series (zero variance)")]
  DegenerateAsset {
    /// Offending asset id.
    asset: String,
  },

  /// The constraints admit no solution.
  #[error("optimization problem is infeasible: {reason}")]
  Infeasible {
    /// Human readable reason.
    reason: String,
  },

  /// The objective has no finite optimum.
  #[error("optimization problem is unbounded: {reason}")]
  Unbounded {
    /// Human readable reason.
    reason: String,
  },

  /// Not a single share of any asset is affordable.
  #[error("budget {budget:.2} is below the cheapest asset price {cheapest:.2}")]
  BudgetTooSmall {
    /// Cash budget.
    budget: f64,
    /// Cheapest price among the allocated assets.
    cheapest: f64,
  },

  /// Iteration or node limit reached before convergence.
  #[error("{solver} did not converge within {iterations} iterations")]
  SolverTimeout {
    /// Solver name.
    solver: &'static str,
    /// Iteration limit that was hit.
    iterations: usize,
  },

  /// Malformed or inconsistent input.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Asset id not part of the asset set.
  #[error("unknown asset: {0}")]
  UnknownAsset(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Csv(#[from] csv::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

impl PortfolioError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  pub(crate) fn infeasible(reason: impl Into<String>) -> Self {
    Self::Infeasible {
      reason: reason.into(),
    }
  }

  pub(crate) fn unbounded(reason: impl Into<String>) -> Self {
    Self::Unbounded {
      reason: reason.into(),
    }
  }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PortfolioError>;
