//! # Solvers
//!
//! $$
//! \min_{x}\ \tfrac12 x^\top P x + q^\top x\quad\text{s.t.}\quad Ax=b,\ Gx\le h
//! $$
//!
//! Dense convex quadratic-program solvers behind the [`QuadraticProgramSolver`]
//! trait. The optimizer only builds [`QuadraticProgram`]s; which algorithm
//! solves them is a configuration choice.

pub mod active_set;
pub mod interior_point;
pub mod problem;

pub use active_set::ActiveSetSolver;
pub use interior_point::InteriorPointSolver;
pub use problem::LinearConstraint;
pub use problem::QpSolution;
pub use problem::QuadraticProgram;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

/// A solver for convex quadratic programs.
///
/// Implementations must return a globally optimal point for convex inputs or
/// one of `Infeasible`, `Unbounded` or `SolverTimeout`.
pub trait QuadraticProgramSolver {
  fn name(&self) -> &'static str;

  fn solve(&self, qp: &QuadraticProgram) -> Result<QpSolution>;
}

/// Available solver implementations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
  /// Goldfarb-Idnani dual active-set method.
  #[default]
  ActiveSet,
  /// Mehrotra predictor-corrector interior-point method.
  InteriorPoint,
}

impl SolverKind {
  /// Parse a solver name, e.g. `"active-set"` or `"ipm"`.
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_lowercase().as_str() {
      "active-set" | "activeset" | "active_set" | "gi" => Some(Self::ActiveSet),
      "interior-point" | "interiorpoint" | "interior_point" | "ipm" => Some(Self::InteriorPoint),
      _ => None,
    }
  }
}

/// Solver selection plus iteration and tolerance limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
  pub kind: SolverKind,
  /// Iteration cap. `None` uses the solver's own default.
  pub max_iterations: Option<usize>,
  /// Convergence tolerance. `None` uses the solver's own default.
  pub tolerance: Option<f64>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      kind: SolverKind::ActiveSet,
      max_iterations: None,
      tolerance: None,
    }
  }
}

impl SolverConfig {
  pub fn with_kind(kind: SolverKind) -> Self {
    Self {
      kind,
      ..Self::default()
    }
  }

  /// Instantiate the configured solver.
  pub fn build(&self) -> Box<dyn QuadraticProgramSolver> {
    match self.kind {
      SolverKind::ActiveSet => {
        let mut s = ActiveSetSolver::default();
        if let Some(it) = self.max_iterations {
          s.max_iterations = it;
        }
        if let Some(tol) = self.tolerance {
          s.tolerance = tol;
        }
        Box::new(s)
      }
      SolverKind::InteriorPoint => {
        let mut s = InteriorPointSolver::default();
        if let Some(it) = self.max_iterations {
          s.max_iterations = it;
        }
        if let Some(tol) = self.tolerance {
          s.tolerance = tol;
        }
        Box::new(s)
      }
    }
  }
}

pub(crate) fn inf_norm(v: &nalgebra::DVector<f64>) -> f64 {
  v.iter().fold(0.0, |m, x| m.max(x.abs()))
}
