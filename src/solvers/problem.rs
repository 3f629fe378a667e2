//! # Quadratic Program
//!
//! $$
//! \tfrac12 x^\top P x + q^\top x
//! $$
//!
use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;

use crate::error::PortfolioError;
use crate::error::Result;

/// `coeffs · x (= | <=) rhs`, the relation is given by where it is stored.
#[derive(Clone, Debug, ImplNew)]
pub struct LinearConstraint {
  pub coeffs: DVector<f64>,
  pub rhs: f64,
}

/// Dense convex QP: minimise `½xᵀPx + qᵀx` subject to equalities and `<=`
/// inequalities.
#[derive(Clone, Debug)]
pub struct QuadraticProgram {
  pub p: DMatrix<f64>,
  pub q: DVector<f64>,
  pub equalities: Vec<LinearConstraint>,
  pub inequalities: Vec<LinearConstraint>,
}

/// Optimal point and multipliers.
#[derive(Clone, Debug)]
pub struct QpSolution {
  pub x: DVector<f64>,
  pub objective: f64,
  pub iterations: usize,
  /// One multiplier per equality, in insertion order.
  pub eq_multipliers: DVector<f64>,
  /// One non-negative multiplier per inequality, in insertion order.
  pub ineq_multipliers: DVector<f64>,
}

impl QuadraticProgram {
  pub fn new(p: DMatrix<f64>, q: DVector<f64>) -> Self {
    Self {
      p,
      q,
      equalities: Vec::new(),
      inequalities: Vec::new(),
    }
  }

  pub fn n_vars(&self) -> usize {
    self.q.len()
  }

  /// `coeffs · x = rhs`
  pub fn add_equality(&mut self, coeffs: DVector<f64>, rhs: f64) {
    self.equalities.push(LinearConstraint::new(coeffs, rhs));
  }

  /// `coeffs · x <= rhs`
  pub fn add_inequality(&mut self, coeffs: DVector<f64>, rhs: f64) {
    self.inequalities.push(LinearConstraint::new(coeffs, rhs));
  }

  /// `coeffs · x >= rhs`
  pub fn add_lower(&mut self, coeffs: DVector<f64>, rhs: f64) {
    self.add_inequality(-coeffs, -rhs);
  }

  /// `x_i >= lb`
  pub fn add_var_lower(&mut self, i: usize, lb: f64) {
    let mut e = DVector::zeros(self.n_vars());
    e[i] = -1.0;
    self.add_inequality(e, -lb);
  }

  /// `x_i <= ub`
  pub fn add_var_upper(&mut self, i: usize, ub: f64) {
    let mut e = DVector::zeros(self.n_vars());
    e[i] = 1.0;
    self.add_inequality(e, ub);
  }

  pub fn objective(&self, x: &DVector<f64>) -> f64 {
    0.5 * x.dot(&(&self.p * x)) + self.q.dot(x)
  }

  /// Largest constraint violation at `x`.
  pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
    let eq = self
      .equalities
      .iter()
      .map(|c| (c.coeffs.dot(x) - c.rhs).abs());
    let ineq = self
      .inequalities
      .iter()
      .map(|c| (c.coeffs.dot(x) - c.rhs).max(0.0));
    eq.chain(ineq).fold(0.0, f64::max)
  }

  pub fn equality_matrix(&self) -> (DMatrix<f64>, DVector<f64>) {
    stack(&self.equalities, self.n_vars())
  }

  pub fn inequality_matrix(&self) -> (DMatrix<f64>, DVector<f64>) {
    stack(&self.inequalities, self.n_vars())
  }

  /// Check dimensions, finiteness and symmetry of `P`.
  pub fn validate(&self) -> Result<()> {
    let n = self.n_vars();
    if n == 0 {
      return Err(PortfolioError::invalid("quadratic program has no variables"));
    }
    if self.p.nrows() != n || self.p.ncols() != n {
      return Err(PortfolioError::invalid(format!(
        "objective matrix is {}x{} for {n} variables",
        self.p.nrows(),
        self.p.ncols()
      )));
    }
    if self.p.iter().chain(self.q.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid("objective has non-finite coefficients"));
    }
    let scale = self.p.amax().max(1.0);
    if (&self.p - self.p.transpose()).amax() > 1e-9 * scale {
      return Err(PortfolioError::invalid("objective matrix is not symmetric"));
    }
    for c in self.equalities.iter().chain(self.inequalities.iter()) {
      if c.coeffs.len() != n {
        return Err(PortfolioError::invalid(format!(
          "constraint has {} coefficients for {n} variables",
          c.coeffs.len()
        )));
      }
      if !c.rhs.is_finite() || c.coeffs.iter().any(|v| !v.is_finite()) {
        return Err(PortfolioError::invalid("constraint has non-finite coefficients"));
      }
    }
    Ok(())
  }
}

fn stack(rows: &[LinearConstraint], n: usize) -> (DMatrix<f64>, DVector<f64>) {
  let m = DMatrix::from_fn(rows.len(), n, |i, j| rows[i].coeffs[j]);
  let rhs = DVector::from_iterator(rows.len(), rows.iter().map(|c| c.rhs));
  (m, rhs)
}
