//! # Efficient Frontier
//!
//! $$
//! \min_{y}\ y^\top\Sigma y\quad\text{s.t.}\quad(\mu-r_f)^\top y=1,\ \ \ell\,\mathbf 1^\top y\le y\le u\,\mathbf 1^\top y,
//! \qquad w^\*=\frac{y^\*}{\mathbf 1^\top y^\*}
//! $$
//!
//! Mean-variance problem builders. Every objective is reduced to one or more
//! convex quadratic programs and handed to the configured solver.
//!
use nalgebra::DMatrix;
use nalgebra::DVector;
use roots::find_root_brent;
use roots::SimpleConvergency;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::constraints::Constraints;
use super::constraints::ResolvedConstraints;
use super::objective::Objective;
use super::performance::portfolio_performance;
use super::performance::PortfolioPerformance;
use crate::assets::AssetSet;
use crate::assets::CovarianceMatrix;
use crate::assets::ReturnVector;
use crate::assets::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::solvers::inf_norm;
use crate::solvers::QuadraticProgram;
use crate::solvers::SolverConfig;

/// Default cutoff for [`EfficientFrontier::clean_weights`].
pub const CLEAN_CUTOFF: f64 = 1e-4;

const VOL_TOLERANCE: f64 = 1e-9;
const FRONTIER_BACKOFF: f64 = 1e-6;
const TAU_MIN: f64 = 1e-10;
const TAU_MAX: f64 = 1e6;

/// One sampled point of the efficient frontier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrontierPoint {
  pub expected_return: f64,
  pub volatility: f64,
}

/// Mean-variance optimizer over a fixed universe.
#[derive(Clone, Debug)]
pub struct EfficientFrontier {
  mu: Option<ReturnVector>,
  cov: CovarianceMatrix,
  constraints: Constraints,
  gamma: f64,
  solver: SolverConfig,
}

impl EfficientFrontier {
  pub fn new(
    mu: Option<ReturnVector>,
    cov: CovarianceMatrix,
    constraints: Constraints,
  ) -> Result<Self> {
    if cov.is_empty() {
      return Err(PortfolioError::invalid("covariance matrix has no assets"));
    }
    if let Some(mu) = &mu {
      mu.assets().ensure_same(cov.assets())?;
      if mu.values().iter().any(|v| !v.is_finite()) {
        return Err(PortfolioError::invalid("expected returns must be finite"));
      }
    }
    Ok(Self {
      mu,
      cov,
      constraints,
      gamma: 0.0,
      solver: SolverConfig::default(),
    })
  }

  /// L2 regularisation weight; adds `gamma·‖w‖²` to every objective.
  pub fn with_gamma(mut self, gamma: f64) -> Self {
    self.gamma = gamma;
    self
  }

  pub fn with_solver(mut self, solver: SolverConfig) -> Self {
    self.solver = solver;
    self
  }

  pub fn assets(&self) -> &AssetSet {
    self.cov.assets()
  }

  pub fn expected_returns(&self) -> Option<&ReturnVector> {
    self.mu.as_ref()
  }

  pub fn covariance(&self) -> &CovarianceMatrix {
    &self.cov
  }

  pub fn constraints(&self) -> &Constraints {
    &self.constraints
  }

  /// Solve for the weights that optimise `objective`.
  pub fn optimize(&self, objective: &Objective) -> Result<WeightVector> {
    if !(self.gamma >= 0.0) || !self.gamma.is_finite() {
      return Err(PortfolioError::invalid("gamma must be non-negative"));
    }
    let resolved = self.constraints.resolve(self.assets())?;

    let w = match *objective {
      Objective::MaxSharpe { risk_free_rate } => self.solve_max_sharpe(&resolved, risk_free_rate)?,
      Objective::MinVolatility => self.solve_min_volatility(&resolved)?,
      Objective::TargetVolatility { target } => self.solve_target_volatility(&resolved, target)?,
      Objective::TargetReturn { target } => self.solve_target_return(&resolved, target)?,
    };

    debug!(
      %objective,
      gamma = self.gamma,
      volatility = self.cov.quad_form(&w).max(0.0).sqrt(),
      "optimized weights"
    );
    WeightVector::from_dvector(self.assets().clone(), w)
  }

  pub fn max_sharpe(&self, risk_free_rate: f64) -> Result<WeightVector> {
    self.optimize(&Objective::MaxSharpe { risk_free_rate })
  }

  pub fn min_volatility(&self) -> Result<WeightVector> {
    self.optimize(&Objective::MinVolatility)
  }

  pub fn efficient_risk(&self, target_volatility: f64) -> Result<WeightVector> {
    self.optimize(&Objective::TargetVolatility {
      target: target_volatility,
    })
  }

  pub fn efficient_return(&self, target_return: f64) -> Result<WeightVector> {
    self.optimize(&Objective::TargetReturn {
      target: target_return,
    })
  }

  pub fn portfolio_performance(
    &self,
    weights: &WeightVector,
    risk_free_rate: f64,
  ) -> Result<PortfolioPerformance> {
    portfolio_performance(weights, self.mu.as_ref(), &self.cov, risk_free_rate)
  }

  /// Zero weights below `cutoff` in magnitude and push the residual back onto
  /// the remaining positions so the sum matches the net exposure again.
  ///
  /// A small weight is only zeroed when zero lies within that asset's bounds.
  /// The residual is spread in proportion to `|w|` and capped by bound room.
  pub fn clean_weights(&self, weights: &WeightVector, cutoff: f64) -> Result<WeightVector> {
    weights.assets().ensure_same(self.assets())?;
    if !(cutoff >= 0.0) {
      return Err(PortfolioError::invalid("cutoff must be non-negative"));
    }
    let resolved = self.constraints.resolve(self.assets())?;
    let mut w: Vec<f64> = weights.values().iter().copied().collect();

    for (i, wi) in w.iter_mut().enumerate() {
      if wi.abs() < cutoff && resolved.contains(i, 0.0) {
        *wi = 0.0;
      }
    }

    rebalance(&mut w, &resolved)?;
    WeightVector::new(self.assets().clone(), w)
  }

  /// Up to `n` points between the minimum-volatility return and the highest
  /// attainable return. Targets the solver rejects are skipped.
  pub fn efficient_frontier_points(&self, n: usize) -> Result<Vec<FrontierPoint>> {
    if n < 2 {
      return Err(PortfolioError::invalid("frontier needs at least two points"));
    }
    let mu = self.require_mu()?;
    let resolved = self.constraints.resolve(self.assets())?;

    let w_min = self.solve_min_volatility(&resolved)?;
    let r_min = mu.values().dot(&w_min);
    let r_max = match boxed_max_return(mu.values(), &resolved) {
      Some(r) => r,
      None => mu.values().dot(&self.solve_max_return(&resolved)?),
    };

    // stay clear of the vertex where the return equality is barely feasible
    let span = r_max - r_min;
    let span = (span - FRONTIER_BACKOFF * span.abs().max(1.0)).max(0.0);
    let points: Vec<FrontierPoint> = (0..n)
      .filter_map(|k| {
        let target = r_min + span * k as f64 / (n - 1) as f64;
        match self.solve_target_return(&resolved, target) {
          Ok(w) => Some(FrontierPoint {
            expected_return: mu.values().dot(&w),
            volatility: self.cov.quad_form(&w).max(0.0).sqrt(),
          }),
          Err(e) => {
            warn!(target_return = target, error = %e, "skipping frontier point");
            None
          }
        }
      })
      .collect();
    Ok(points)
  }

  fn require_mu(&self) -> Result<&ReturnVector> {
    self
      .mu
      .as_ref()
      .ok_or_else(|| PortfolioError::invalid("objective requires expected returns"))
  }

  fn n(&self) -> usize {
    self.cov.len()
  }

  /// `2Σ + 2γI`
  fn risk_hessian(&self) -> DMatrix<f64> {
    let n = self.n();
    self.cov.matrix() * 2.0 + DMatrix::<f64>::identity(n, n) * (2.0 * self.gamma)
  }

  /// Budget, bound and group rows on the weight variables.
  fn weight_program(&self, p: DMatrix<f64>, q: DVector<f64>, c: &ResolvedConstraints) -> QuadraticProgram {
    let n = self.n();
    let mut qp = QuadraticProgram::new(p, q);
    qp.add_equality(DVector::from_element(n, 1.0), c.net);
    for (i, &(lo, hi)) in c.bounds.iter().enumerate() {
      if lo.is_finite() {
        qp.add_var_lower(i, lo);
      }
      if hi.is_finite() {
        qp.add_var_upper(i, hi);
      }
    }
    for g in &c.groups {
      let mut row = DVector::zeros(n);
      for &i in &g.members {
        row[i] = 1.0;
      }
      if g.lower.is_finite() {
        qp.add_lower(row.clone(), g.lower);
      }
      if g.upper.is_finite() {
        qp.add_inequality(row, g.upper);
      }
    }
    qp
  }

  fn solve(&self, qp: &QuadraticProgram) -> Result<DVector<f64>> {
    let solver = self.solver.build();
    let sol = solver.solve(qp)?;
    debug!(
      solver = solver.name(),
      iterations = sol.iterations,
      objective = sol.objective,
      "solved quadratic program"
    );
    Ok(sol.x)
  }

  fn solve_min_volatility(&self, c: &ResolvedConstraints) -> Result<DVector<f64>> {
    let qp = self.weight_program(self.risk_hessian(), DVector::zeros(self.n()), c);
    self.solve(&qp)
  }

  fn solve_target_return(&self, c: &ResolvedConstraints, target: f64) -> Result<DVector<f64>> {
    let mu = self.require_mu()?;
    if !target.is_finite() {
      return Err(PortfolioError::invalid("target return must be finite"));
    }
    let mut qp = self.weight_program(self.risk_hessian(), DVector::zeros(self.n()), c);
    qp.add_equality(mu.values().clone(), target);
    self.solve(&qp)
  }

  /// Near-linear program `max μᵀw` with a vanishing quadratic term.
  fn solve_max_return(&self, c: &ResolvedConstraints) -> Result<DVector<f64>> {
    let mu = self.require_mu()?;
    let n = self.n();
    let scale = self.cov.matrix().diagonal().amax().max(1e-12);
    let p = DMatrix::<f64>::identity(n, n) * (1e-6 * scale);
    let qp = self.weight_program(p, -mu.values(), c);
    self.solve(&qp)
  }

  fn solve_max_sharpe(&self, c: &ResolvedConstraints, risk_free_rate: f64) -> Result<DVector<f64>> {
    let mu = self.require_mu()?;
    if c.net != 1.0 {
      return Err(PortfolioError::invalid(
        "max Sharpe is only defined for fully invested portfolios",
      ));
    }
    if mu.max() <= risk_free_rate {
      return Err(PortfolioError::invalid(format!(
        "at least one expected return must exceed the risk-free rate {risk_free_rate}"
      )));
    }

    let n = self.n();
    let ones = DVector::from_element(n, 1.0);
    let mut qp = QuadraticProgram::new(self.risk_hessian(), DVector::zeros(n));
    qp.add_equality(mu.values().add_scalar(-risk_free_rate), 1.0);
    // k = 1ᵀy >= 0
    qp.add_lower(ones.clone(), 0.0);

    for (i, &(lo, hi)) in c.bounds.iter().enumerate() {
      let mut e = DVector::zeros(n);
      e[i] = 1.0;
      if lo.is_finite() {
        qp.add_lower(&e - &ones * lo, 0.0);
      }
      if hi.is_finite() {
        qp.add_inequality(&e - &ones * hi, 0.0);
      }
    }
    for g in &c.groups {
      let mut row = DVector::zeros(n);
      for &i in &g.members {
        row[i] = 1.0;
      }
      if g.lower.is_finite() {
        qp.add_lower(&row - &ones * g.lower, 0.0);
      }
      if g.upper.is_finite() {
        qp.add_inequality(&row - &ones * g.upper, 0.0);
      }
    }

    let y = self.solve(&qp)?;
    let k = y.sum();
    if k <= 1e-8 * inf_norm(&y) {
      return Err(PortfolioError::unbounded(
        "Sharpe ratio is only approached as weights grow without limit",
      ));
    }
    // y / k carries the solver's slack on the scaled rows multiplied by 1/k
    snap_to_bounds(y / k, c)
  }

  /// Weights minimising `½wᵀΣw + τ(γ‖w‖² − μᵀw)`.
  fn solve_tradeoff(&self, c: &ResolvedConstraints, mu: &DVector<f64>, tau: f64) -> Result<DVector<f64>> {
    let n = self.n();
    let p = self.cov.matrix() + DMatrix::<f64>::identity(n, n) * (2.0 * self.gamma * tau);
    let qp = self.weight_program(p, -mu * tau, c);
    self.solve(&qp)
  }

  /// Bisect the risk-aversion multiplier `λ = 1/τ` so that volatility hits
  /// `target`. Volatility is non-decreasing in `τ`.
  fn solve_target_volatility(&self, c: &ResolvedConstraints, target: f64) -> Result<DVector<f64>> {
    let mu = self.require_mu()?.values().clone();
    if !(target > 0.0) || !target.is_finite() {
      return Err(PortfolioError::invalid("target volatility must be positive"));
    }

    let vol = |w: &DVector<f64>| self.cov.quad_form(w).max(0.0).sqrt();

    let w_min = self.solve_tradeoff(c, &mu, 0.0)?;
    let min_vol = vol(&w_min);
    if target < min_vol - VOL_TOLERANCE {
      return Err(PortfolioError::infeasible(format!(
        "target volatility {target:.4} is below the minimum attainable {min_vol:.4}"
      )));
    }
    if target <= min_vol + VOL_TOLERANCE {
      return Ok(w_min);
    }

    // bracket [lo, hi] with vol(lo) < target <= vol(hi)
    let mut hi = 1.0;
    let mut w_hi = self.solve_tradeoff(c, &mu, hi)?;
    let mut lo = hi;
    while vol(&w_hi) < target {
      lo = hi;
      hi *= 10.0;
      if hi > TAU_MAX {
        // volatility cap never binds
        return Ok(w_hi);
      }
      w_hi = self.solve_tradeoff(c, &mu, hi)?;
    }
    if lo == hi {
      lo = hi / 10.0;
      while vol(&self.solve_tradeoff(c, &mu, lo)?) >= target {
        lo /= 10.0;
        if lo < TAU_MIN {
          return Ok(w_min);
        }
      }
    }

    let mut failure = None;
    let f = |log_tau: f64| match self.solve_tradeoff(c, &mu, log_tau.exp()) {
      Ok(w) => vol(&w) - target,
      Err(e) => {
        failure.get_or_insert(e);
        0.0
      }
    };
    let mut convergency = SimpleConvergency {
      eps: 1e-12,
      max_iter: 200,
    };
    let root = find_root_brent(lo.ln(), hi.ln(), f, &mut convergency);
    if let Some(e) = failure {
      return Err(e);
    }
    let log_tau = root.map_err(|_| PortfolioError::SolverTimeout {
      solver: "brent",
      iterations: 200,
    })?;

    let w = self.solve_tradeoff(c, &mu, log_tau.exp())?;
    debug!(tau = log_tau.exp(), volatility = vol(&w), target, "risk aversion found");
    Ok(w)
  }
}

/// Push the net exposure back to `c.net` by spreading the residual over the
/// non-zero weights in proportion to `|w|`, capped by each bound's room.
fn rebalance(w: &mut [f64], c: &ResolvedConstraints) -> Result<()> {
  let mut residual = c.net - w.iter().sum::<f64>();
  for _ in 0..=w.len() {
    if residual.abs() <= 1e-14 {
      break;
    }
    let room: Vec<f64> = w
      .iter()
      .enumerate()
      .map(|(i, &wi)| {
        if wi == 0.0 {
          return 0.0;
        }
        let (lo, hi) = c.bounds[i];
        if residual > 0.0 {
          (hi - wi).max(0.0)
        } else {
          (wi - lo).max(0.0)
        }
      })
      .collect();
    let weight_sum: f64 = w
      .iter()
      .zip(room.iter())
      .filter(|(_, r)| **r > 0.0)
      .map(|(wi, _)| wi.abs())
      .sum();
    if weight_sum == 0.0 {
      return Err(PortfolioError::infeasible(
        "weights cannot be rebalanced within bounds",
      ));
    }

    for (wi, r) in w.iter_mut().zip(room.iter()) {
      if *r > 0.0 {
        let share = residual * wi.abs() / weight_sum;
        *wi += share.signum() * share.abs().min(*r);
      }
    }
    residual = c.net - w.iter().sum::<f64>();
  }
  Ok(())
}

/// Clip onto the per-asset bounds, then restore the net exposure.
fn snap_to_bounds(mut w: DVector<f64>, c: &ResolvedConstraints) -> Result<DVector<f64>> {
  for (wi, &(lo, hi)) in w.iter_mut().zip(c.bounds.iter()) {
    *wi = wi.clamp(lo, hi);
  }
  rebalance(w.as_mut_slice(), c)?;
  Ok(w)
}

/// `max μᵀw` over box bounds and the budget: fill the best assets first.
/// `None` when groups or an infinite bound make the greedy fill inexact.
fn boxed_max_return(mu: &DVector<f64>, c: &ResolvedConstraints) -> Option<f64> {
  if !c.groups.is_empty() || c.bounds.iter().any(|(lo, hi)| !lo.is_finite() || !hi.is_finite()) {
    return None;
  }
  let mut w: Vec<f64> = c.bounds.iter().map(|b| b.0).collect();
  let mut remaining = c.net - w.iter().sum::<f64>();
  let mut order: Vec<usize> = (0..w.len()).collect();
  order.sort_by(|&a, &b| mu[b].total_cmp(&mu[a]));
  for i in order {
    if remaining <= 0.0 {
      break;
    }
    let add = (c.bounds[i].1 - c.bounds[i].0).min(remaining);
    w[i] += add;
    remaining -= add;
  }
  Some(w.iter().zip(mu.iter()).map(|(wi, m)| wi * m).sum())
}

/// One-shot form of [`EfficientFrontier::optimize`].
pub fn optimize(
  mu: Option<&ReturnVector>,
  cov: &CovarianceMatrix,
  objective: &Objective,
  constraints: &Constraints,
) -> Result<WeightVector> {
  EfficientFrontier::new(mu.cloned(), cov.clone(), constraints.clone())?.optimize(objective)
}
