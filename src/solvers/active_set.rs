//! # Dual Active Set
//!
//! $$
//! z = G^{-1}(I - N (N^\top G^{-1} N)^{-1} N^\top G^{-1})\,n_p,\qquad
//! r = (N^\top G^{-1} N)^{-1} N^\top G^{-1} n_p
//! $$
//!
//! Goldfarb-Idnani: start from the unconstrained minimiser and add violated
//! constraints one at a time, dropping active ones whose multiplier would turn
//! negative. Each iterate is dual feasible; the first primal feasible iterate
//! is optimal.
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::trace;

use super::inf_norm;
use super::QpSolution;
use super::QuadraticProgram;
use super::QuadraticProgramSolver;
use crate::error::PortfolioError;
use crate::error::Result;

const RIDGE: f64 = 1e-10;
const DEPENDENCE: f64 = 1e-11;
const UNBOUNDED_NORM: f64 = 1e8;

#[derive(Clone, Debug)]
pub struct ActiveSetSolver {
  /// Cap on add/drop steps.
  pub max_iterations: usize,
  /// Feasibility tolerance, relative to `1 + |rhs|`.
  pub tolerance: f64,
}

impl Default for ActiveSetSolver {
  fn default() -> Self {
    Self {
      max_iterations: 2000,
      tolerance: 1e-10,
    }
  }
}

/// Constraint in `n·x >= b` form.
struct Row {
  normal: DVector<f64>,
  bound: f64,
}

impl Row {
  fn slack(&self, x: &DVector<f64>) -> f64 {
    self.normal.dot(x) - self.bound
  }
}

/// Step direction in primal space and the change of the active multipliers.
fn directions(
  g_inv: &DMatrix<f64>,
  rows: &[Row],
  active: &[usize],
  np: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>)> {
  let g_inv_np = g_inv * np;
  if active.is_empty() {
    return Ok((g_inv_np, DVector::zeros(0)));
  }

  let cols: Vec<DVector<f64>> = active.iter().map(|&i| rows[i].normal.clone()).collect();
  let n_mat = DMatrix::from_columns(&cols);
  let g_inv_n = g_inv * &n_mat;
  let m = n_mat.transpose() * &g_inv_n;
  let rhs = g_inv_n.transpose() * np;

  let r = match m.clone().cholesky() {
    Some(chol) => chol.solve(&rhs),
    None => m
      .lu()
      .solve(&rhs)
      .ok_or_else(|| PortfolioError::infeasible("active constraints are linearly dependent"))?,
  };
  let z = g_inv_np - g_inv_n * &r;
  Ok((z, r))
}

impl ActiveSetSolver {
  fn timeout(&self) -> PortfolioError {
    PortfolioError::SolverTimeout {
      solver: self.name(),
      iterations: self.max_iterations,
    }
  }
}

impl QuadraticProgramSolver for ActiveSetSolver {
  fn name(&self) -> &'static str {
    "active-set"
  }

  fn solve(&self, qp: &QuadraticProgram) -> Result<QpSolution> {
    qp.validate()?;
    let n = qp.n_vars();
    let m_eq = qp.equalities.len();

    let scale = qp.p.diagonal().amax().max(1e-12);
    let g = &qp.p + DMatrix::<f64>::identity(n, n) * (RIDGE * scale);
    let g_inv = g
      .cholesky()
      .ok_or_else(|| PortfolioError::invalid("objective matrix is not positive semidefinite"))?
      .inverse();

    let rows: Vec<Row> = qp
      .equalities
      .iter()
      .map(|c| Row {
        normal: c.coeffs.clone(),
        bound: c.rhs,
      })
      .chain(qp.inequalities.iter().map(|c| Row {
        normal: -&c.coeffs,
        bound: -c.rhs,
      }))
      .collect();

    let mut x = -(&g_inv * &qp.q);
    let mut active: Vec<usize> = Vec::new();
    let mut u: Vec<f64> = Vec::new();
    let mut iterations = 0usize;

    for (e, row) in rows.iter().enumerate().take(m_eq) {
      let (z, r) = directions(&g_inv, &rows, &active, &row.normal)?;
      let s = row.slack(&x);
      let zn = z.dot(&row.normal);
      let full = row.normal.dot(&(&g_inv * &row.normal));
      if zn <= DEPENDENCE * full.max(f64::MIN_POSITIVE) {
        if s.abs() <= self.tolerance.sqrt() * (1.0 + row.bound.abs()) {
          continue;
        }
        return Err(PortfolioError::infeasible(
          "equality constraints are inconsistent",
        ));
      }
      let t = -s / zn;
      x += &z * t;
      for (uj, rj) in u.iter_mut().zip(r.iter()) {
        *uj -= t * rj;
      }
      active.push(e);
      u.push(t);
    }

    loop {
      let mut p = None;
      let mut worst = 0.0;
      for (i, row) in rows.iter().enumerate().skip(m_eq) {
        if active.contains(&i) {
          continue;
        }
        let s = row.slack(&x);
        if s < -self.tolerance * (1.0 + row.bound.abs()) && s < worst {
          worst = s;
          p = Some(i);
        }
      }
      let Some(p) = p else {
        break;
      };

      let np = &rows[p].normal;
      let full = np.dot(&(&g_inv * np));
      let mut u_p = 0.0;
      loop {
        iterations += 1;
        if iterations > self.max_iterations {
          return Err(self.timeout());
        }

        let (z, r) = directions(&g_inv, &rows, &active, np)?;

        // partial step: largest t keeping active inequality multipliers >= 0
        let r_tol = 1e-14 * inf_norm(&r).max(1.0);
        let mut t1 = f64::INFINITY;
        let mut k = None;
        for (idx, &c) in active.iter().enumerate() {
          if c >= m_eq && r[idx] > r_tol {
            let ratio = u[idx] / r[idx];
            if ratio < t1 {
              t1 = ratio;
              k = Some(idx);
            }
          }
        }

        // full step: makes constraint p active
        let zn = z.dot(np);
        let t2 = if zn > DEPENDENCE * full.max(f64::MIN_POSITIVE) {
          -rows[p].slack(&x) / zn
        } else {
          f64::INFINITY
        };

        if !t1.is_finite() && !t2.is_finite() {
          return Err(PortfolioError::infeasible(
            "no step restores the violated constraint",
          ));
        }

        let Some(k_idx) = k.filter(|_| t1 < t2) else {
          // t2 finite and not larger than t1
          x += &z * t2;
          for (uj, rj) in u.iter_mut().zip(r.iter()) {
            *uj -= t2 * rj;
          }
          u_p += t2;
          active.push(p);
          u.push(u_p);
          trace!(constraint = p, active = active.len(), "added constraint");
          break;
        };

        if t2.is_finite() {
          x += &z * t1;
        }
        for (uj, rj) in u.iter_mut().zip(r.iter()) {
          *uj -= t1 * rj;
        }
        u_p += t1;
        let dropped = active.remove(k_idx);
        u.remove(k_idx);
        trace!(constraint = dropped, active = active.len(), "dropped constraint");
      }
    }

    if inf_norm(&x) > UNBOUNDED_NORM || x.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::unbounded(
        "objective decreases without limit on the feasible set",
      ));
    }

    let mut eq_multipliers = DVector::zeros(m_eq);
    let mut ineq_multipliers = DVector::zeros(qp.inequalities.len());
    for (&c, &uj) in active.iter().zip(u.iter()) {
      if c < m_eq {
        eq_multipliers[c] = uj;
      } else {
        ineq_multipliers[c - m_eq] = uj.max(0.0);
      }
    }

    Ok(QpSolution {
      objective: qp.objective(&x),
      x,
      iterations,
      eq_multipliers,
      ineq_multipliers,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn dv(v: &[f64]) -> DVector<f64> {
    DVector::from_row_slice(v)
  }

  #[test]
  fn unconstrained_minimum() {
    let qp = QuadraticProgram::new(DMatrix::from_diagonal(&dv(&[2.0, 4.0])), dv(&[-2.0, -4.0]));
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-8);
    assert_abs_diff_eq!(sol.x[1], 1.0, epsilon = 1e-8);
    assert_eq!(sol.iterations, 0);
  }

  #[test]
  fn projection_onto_simplex_corner() {
    // min (x0-2)^2 + (x1+1)^2 s.t. x0 + x1 = 1, x >= 0  ->  (1, 0)
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2) * 2.0, dv(&[-4.0, 2.0]));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_var_lower(0, 0.0);
    qp.add_var_lower(1, 0.0);
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(sol.x[1], 0.0, epsilon = 1e-9);
    assert!(sol.ineq_multipliers[1] > 0.0);
    assert_abs_diff_eq!(sol.ineq_multipliers[0], 0.0, epsilon = 1e-12);
  }

  #[test]
  fn single_binding_inequality() {
    // min x0^2 + x1^2 - 2 x0 - 5 x1, s.t. -x0 + 2x1 <= 2, x0 + 2x1 <= 6, x0 - 2x1 <= 2, x >= 0
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2) * 2.0, dv(&[-2.0, -5.0]));
    qp.add_inequality(dv(&[-1.0, 2.0]), 2.0);
    qp.add_inequality(dv(&[1.0, 2.0]), 6.0);
    qp.add_inequality(dv(&[1.0, -2.0]), 2.0);
    qp.add_var_lower(0, 0.0);
    qp.add_var_lower(1, 0.0);
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.4, epsilon = 1e-8);
    assert_abs_diff_eq!(sol.x[1], 1.7, epsilon = 1e-8);
    assert!(qp.max_violation(&sol.x) < 1e-9);
  }

  #[test]
  fn detects_infeasible_bounds() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::zeros(2));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_var_upper(0, 0.3);
    qp.add_var_upper(1, 0.3);
    let err = ActiveSetSolver::default().solve(&qp).unwrap_err();
    assert!(matches!(err, PortfolioError::Infeasible { .. }));
  }

  #[test]
  fn detects_inconsistent_equalities() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::zeros(2));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_equality(dv(&[2.0, 2.0]), 3.0);
    let err = ActiveSetSolver::default().solve(&qp).unwrap_err();
    assert!(matches!(err, PortfolioError::Infeasible { .. }));
  }

  #[test]
  fn linear_objective_on_an_open_orthant_is_unbounded() {
    let mut qp = QuadraticProgram::new(DMatrix::zeros(2, 2), dv(&[-1.0, -1.0]));
    qp.add_var_lower(0, 0.0);
    qp.add_var_lower(1, 0.0);
    let err = ActiveSetSolver::default().solve(&qp).unwrap_err();
    assert!(matches!(err, PortfolioError::Unbounded { .. }));
  }

  #[test]
  fn redundant_equality_is_skipped() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::zeros(2));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_equality(dv(&[2.0, 2.0]), 2.0);
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 0.5, epsilon = 1e-9);
  }

  #[test]
  fn iteration_cap_times_out() {
    let n = 6;
    let mut qp = QuadraticProgram::new(DMatrix::identity(n, n) * 2.0, DVector::from_element(n, -10.0));
    for i in 0..n {
      qp.add_var_upper(i, 0.1 * (i + 1) as f64);
    }
    let solver = ActiveSetSolver {
      max_iterations: 2,
      ..Default::default()
    };
    let err = solver.solve(&qp).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::SolverTimeout { solver: "active-set", iterations: 2 }
    ));
  }

  #[test]
  fn rejects_indefinite_objective() {
    let qp = QuadraticProgram::new(DMatrix::from_diagonal(&dv(&[1.0, -1.0])), DVector::zeros(2));
    assert!(matches!(
      ActiveSetSolver::default().solve(&qp),
      Err(PortfolioError::InvalidInput(_))
    ));
  }
}
