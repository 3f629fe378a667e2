//! # Interior Point
//!
//! $$
//! \begin{bmatrix}P + G^\top S^{-1}ZG & A^\top\\ A & 0\end{bmatrix}
//! \begin{bmatrix}\Delta x\\ \Delta y\end{bmatrix}
//! =\begin{bmatrix}-r_d - G^\top S^{-1}(r_c + Z r_i)\\ -r_p\end{bmatrix}
//! $$
//!
//! Mehrotra predictor-corrector on the slack form `Gx + s = h`, `s >= 0`.
//!
use nalgebra::linalg::LU;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::Dyn;
use tracing::trace;

use super::inf_norm;
use super::QpSolution;
use super::QuadraticProgram;
use super::QuadraticProgramSolver;
use crate::error::PortfolioError;
use crate::error::Result;

const REGULARIZATION: f64 = 1e-11;
const STEP_FRACTION: f64 = 0.99;
const DIVERGENCE: f64 = 1e12;

#[derive(Clone, Debug)]
pub struct InteriorPointSolver {
  pub max_iterations: usize,
  /// Relative residual and complementarity tolerance.
  pub tolerance: f64,
}

impl Default for InteriorPointSolver {
  fn default() -> Self {
    Self {
      max_iterations: 200,
      tolerance: 1e-10,
    }
  }
}

struct Residuals {
  dual: DVector<f64>,
  eq: DVector<f64>,
  ineq: DVector<f64>,
}

struct Step {
  dx: DVector<f64>,
  dy: DVector<f64>,
  dz: DVector<f64>,
  ds: DVector<f64>,
}

/// Largest `alpha` in `(0, 1]` keeping `v + alpha dv >= 0`.
fn max_step(v: &DVector<f64>, dv: &DVector<f64>) -> f64 {
  v.iter()
    .zip(dv.iter())
    .filter(|(_, d)| **d < 0.0)
    .map(|(vi, d)| -vi / d)
    .fold(1.0, f64::min)
}

impl InteriorPointSolver {
  #[allow(clippy::too_many_arguments)]
  fn newton_step(
    lu: &LU<f64, Dyn, Dyn>,
    g: &DMatrix<f64>,
    n: usize,
    s: &DVector<f64>,
    z: &DVector<f64>,
    res: &Residuals,
    r_c: &DVector<f64>,
  ) -> Result<Step> {
    let m_eq = res.eq.len();
    let w = (r_c + z.component_mul(&res.ineq)).component_div(s);
    let top = -&res.dual - g.transpose() * &w;
    let mut rhs = DVector::zeros(n + m_eq);
    rhs.rows_mut(0, n).copy_from(&top);
    rhs.rows_mut(n, m_eq).copy_from(&(-&res.eq));

    let sol = lu
      .solve(&rhs)
      .ok_or_else(|| PortfolioError::invalid("KKT system is singular"))?;
    let dx = sol.rows(0, n).into_owned();
    let dy = sol.rows(n, m_eq).into_owned();
    let g_dx = g * &dx;
    let dz = (r_c + z.component_mul(&res.ineq) + z.component_mul(&g_dx)).component_div(s);
    let ds = -&res.ineq - g_dx;
    Ok(Step { dx, dy, dz, ds })
  }
}

impl QuadraticProgramSolver for InteriorPointSolver {
  fn name(&self) -> &'static str {
    "interior-point"
  }

  fn solve(&self, qp: &QuadraticProgram) -> Result<QpSolution> {
    qp.validate()?;
    let n = qp.n_vars();
    let (a, b) = qp.equality_matrix();
    let (g, h) = qp.inequality_matrix();
    let m_eq = a.nrows();
    let m_in = g.nrows();
    let scale = qp.p.diagonal().amax().max(1.0);
    let delta = REGULARIZATION * scale;

    let norm_q = 1.0 + inf_norm(&qp.q);
    let norm_b = 1.0 + inf_norm(&b);
    let norm_h = 1.0 + inf_norm(&h);

    let mut x = DVector::zeros(n);
    let mut y = DVector::zeros(m_eq);
    let mut s = h.map(|v| v.max(1.0));
    let mut z = DVector::from_element(m_in, 1.0);

    let mut primal = f64::INFINITY;
    let mut dual = f64::INFINITY;

    for it in 0..self.max_iterations {
      let res = Residuals {
        dual: &qp.p * &x + &qp.q + a.transpose() * &y + g.transpose() * &z,
        eq: &a * &x - &b,
        ineq: &g * &x + &s - &h,
      };
      let mu = if m_in > 0 { s.dot(&z) / m_in as f64 } else { 0.0 };
      primal = (inf_norm(&res.eq) / norm_b).max(inf_norm(&res.ineq) / norm_h);
      dual = inf_norm(&res.dual) / norm_q;
      trace!(iteration = it, primal, dual, mu, "interior point");

      if primal <= self.tolerance && dual <= self.tolerance && mu <= self.tolerance * norm_q {
        return Ok(QpSolution {
          objective: qp.objective(&x),
          x,
          iterations: it,
          eq_multipliers: y,
          ineq_multipliers: z,
        });
      }
      if inf_norm(&x) > DIVERGENCE {
        return Err(PortfolioError::unbounded(
          "primal iterates diverge",
        ));
      }
      if inf_norm(&z) > DIVERGENCE || inf_norm(&y) > DIVERGENCE {
        return Err(PortfolioError::infeasible("dual iterates diverge"));
      }

      let d = z.component_div(&s);
      let mut gt_d = g.transpose();
      for (j, mut col) in gt_d.column_iter_mut().enumerate() {
        col *= d[j];
      }
      let hessian = &qp.p + gt_d * &g + DMatrix::<f64>::identity(n, n) * delta;

      let mut kkt = DMatrix::<f64>::zeros(n + m_eq, n + m_eq);
      kkt.view_mut((0, 0), (n, n)).copy_from(&hessian);
      kkt.view_mut((0, n), (n, m_eq)).copy_from(&a.transpose());
      kkt.view_mut((n, 0), (m_eq, n)).copy_from(&a);
      for i in 0..m_eq {
        kkt[(n + i, n + i)] = -delta;
      }
      let lu = kkt.lu();

      // predictor
      let r_aff = -s.component_mul(&z);
      let aff = Self::newton_step(&lu, &g, n, &s, &z, &res, &r_aff)?;
      let alpha_aff = max_step(&s, &aff.ds).min(max_step(&z, &aff.dz));

      // corrector
      let sigma = if m_in > 0 {
        let s_aff = &s + &aff.ds * alpha_aff;
        let z_aff = &z + &aff.dz * alpha_aff;
        let mu_aff = s_aff.dot(&z_aff) / m_in as f64;
        (mu_aff / mu).powi(3)
      } else {
        0.0
      };
      let r_c = DVector::from_element(m_in, sigma * mu)
        - s.component_mul(&z)
        - aff.ds.component_mul(&aff.dz);
      let step = Self::newton_step(&lu, &g, n, &s, &z, &res, &r_c)?;

      let alpha = (STEP_FRACTION * max_step(&s, &step.ds).min(max_step(&z, &step.dz))).min(1.0);
      let alpha = if m_in == 0 { 1.0 } else { alpha };
      x += &step.dx * alpha;
      y += &step.dy * alpha;
      s += &step.ds * alpha;
      z += &step.dz * alpha;
    }

    if primal > self.tolerance.sqrt() {
      return Err(PortfolioError::infeasible(format!(
        "primal residual {primal:.3e} after {} iterations",
        self.max_iterations
      )));
    }
    if dual > self.tolerance.sqrt() && inf_norm(&x) > DIVERGENCE.sqrt() {
      return Err(PortfolioError::unbounded(format!(
        "dual residual {dual:.3e} with growing iterates"
      )));
    }
    Err(PortfolioError::SolverTimeout {
      solver: self.name(),
      iterations: self.max_iterations,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  use super::*;
  use crate::solvers::ActiveSetSolver;

  fn dv(v: &[f64]) -> DVector<f64> {
    DVector::from_row_slice(v)
  }

  #[test]
  fn equality_only_is_one_newton_step() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(3, 3) * 2.0, DVector::zeros(3));
    qp.add_equality(dv(&[1.0, 1.0, 1.0]), 1.0);
    let sol = InteriorPointSolver::default().solve(&qp).unwrap();
    for i in 0..3 {
      assert_abs_diff_eq!(sol.x[i], 1.0 / 3.0, epsilon = 1e-8);
    }
    assert!(sol.iterations <= 2);
  }

  #[test]
  fn simplex_projection() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2) * 2.0, dv(&[-4.0, 2.0]));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_var_lower(0, 0.0);
    qp.add_var_lower(1, 0.0);
    let sol = InteriorPointSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(sol.x[1], 0.0, epsilon = 1e-6);
  }

  #[test]
  fn agrees_with_active_set_on_random_programs() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10 {
      let n = 6;
      let f = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
      let p = &f * f.transpose() + DMatrix::identity(n, n) * 0.1;
      let q = DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0));
      let mut qp = QuadraticProgram::new(p, q);
      qp.add_equality(DVector::from_element(n, 1.0), 1.0);
      for i in 0..n {
        qp.add_var_lower(i, -0.2);
        qp.add_var_upper(i, 0.6);
      }

      let a = ActiveSetSolver::default().solve(&qp).unwrap();
      let b = InteriorPointSolver::default().solve(&qp).unwrap();
      assert_abs_diff_eq!(a.objective, b.objective, epsilon = 1e-7);
      for i in 0..n {
        assert_abs_diff_eq!(a.x[i], b.x[i], epsilon = 1e-4);
      }
      assert!(qp.max_violation(&b.x) < 1e-7);
    }
  }

  #[test]
  fn detects_infeasible_bounds() {
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::zeros(2));
    qp.add_equality(dv(&[1.0, 1.0]), 1.0);
    qp.add_var_upper(0, 0.3);
    qp.add_var_upper(1, 0.3);
    let err = InteriorPointSolver::default().solve(&qp).unwrap_err();
    assert!(matches!(err, PortfolioError::Infeasible { .. }));
  }

  #[test]
  fn linear_objective_without_constraints_is_unbounded() {
    let qp = QuadraticProgram::new(DMatrix::zeros(2, 2), dv(&[-1.0, -1.0]));
    let err = InteriorPointSolver::default().solve(&qp).unwrap_err();
    assert!(matches!(err, PortfolioError::Unbounded { .. }));
  }

  #[test]
  fn iteration_cap_times_out() {
    // starts primal feasible, so stopping early is a timeout
    let mut qp = QuadraticProgram::new(DMatrix::identity(2, 2), dv(&[-5.0, -5.0]));
    qp.add_var_upper(0, 2.0);
    qp.add_var_upper(1, 2.0);
    let solver = InteriorPointSolver {
      max_iterations: 1,
      ..Default::default()
    };
    let err = solver.solve(&qp).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::SolverTimeout { solver: "interior-point", iterations: 1 }
    ));
  }
}
