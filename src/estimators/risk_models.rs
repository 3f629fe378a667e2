//! # Risk Models
//!
//! $$
//! \hat\Sigma_{\text{shrunk}}=\delta F+(1-\delta)S
//! $$
//!
//! Sample covariance and Ledoit-Wolf shrinkage estimators. All functions take
//! a `T x N` matrix of periodic returns and return an annualised `N x N`
//! matrix.

use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::assets::CovarianceMatrix;
use crate::error::PortfolioError;
use crate::error::Result;

/// Structured target that Ledoit-Wolf shrinks toward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkageTarget {
  /// Scaled identity with the average sample variance on the diagonal.
  #[default]
  ConstantVariance,
  /// Sample variances with a single average correlation off the diagonal.
  ConstantCorrelation,
}

/// Covariance estimation method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RiskModel {
  #[default]
  Sample,
  LedoitWolf {
    #[serde(default)]
    target: ShrinkageTarget,
  },
  /// Fixed-intensity shrinkage toward the constant-variance target.
  Shrunk { delta: f64 },
}

impl RiskModel {
  /// Annualised covariance of `returns` (`T x N`), PSD-repaired.
  pub fn estimate(&self, returns: &Array2<f64>, frequency: f64) -> Result<Array2<f64>> {
    let cov = match *self {
      Self::Sample => sample_cov(returns, frequency)?,
      Self::LedoitWolf { target } => {
        let (cov, delta) = ledoit_wolf(returns, target, frequency)?;
        debug!(?target, shrinkage = delta, "ledoit-wolf shrinkage");
        cov
      }
      Self::Shrunk { delta } => shrunk_covariance(returns, delta, frequency)?,
    };
    Ok(fix_nonpositive_semidefinite(cov))
  }
}

fn require_observations(returns: &Array2<f64>, required: usize) -> Result<()> {
  if returns.nrows() < required {
    return Err(PortfolioError::InsufficientData {
      observations: returns.nrows(),
      required,
    });
  }
  Ok(())
}

fn centered(returns: &Array2<f64>) -> Array2<f64> {
  let mean = returns
    .mean_axis(Axis(0))
    .unwrap_or_else(|| Array1::zeros(returns.ncols()));
  returns - &mean
}

/// Sample covariance (ddof 1) scaled by `frequency`.
pub fn sample_cov(returns: &Array2<f64>, frequency: f64) -> Result<Array2<f64>> {
  require_observations(returns, 2)?;
  let cov = returns
    .t()
    .cov(1.0)
    .map_err(|_| PortfolioError::InsufficientData {
      observations: 0,
      required: 2,
    })?;
  Ok(cov * frequency)
}

/// Shrink the sample covariance toward `trace(S)/N * I` with a fixed `delta`.
pub fn shrunk_covariance(returns: &Array2<f64>, delta: f64, frequency: f64) -> Result<Array2<f64>> {
  if !(0.0..=1.0).contains(&delta) {
    return Err(PortfolioError::invalid(format!(
      "shrinkage intensity {delta} must lie in [0, 1]"
    )));
  }
  let s = sample_cov(returns, 1.0)?;
  let n = s.nrows();
  let mu = s.diag().sum() / n as f64;
  let target = Array2::<f64>::eye(n) * mu;
  Ok((target * delta + s * (1.0 - delta)) * frequency)
}

/// Ledoit-Wolf shrinkage. Returns the annualised matrix and the intensity.
pub fn ledoit_wolf(
  returns: &Array2<f64>,
  target: ShrinkageTarget,
  frequency: f64,
) -> Result<(Array2<f64>, f64)> {
  require_observations(returns, 2)?;
  let (cov, delta) = match target {
    ShrinkageTarget::ConstantVariance => lw_constant_variance(returns),
    ShrinkageTarget::ConstantCorrelation => lw_constant_correlation(returns)?,
  };
  Ok((cov * frequency, delta))
}

fn lw_constant_variance(returns: &Array2<f64>) -> (Array2<f64>, f64) {
  let x = centered(returns);
  let (t, p) = x.dim();
  let (tf, pf) = (t as f64, p as f64);

  let emp_cov = x.t().dot(&x) / tf;
  let mu = emp_cov.diag().sum() / pf;
  if p == 1 {
    return (emp_cov, 0.0);
  }

  let x2 = x.mapv(|v| v * v);
  let emp_cov_trace = x2.sum_axis(Axis(0)) / tf;
  let beta_ = x2.t().dot(&x2).sum();
  let delta_ = emp_cov.mapv(|v| (v * tf).powi(2)).sum() / (tf * tf);

  let beta = (beta_ / tf - delta_) / (pf * tf);
  let delta = (delta_ - 2.0 * mu * emp_cov_trace.sum() + pf * mu * mu) / pf;
  let beta = beta.min(delta);
  let shrinkage = if beta == 0.0 || delta == 0.0 {
    0.0
  } else {
    (beta / delta).clamp(0.0, 1.0)
  };

  let shrunk = emp_cov * (1.0 - shrinkage) + Array2::<f64>::eye(p) * (shrinkage * mu);
  (shrunk, shrinkage)
}

fn lw_constant_correlation(returns: &Array2<f64>) -> Result<(Array2<f64>, f64)> {
  let s = sample_cov(returns, 1.0)?;
  let xm = centered(returns);
  let (t, n) = xm.dim();
  let tf = t as f64;
  if n == 1 {
    return Ok((s, 0.0));
  }

  let var = s.diag().to_owned();
  let std = var.mapv(f64::sqrt);

  let mut corr_sum = 0.0;
  for i in 0..n {
    for j in 0..n {
      corr_sum += s[[i, j]] / (std[i] * std[j]);
    }
  }
  let r_bar = (corr_sum - n as f64) / (n * (n - 1)) as f64;

  let f = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      var[i]
    } else {
      r_bar * std[i] * std[j]
    }
  });

  let y = xm.mapv(|v| v * v);
  let help = xm.t().dot(&xm) / tf;
  let pi_mat = y.t().dot(&y) / tf - &(&help * &s * 2.0) + &s.mapv(|v| v * v);
  let pi_hat = pi_mat.sum();

  let term1 = xm.mapv(|v| v.powi(3)).t().dot(&xm) / tf;
  let theta = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      0.0
    } else {
      term1[[i, j]] - help[[i, i]] * s[[i, j]] - help[[i, j]] * var[i] + var[i] * s[[i, j]]
    }
  });

  let mut rho_off = 0.0;
  for i in 0..n {
    for j in 0..n {
      rho_off += std[j] / std[i] * theta[[i, j]];
    }
  }
  let rho_hat = pi_mat.diag().sum() + r_bar * rho_off;
  let gamma_hat = (&s - &f).mapv(|v| v * v).sum();

  let delta = if gamma_hat > 0.0 {
    ((pi_hat - rho_hat) / gamma_hat / tf).clamp(0.0, 1.0)
  } else {
    0.0
  };

  Ok((f * delta + s * (1.0 - delta), delta))
}

/// Clip negative eigenvalues so the matrix is positive semi-definite.
pub fn fix_nonpositive_semidefinite(cov: Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let m = DMatrix::from_fn(n, n, |i, j| 0.5 * (cov[[i, j]] + cov[[j, i]]));
  let scale = m.amax().max(f64::MIN_POSITIVE);
  let eig = SymmetricEigen::new(m);
  let min_eig = eig.eigenvalues.min();
  if min_eig >= -1e-12 * scale {
    return cov;
  }

  warn!(min_eigenvalue = min_eig, "covariance matrix is not PSD, clipping eigenvalues");
  let mut eig = eig;
  eig.eigenvalues.iter_mut().for_each(|l| *l = l.max(0.0));
  let fixed = eig.recompose();
  Array2::from_shape_fn((n, n), |(i, j)| 0.5 * (fixed[(i, j)] + fixed[(j, i)]))
}

/// Correlation matrix implied by a covariance matrix.
pub fn cov_to_corr(cov: &CovarianceMatrix) -> DMatrix<f64> {
  let m = cov.matrix();
  let sd = cov.volatilities();
  DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| {
    if i == j {
      1.0
    } else if sd[i] > 1e-15 && sd[j] > 1e-15 {
      (m[(i, j)] / (sd[i] * sd[j])).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;
  use crate::assets::AssetSet;

  fn random_returns(t: usize, n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.01).unwrap();
    let common = (0..t).map(|_| normal.sample(&mut rng)).collect::<Vec<_>>();
    Array2::from_shape_fn((t, n), |(i, j)| {
      common[i] * (0.5 + 0.1 * j as f64) + normal.sample(&mut rng)
    })
  }

  #[test]
  fn sample_cov_matches_hand_computation() {
    let r = array![[0.01, 0.02], [0.03, 0.00], [-0.01, 0.01]];
    let cov = sample_cov(&r, 1.0).unwrap();
    // var(x) with mean 0.01: (0 + 0.0004 + 0.0004)/2
    assert_abs_diff_eq!(cov[[0, 0]], 0.0004, epsilon = 1e-15);
    // cov(x,y): means 0.01, 0.01 -> (0*0.01 + 0.02*-0.01 + -0.02*0)/2
    assert_abs_diff_eq!(cov[[0, 1]], -0.0001, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[[1, 0]], cov[[0, 1]], epsilon = 1e-18);

    let annual = sample_cov(&r, 252.0).unwrap();
    assert_abs_diff_eq!(annual[[0, 0]], 0.0004 * 252.0, epsilon = 1e-12);
  }

  #[test]
  fn ledoit_wolf_shrinks_toward_target() {
    let r = random_returns(40, 10, 7);
    let sample = centered(&r).t().dot(&centered(&r)) / r.nrows() as f64;

    for target in [ShrinkageTarget::ConstantVariance, ShrinkageTarget::ConstantCorrelation] {
      let (lw, delta) = ledoit_wolf(&r, target, 1.0).unwrap();
      assert!((0.0..=1.0).contains(&delta), "{target:?} gave {delta}");
      for i in 0..10 {
        for j in 0..10 {
          assert_abs_diff_eq!(lw[[i, j]], lw[[j, i]], epsilon = 1e-15);
        }
      }
      // Off-diagonal mass never grows under shrinkage toward a diagonal target.
      if target == ShrinkageTarget::ConstantVariance {
        let off = |m: &Array2<f64>| {
          let mut acc = 0.0;
          for i in 0..10 {
            for j in 0..10 {
              if i != j {
                acc += m[[i, j]].abs();
              }
            }
          }
          acc
        };
        assert!(off(&lw) <= off(&sample) + 1e-15);
        assert_abs_diff_eq!(lw.diag().sum(), sample.diag().sum(), epsilon = 1e-12);
      }
    }
  }

  #[test]
  fn shrunk_covariance_interpolates() {
    let r = random_returns(30, 4, 11);
    let s = sample_cov(&r, 1.0).unwrap();
    let same = shrunk_covariance(&r, 0.0, 1.0).unwrap();
    assert_abs_diff_eq!(same[[0, 1]], s[[0, 1]], epsilon = 1e-15);

    let full = shrunk_covariance(&r, 1.0, 1.0).unwrap();
    assert_abs_diff_eq!(full[[0, 1]], 0.0, epsilon = 1e-15);
    assert_abs_diff_eq!(full[[2, 2]], s.diag().sum() / 4.0, epsilon = 1e-15);
    assert!(shrunk_covariance(&r, 1.5, 1.0).is_err());
  }

  #[test]
  fn non_psd_matrix_is_repaired() {
    let bad = array![[1.0, 2.0], [2.0, 1.0]];
    let fixed = fix_nonpositive_semidefinite(bad);
    let m = DMatrix::from_fn(2, 2, |i, j| fixed[[i, j]]);
    let eig = SymmetricEigen::new(m);
    assert!(eig.eigenvalues.min() > -1e-12);

    let good = array![[0.04, 0.01], [0.01, 0.09]];
    assert_eq!(fix_nonpositive_semidefinite(good.clone()), good);
  }

  #[test]
  fn correlation_has_unit_diagonal() {
    let set = AssetSet::new(["A", "B"]).unwrap();
    let cov = CovarianceMatrix::from_rows(set, &[vec![0.04, 0.03], vec![0.03, 0.09]]).unwrap();
    let corr = cov_to_corr(&cov);
    assert_eq!(corr[(0, 0)], 1.0);
    assert_abs_diff_eq!(corr[(0, 1)], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn too_few_returns_is_an_error() {
    let r = array![[0.01, 0.02]];
    assert!(matches!(
      sample_cov(&r, 252.0),
      Err(PortfolioError::InsufficientData { observations: 1, required: 2 })
    ));
  }
}
