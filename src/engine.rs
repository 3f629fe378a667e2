//! # Portfolio Engine
//!
//! $$
//! \text{prices}\ \to\ (\hat\mu,\hat\Sigma)\ \to\ w^\*\ \to\ x\in\mathbb Z^n
//! $$
//!
//! Runs a plan of named efficient portfolios over one shared estimate.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::allocation::Allocation;
use crate::allocation::AllocationConfig;
use crate::allocation::DiscreteAllocation;
use crate::assets::AssetVector;
use crate::assets::CovarianceMatrix;
use crate::assets::ReturnVector;
use crate::assets::WeightVector;
use crate::data::PriceTable;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::estimators::Estimator;
use crate::estimators::EstimatorConfig;
use crate::estimators::RiskModel;
use crate::estimators::ShrinkageTarget;
use crate::optimizer::Constraints;
use crate::optimizer::EfficientFrontier;
use crate::optimizer::FrontierPoint;
use crate::optimizer::Objective;
use crate::optimizer::PortfolioPerformance;
use crate::optimizer::SectorMapper;
use crate::optimizer::WeightBounds;
use crate::optimizer::CLEAN_CUTOFF;
use crate::optimizer::RISK_FREE_RATE;
use crate::solvers::SolverConfig;

fn yes() -> bool {
  true
}

/// One named portfolio in a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
  pub name: String,
  pub objective: Objective,
  /// L2 regularisation weight.
  #[serde(default)]
  pub gamma: f64,
  /// Defaults to long-only.
  #[serde(default)]
  pub bounds: Option<WeightBounds>,
  #[serde(default)]
  pub market_neutral: bool,
  /// Apply the configured sector bounds.
  #[serde(default)]
  pub use_sectors: bool,
  /// Pass the expected returns to the optimizer.
  #[serde(default = "yes")]
  pub use_returns: bool,
  /// Convert the weights into whole shares.
  #[serde(default)]
  pub allocate: bool,
  /// Overrides the configured allocation short ratio.
  #[serde(default)]
  pub short_ratio: Option<f64>,
  /// Overrides the configured covariance estimator.
  #[serde(default)]
  pub risk_model: Option<RiskModel>,
}

impl RunSpec {
  pub fn new(name: impl Into<String>, objective: Objective) -> Self {
    Self {
      name: name.into(),
      objective,
      gamma: 0.0,
      bounds: None,
      market_neutral: false,
      use_sectors: false,
      use_returns: true,
      allocate: false,
      short_ratio: None,
      risk_model: None,
    }
  }
}

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub estimator: EstimatorConfig,
  pub solver: SolverConfig,
  /// Used for Sharpe ratios in reports.
  pub risk_free_rate: f64,
  /// Weight cutoff for cleaning.
  pub cutoff: f64,
  pub allocation: AllocationConfig,
  pub sectors: Option<SectorMapper>,
  /// Sampled frontier points; zero disables sampling.
  pub frontier_points: usize,
  pub runs: Vec<RunSpec>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      estimator: EstimatorConfig::default(),
      solver: SolverConfig::default(),
      risk_free_rate: RISK_FREE_RATE,
      cutoff: CLEAN_CUTOFF,
      allocation: AllocationConfig::default(),
      sectors: None,
      frontier_points: 30,
      runs: default_plan(),
    }
  }
}

impl EngineConfig {
  pub fn from_json_str(s: &str) -> Result<Self> {
    Ok(serde_json::from_str(s)?)
  }

  pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
    let text = fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }
}

/// Max Sharpe, two volatility targets with and without L2 regularisation, a
/// shrunk-covariance minimum-variance book with shorts and a market-neutral
/// return target.
pub fn default_plan() -> Vec<RunSpec> {
  let shorting = Some(WeightBounds::new(-1.0, 1.0));
  vec![
    RunSpec {
      allocate: true,
      ..RunSpec::new("max_sharpe", Objective::default())
    },
    RunSpec::new("target_vol_15", Objective::TargetVolatility { target: 0.15 }),
    RunSpec::new("target_vol_20", Objective::TargetVolatility { target: 0.20 }),
    RunSpec {
      gamma: 1.0,
      ..RunSpec::new("target_vol_20_l2", Objective::TargetVolatility { target: 0.20 })
    },
    RunSpec {
      gamma: 1.0,
      ..RunSpec::new("target_vol_15_l2", Objective::TargetVolatility { target: 0.15 })
    },
    RunSpec {
      bounds: shorting.clone(),
      use_returns: false,
      allocate: true,
      short_ratio: Some(0.1),
      risk_model: Some(RiskModel::LedoitWolf {
        target: ShrinkageTarget::ConstantVariance,
      }),
      ..RunSpec::new("min_vol_ledoit_wolf", Objective::MinVolatility)
    },
    RunSpec {
      gamma: 1.0,
      bounds: shorting,
      market_neutral: true,
      ..RunSpec::new("market_neutral_15", Objective::TargetReturn { target: 0.15 })
    },
  ]
}

/// Outcome of one [`RunSpec`].
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
  pub name: String,
  pub objective: Objective,
  pub weights: WeightVector,
  pub performance: PortfolioPerformance,
  pub allocation: Option<Allocation>,
}

/// Shared estimates and every run of a plan.
#[derive(Clone, Debug)]
pub struct EngineReport {
  pub expected_returns: ReturnVector,
  pub covariance: CovarianceMatrix,
  pub runs: Vec<RunResult>,
  pub frontier: Vec<FrontierPoint>,
}

/// Single entry point for the estimate, optimise and allocate pipeline.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: EngineConfig,
}

impl PortfolioEngine {
  pub fn new(config: EngineConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn estimator(&self) -> Estimator {
    Estimator::new(self.config.estimator.clone())
  }

  /// Estimate once and execute every configured run in order.
  pub fn run(&self, prices: &PriceTable) -> Result<EngineReport> {
    let estimator = self.estimator();
    let (mu, cov) = estimator.estimate(prices)?;
    let latest = prices.latest_prices()?;

    let runs = self
      .config
      .runs
      .iter()
      .map(|spec| self.run_spec(prices, &estimator, &mu, &cov, &latest, spec))
      .collect::<Result<Vec<_>>>()?;

    let frontier = if self.config.frontier_points > 0 {
      self
        .sample_frontier(&mu, &cov)
        .unwrap_or_else(|e| {
          warn!(error = %e, "efficient frontier sampling failed");
          Vec::new()
        })
    } else {
      Vec::new()
    };

    Ok(EngineReport {
      expected_returns: mu,
      covariance: cov,
      runs,
      frontier,
    })
  }

  /// Long-only frontier used for plotting.
  fn sample_frontier(&self, mu: &ReturnVector, cov: &CovarianceMatrix) -> Result<Vec<FrontierPoint>> {
    EfficientFrontier::new(Some(mu.clone()), cov.clone(), Constraints::long_only())?
      .with_solver(self.config.solver.clone())
      .efficient_frontier_points(self.config.frontier_points)
  }

  /// Constraint set for `spec` over the universe of `prices`.
  pub fn constraints_for(&self, spec: &RunSpec, prices: &PriceTable) -> Result<Constraints> {
    let mut constraints = Constraints::long_only()
      .with_bounds(spec.bounds.clone().unwrap_or_default())
      .with_market_neutral(spec.market_neutral);
    if spec.use_sectors {
      let sectors = self.config.sectors.as_ref().ok_or_else(|| {
        PortfolioError::invalid(format!("run {} uses sectors but none are configured", spec.name))
      })?;
      constraints = constraints.with_sectors(sectors, prices.assets());
    }
    Ok(constraints)
  }

  #[instrument(skip_all, fields(run = %spec.name))]
  fn run_spec(
    &self,
    prices: &PriceTable,
    estimator: &Estimator,
    mu: &ReturnVector,
    cov: &CovarianceMatrix,
    latest: &AssetVector,
    spec: &RunSpec,
  ) -> Result<RunResult> {
    let cov = match &spec.risk_model {
      Some(model) => estimator.with_risk_model(*model).risk_matrix(prices)?,
      None => cov.clone(),
    };
    let mu = spec.use_returns.then(|| mu.clone());

    let ef = EfficientFrontier::new(mu, cov, self.constraints_for(spec, prices)?)?
      .with_gamma(spec.gamma)
      .with_solver(self.config.solver.clone());
    let raw = ef.optimize(&spec.objective)?;
    let weights = ef.clean_weights(&raw, self.config.cutoff)?;
    let performance = ef.portfolio_performance(&weights, self.config.risk_free_rate)?;

    let allocation = if spec.allocate {
      let config = AllocationConfig {
        short_ratio: spec.short_ratio.unwrap_or(self.config.allocation.short_ratio),
        ..self.config.allocation.clone()
      };
      Some(DiscreteAllocation::new(&weights, latest, config)?.allocate()?)
    } else {
      None
    };

    let zeroed = weights.iter().filter(|(_, w)| *w == 0.0).count();
    info!(
      objective = %spec.objective,
      volatility = performance.volatility,
      expected_return = ?performance.expected_return,
      sharpe = ?performance.sharpe,
      zero_weights = zeroed,
      "run complete"
    );

    Ok(RunResult {
      name: spec.name.clone(),
      objective: spec.objective,
      weights,
      performance,
      allocation,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::Duration;
  use chrono::NaiveDate;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;
  use crate::assets::AssetSet;
  use crate::solvers::SolverKind;

  /// Geometric random walks with distinct drifts and volatilities.
  fn synthetic_prices(n_assets: usize, n_days: usize, seed: u64) -> PriceTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let shock = Normal::new(0.0, 1.0).unwrap();
    let mut prices = Array2::zeros((n_days, n_assets));
    for j in 0..n_assets {
      let drift = 0.0002 + 0.0003 * j as f64;
      let vol = 0.008 + 0.003 * j as f64;
      let mut p = 20.0 + 15.0 * j as f64;
      for i in 0..n_days {
        prices[[i, j]] = p;
        p *= 1.0 + drift + vol * shock.sample(&mut rng);
      }
    }
    let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    let dates = (0..n_days).map(|i| start + Duration::days(i as i64)).collect();
    let assets = AssetSet::new((0..n_assets).map(|j| format!("S{j}"))).unwrap();
    PriceTable::new(dates, assets, prices).unwrap()
  }

  /// One market factor with spread betas and drifts over a wide universe.
  fn factor_prices(n_assets: usize, n_days: usize, seed: u64) -> PriceTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let shock = Normal::new(0.0, 1.0).unwrap();
    let mut prices = Array2::zeros((n_days, n_assets));
    let mut p: Vec<f64> = (0..n_assets).map(|j| 15.0 + (j % 17) as f64 * 6.0).collect();
    for i in 0..n_days {
      let market = 0.0003 + 0.009 * shock.sample(&mut rng);
      for j in 0..n_assets {
        prices[[i, j]] = p[j];
        let beta = 0.4 + 0.1 * (j % 9) as f64;
        let alpha = -0.0002 + 0.00001 * j as f64;
        let idio = (0.006 + 0.0001 * (j % 13) as f64) * shock.sample(&mut rng);
        p[j] *= 1.0 + alpha + beta * market + idio;
      }
    }
    let start = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let dates = (0..n_days).map(|i| start + Duration::days(i as i64)).collect();
    let assets = AssetSet::new((0..n_assets).map(|j| format!("A{j:02}"))).unwrap();
    PriceTable::new(dates, assets, prices).unwrap()
  }

  #[test]
  fn default_plan_runs_on_a_wide_universe_with_either_solver() {
    let prices = factor_prices(60, 750, 5);
    for kind in [SolverKind::ActiveSet, SolverKind::InteriorPoint] {
      let config = EngineConfig {
        solver: SolverConfig::with_kind(kind),
        ..Default::default()
      };
      let report = PortfolioEngine::new(config).run(&prices).unwrap();
      assert_eq!(report.runs.len(), default_plan().len());
      if kind == SolverKind::ActiveSet {
        assert_eq!(report.frontier.len(), 30);
      } else {
        assert!(!report.frontier.is_empty());
      }
      for pair in report.frontier.windows(2) {
        assert!(pair[1].expected_return >= pair[0].expected_return - 1e-9);
      }
      for run in &report.runs {
        let net = if run.name.starts_with("market_neutral") { 0.0 } else { 1.0 };
        assert_abs_diff_eq!(run.weights.sum(), net, epsilon = 1e-6);
      }
    }
  }

  #[test]
  fn default_plan_mirrors_the_run_sequence() {
    let plan = default_plan();
    assert_eq!(plan.len(), 7);
    assert!(plan[0].allocate);
    assert!(plan.iter().all(|r| !r.use_sectors));
    let gmv = &plan[5];
    assert!(!gmv.use_returns);
    assert_eq!(gmv.short_ratio, Some(0.1));
  }

  #[test]
  fn config_round_trips_through_json() {
    let json = r#"{
      "risk_free_rate": 0.03,
      "allocation": { "budget": 50000 },
      "runs": [
        { "name": "gmv", "objective": { "kind": "min_volatility" }, "allocate": true },
        { "name": "mn", "objective": { "kind": "target_return", "target": 0.1 },
          "market_neutral": true, "gamma": 1.0,
          "bounds": { "uniform": { "lower": -1.0, "upper": 1.0 } } }
      ]
    }"#;
    let cfg = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.risk_free_rate, 0.03);
    assert_eq!(cfg.allocation.budget, 50000.0);
    assert_eq!(cfg.allocation.short_ratio, 0.0);
    assert_eq!(cfg.runs.len(), 2);
    assert!(cfg.runs[0].use_returns);
    assert_eq!(cfg.runs[1].bounds, Some(WeightBounds::new(-1.0, 1.0)));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
    let back = EngineConfig::from_json_path(&path).unwrap();
    assert_eq!(back.runs, cfg.runs);
  }

  #[test]
  fn runs_a_small_plan_end_to_end() {
    let prices = synthetic_prices(5, 300, 11);
    let config = EngineConfig {
      frontier_points: 5,
      runs: vec![
        RunSpec {
          allocate: true,
          ..RunSpec::new("gmv", Objective::MinVolatility)
        },
        RunSpec {
          bounds: Some(WeightBounds::new(-1.0, 1.0)),
          use_returns: false,
          allocate: true,
          short_ratio: Some(0.1),
          risk_model: Some(RiskModel::LedoitWolf {
            target: ShrinkageTarget::ConstantVariance,
          }),
          ..RunSpec::new("gmv_lw", Objective::MinVolatility)
        },
      ],
      ..Default::default()
    };
    let report = PortfolioEngine::new(config).run(&prices).unwrap();
    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.frontier.len(), 5);

    for run in &report.runs {
      assert_abs_diff_eq!(run.weights.sum(), 1.0, epsilon = 1e-6);
      let alloc = run.allocation.as_ref().unwrap();
      let latest = prices.latest_prices().unwrap();
      let value: f64 = alloc
        .shares()
        .iter()
        .map(|(id, x)| *x as f64 * latest.get(id).unwrap())
        .sum();
      assert_abs_diff_eq!(value + alloc.leftover(), 100_000.0, epsilon = 1e-6);
    }
    assert!(report.runs[0].performance.expected_return.is_some());
    assert!(report.runs[1].performance.expected_return.is_none());
  }

  #[test]
  fn sector_run_without_sectors_is_rejected() {
    let prices = synthetic_prices(3, 50, 3);
    let config = EngineConfig {
      frontier_points: 0,
      runs: vec![RunSpec {
        use_sectors: true,
        ..RunSpec::new("s", Objective::MinVolatility)
      }],
      ..Default::default()
    };
    assert!(matches!(
      PortfolioEngine::new(config).run(&prices),
      Err(PortfolioError::InvalidInput(_))
    ));
  }
}
