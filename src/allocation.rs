//! # Discrete Allocation
//!
//! $$
//! \sum_i x_i p_i + \text{leftover} = B,\qquad x_i\in\mathbb Z
//! $$
//!
//! Turns continuous weights into whole shares for a cash budget. Long and
//! short books are rounded separately against their own budgets.

mod greedy;
mod lp;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::assets::AssetVector;
use crate::assets::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// Rounding strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
  /// Exact integer program, solved by branch and bound.
  #[default]
  Lp,
  /// Floor then buy the most underweight affordable asset.
  Greedy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
  /// Cash to allocate.
  pub budget: f64,
  /// Short exposure as a fraction of the budget.
  pub short_ratio: f64,
  /// Spend short proceeds on the long book.
  pub reinvest: bool,
  pub method: AllocationMethod,
  /// Branch-and-bound node limit for [`AllocationMethod::Lp`].
  pub max_nodes: usize,
}

impl Default for AllocationConfig {
  fn default() -> Self {
    Self {
      budget: 100_000.0,
      short_ratio: 0.0,
      reinvest: false,
      method: AllocationMethod::Lp,
      max_nodes: 1_000_000,
    }
  }
}

/// Whole-share positions plus uninvested cash.
///
/// Short positions carry negative share counts; `leftover` is the budget
/// minus the signed market value of all positions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Allocation {
  shares: Vec<(String, i64)>,
  leftover: f64,
  budget: f64,
  cheapest: f64,
}

impl Allocation {
  /// Non-zero positions in asset order.
  pub fn shares(&self) -> &[(String, i64)] {
    &self.shares
  }

  pub fn get(&self, id: &str) -> i64 {
    self
      .shares
      .iter()
      .find(|(a, _)| a == id)
      .map_or(0, |(_, x)| *x)
  }

  pub fn leftover(&self) -> f64 {
    self.leftover
  }

  pub fn budget(&self) -> f64 {
    self.budget
  }

  pub fn is_empty(&self) -> bool {
    self.shares.is_empty()
  }

  /// Fail with `BudgetTooSmall` when not a single share could be bought.
  pub fn ensure_filled(self) -> Result<Self> {
    if self.is_empty() {
      return Err(PortfolioError::BudgetTooSmall {
        budget: self.budget,
        cheapest: self.cheapest,
      });
    }
    Ok(self)
  }
}

/// Allocator bound to one weight vector and one set of prices.
#[derive(Clone, Debug)]
pub struct DiscreteAllocation {
  weights: WeightVector,
  prices: AssetVector,
  config: AllocationConfig,
}

impl DiscreteAllocation {
  pub fn new(
    weights: &WeightVector,
    latest_prices: &AssetVector,
    config: AllocationConfig,
  ) -> Result<Self> {
    weights.assets().ensure_same(latest_prices.assets())?;
    if !(config.budget > 0.0) || !config.budget.is_finite() {
      return Err(PortfolioError::invalid("budget must be positive"));
    }
    if !(config.short_ratio >= 0.0) || !config.short_ratio.is_finite() {
      return Err(PortfolioError::invalid("short ratio must be non-negative"));
    }
    if weights.values().iter().any(|w| !w.is_finite()) {
      return Err(PortfolioError::invalid("weights must be finite"));
    }
    if weights.values().iter().all(|w| *w == 0.0) {
      return Err(PortfolioError::invalid("all weights are zero"));
    }
    for ((id, w), (_, p)) in weights.iter().zip(latest_prices.iter()) {
      if w != 0.0 && (!(p > 0.0) || !p.is_finite()) {
        return Err(PortfolioError::invalid(format!("price of {id} must be positive")));
      }
    }
    if config.short_ratio == 0.0 && weights.min() < 0.0 {
      return Err(PortfolioError::invalid(
        "negative weights require a positive short ratio",
      ));
    }

    Ok(Self {
      weights: weights.clone(),
      prices: latest_prices.clone(),
      config,
    })
  }

  pub fn config(&self) -> &AllocationConfig {
    &self.config
  }

  /// Allocate with the configured method.
  pub fn allocate(&self) -> Result<Allocation> {
    match self.config.method {
      AllocationMethod::Lp => self.lp_portfolio(),
      AllocationMethod::Greedy => self.greedy_portfolio(),
    }
  }

  /// Minimise total dollar deviation plus leftover over integer shares.
  pub fn lp_portfolio(&self) -> Result<Allocation> {
    let max_nodes = self.config.max_nodes;
    self.round_books(|w, p, budget| {
      let targets: Vec<f64> = w.iter().map(|wi| wi * budget).collect();
      lp::lp_round(&targets, p, budget, max_nodes)
    })
  }

  pub fn greedy_portfolio(&self) -> Result<Allocation> {
    self.round_books(|w, p, budget| Ok(greedy::greedy_round(w, p, budget)))
  }

  fn round_books<F>(&self, round: F) -> Result<Allocation>
  where
    F: Fn(&[f64], &[f64], f64) -> Result<Vec<i64>>,
  {
    let budget = self.config.budget;
    let prices = self.prices.values();
    let weights = self.weights.values();

    let longs: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    let shorts: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] < 0.0).collect();
    let long_budget = if !shorts.is_empty() && self.config.reinvest {
      budget * (1.0 + self.config.short_ratio)
    } else {
      budget
    };
    let short_budget = budget * self.config.short_ratio;

    let mut shares = vec![0i64; weights.len()];
    for (book, book_budget, sign) in [(&longs, long_budget, 1i64), (&shorts, short_budget, -1i64)] {
      if book.is_empty() {
        continue;
      }
      let total: f64 = book.iter().map(|&i| weights[i].abs()).sum();
      let w: Vec<f64> = book.iter().map(|&i| weights[i].abs() / total).collect();
      let p: Vec<f64> = book.iter().map(|&i| prices[i]).collect();
      let x = round(&w, &p, book_budget)?;
      for (&i, xi) in book.iter().zip(x) {
        shares[i] = sign * xi;
      }
    }

    let value: f64 = shares.iter().zip(prices.iter()).map(|(&x, p)| x as f64 * p).sum();
    let cheapest = longs
      .iter()
      .chain(shorts.iter())
      .map(|&i| prices[i])
      .fold(f64::INFINITY, f64::min);

    let allocation = Allocation {
      shares: self
        .weights
        .assets()
        .iter()
        .zip(shares.iter())
        .filter(|(_, &x)| x != 0)
        .map(|(id, &x)| (id.to_string(), x))
        .collect(),
      leftover: budget - value,
      budget,
      cheapest,
    };

    if allocation.is_empty() {
      warn!(budget, cheapest, "budget too small to buy a single share");
    } else {
      debug!(
        positions = allocation.shares.len(),
        leftover = allocation.leftover,
        "discrete allocation"
      );
    }
    Ok(allocation)
  }
}

/// One-shot LP allocation.
pub fn allocate(
  weights: &WeightVector,
  latest_prices: &AssetVector,
  budget: f64,
  short_ratio: f64,
) -> Result<Allocation> {
  let config = AllocationConfig {
    budget,
    short_ratio,
    ..AllocationConfig::default()
  };
  DiscreteAllocation::new(weights, latest_prices, config)?.lp_portfolio()
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use tracing_test::traced_test;

  use super::*;
  use crate::assets::AssetSet;

  fn vectors(weights: &[f64], prices: &[f64]) -> (WeightVector, AssetVector) {
    let assets = AssetSet::new((0..weights.len()).map(|i| format!("T{i}"))).unwrap();
    (
      WeightVector::new(assets.clone(), weights.to_vec()).unwrap(),
      AssetVector::new(assets, prices.to_vec()).unwrap(),
    )
  }

  fn market_value(a: &Allocation, prices: &AssetVector) -> f64 {
    a.shares()
      .iter()
      .map(|(id, x)| *x as f64 * prices.get(id).unwrap())
      .sum()
  }

  #[test]
  #[traced_test]
  fn budget_below_single_price_leaves_cash_untouched() {
    let (w, p) = vectors(&[1.0], &[150000.0]);
    let a = allocate(&w, &p, 100000.0, 0.0).unwrap();
    assert!(a.is_empty());
    assert_eq!(a.leftover(), 100000.0);
    assert!(logs_contain("budget too small"));
    assert!(matches!(
      a.ensure_filled(),
      Err(PortfolioError::BudgetTooSmall { cheapest, .. }) if cheapest == 150000.0
    ));
  }

  #[test]
  fn cash_accounting_holds_for_random_books() {
    let mut rng = StdRng::seed_from_u64(42);
    for method in [AllocationMethod::Lp, AllocationMethod::Greedy] {
      for _ in 0..20 {
        let n = rng.gen_range(2..12);
        let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let prices: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..900.0)).collect();
        let (w, p) = vectors(&weights, &prices);

        let config = AllocationConfig {
          budget: 25_000.0,
          method,
          ..Default::default()
        };
        let a = DiscreteAllocation::new(&w, &p, config).unwrap().allocate().unwrap();
        assert_abs_diff_eq!(market_value(&a, &p) + a.leftover(), 25_000.0, epsilon = 1e-6);
        assert!(a.leftover() >= -1e-6);
        assert!(a.shares().iter().all(|(_, x)| *x > 0));
      }
    }
  }

  #[test]
  fn lp_tracks_targets_closely() {
    let (w, p) = vectors(&[0.5, 0.3, 0.2], &[10.0, 20.0, 50.0]);
    let a = allocate(&w, &p, 1000.0, 0.0).unwrap();
    assert_eq!(a.get("T0"), 50);
    assert_eq!(a.get("T1"), 15);
    assert_eq!(a.get("T2"), 4);
    assert_abs_diff_eq!(a.leftover(), 0.0, epsilon = 1e-9);
  }

  #[test]
  fn short_book_gets_negative_shares() {
    let (w, p) = vectors(&[0.7, 0.5, -0.2], &[10.0, 25.0, 40.0]);
    let config = AllocationConfig {
      budget: 10_000.0,
      short_ratio: 0.2,
      ..Default::default()
    };
    let a = DiscreteAllocation::new(&w, &p, config.clone()).unwrap().lp_portfolio().unwrap();
    assert_eq!(a.get("T2"), -50);
    assert!(a.get("T0") > 0 && a.get("T1") > 0);
    assert_abs_diff_eq!(market_value(&a, &p) + a.leftover(), 10_000.0, epsilon = 1e-6);
    assert!(a.leftover() >= 0.0);

    let reinvested = DiscreteAllocation::new(
      &w,
      &p,
      AllocationConfig {
        reinvest: true,
        ..config
      },
    )
    .unwrap()
    .lp_portfolio()
    .unwrap();
    assert!(reinvested.get("T0") > a.get("T0"));
    assert!(reinvested.leftover() >= -0.2 * 10_000.0 - 1e-6);
  }

  #[test]
  fn rejects_shorts_without_short_ratio() {
    let (w, p) = vectors(&[1.2, -0.2], &[10.0, 10.0]);
    assert!(matches!(allocate(&w, &p, 1000.0, 0.0), Err(PortfolioError::InvalidInput(_))));
    assert!(allocate(&w, &p, -5.0, 0.1).is_err());
  }

  #[test]
  fn zero_weights_are_dropped() {
    let (w, p) = vectors(&[1.0, 0.0], &[10.0, 1.0]);
    let a = allocate(&w, &p, 95.0, 0.0).unwrap();
    assert_eq!(a.shares(), &[("T0".to_string(), 9)]);
    assert_abs_diff_eq!(a.leftover(), 5.0, epsilon = 1e-12);
  }
}
