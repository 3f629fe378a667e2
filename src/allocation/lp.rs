//! # Integer Rounding
//!
//! $$
//! \min_{x\in\mathbb Z_{\ge0}^n}\ \sum_i\lvert T_i-x_ip_i\rvert + \Big(B-\sum_i x_ip_i\Big)
//! \quad\text{s.t.}\quad \sum_i x_ip_i\le B
//! $$
//!
//! With `f_i = ⌊T_i/p_i⌋` and remainder `r_i = T_i - f_i p_i`, rounding asset
//! `i` up lowers the objective by `2 r_i` and costs `p_i` of the leftover.
//! Buying past `f_i + 1` never helps and going below `f_i` always hurts, so
//! the program is a 0/1 knapsack over round-up choices.
//!
use tracing::trace;

use crate::error::PortfolioError;
use crate::error::Result;

struct Item {
  index: usize,
  value: f64,
  cost: f64,
}

struct BranchAndBound<'a> {
  items: &'a [Item],
  take: Vec<bool>,
  best: Vec<bool>,
  best_value: f64,
  nodes: usize,
  max_nodes: usize,
}

impl BranchAndBound<'_> {
  /// Fractional relaxation of the remaining items.
  fn bound(&self, k: usize, mut capacity: f64, mut value: f64) -> f64 {
    for item in &self.items[k..] {
      if item.cost <= capacity {
        capacity -= item.cost;
        value += item.value;
      } else {
        return value + item.value * capacity / item.cost;
      }
    }
    value
  }

  fn search(&mut self, k: usize, capacity: f64, value: f64) -> Result<()> {
    self.nodes += 1;
    if self.nodes > self.max_nodes {
      return Err(PortfolioError::SolverTimeout {
        solver: "branch-and-bound",
        iterations: self.max_nodes,
      });
    }
    if value > self.best_value {
      self.best_value = value;
      self.best.clone_from(&self.take);
    }
    if k == self.items.len() || self.bound(k, capacity, value) <= self.best_value + 1e-12 {
      return Ok(());
    }

    let items = self.items;
    let item = &items[k];
    if item.cost <= capacity {
      self.take[k] = true;
      self.search(k + 1, capacity - item.cost, value + item.value)?;
      self.take[k] = false;
    }
    self.search(k + 1, capacity, value)
  }
}

/// Whole-share counts closest to the dollar `targets` within `budget`.
pub(crate) fn lp_round(
  targets: &[f64],
  prices: &[f64],
  budget: f64,
  max_nodes: usize,
) -> Result<Vec<i64>> {
  let mut shares: Vec<i64> = targets
    .iter()
    .zip(prices)
    .map(|(t, p)| (t / p).floor().max(0.0) as i64)
    .collect();
  let spent: f64 = shares.iter().zip(prices).map(|(&x, p)| x as f64 * p).sum();
  let tol = 1e-12 * budget.max(1.0);
  let capacity = (budget - spent).max(0.0) + tol;

  let mut items: Vec<Item> = shares
    .iter()
    .zip(targets.iter().zip(prices))
    .enumerate()
    .map(|(i, (&x, (t, &p)))| Item {
      index: i,
      value: t - x as f64 * p,
      cost: p,
    })
    .filter(|it| it.value > 0.0 && it.cost <= capacity)
    .collect();
  items.sort_by(|a, b| (b.value / b.cost).total_cmp(&(a.value / a.cost)));

  let mut bb = BranchAndBound {
    items: &items,
    take: vec![false; items.len()],
    best: vec![false; items.len()],
    best_value: 0.0,
    nodes: 0,
    max_nodes,
  };
  bb.search(0, capacity, 0.0)?;
  trace!(nodes = bb.nodes, candidates = items.len(), "rounding search finished");

  for (item, &up) in items.iter().zip(bb.best.iter()) {
    if up {
      shares[item.index] += 1;
    }
  }
  Ok(shares)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn objective(targets: &[f64], prices: &[f64], budget: f64, x: &[i64]) -> f64 {
    let spent: f64 = x.iter().zip(prices).map(|(&x, p)| x as f64 * p).sum();
    let dev: f64 = targets
      .iter()
      .zip(prices.iter().zip(x))
      .map(|(t, (p, &x))| (t - x as f64 * p).abs())
      .sum();
    dev + budget - spent
  }

  #[test]
  fn matches_exhaustive_search() {
    let prices = [37.0, 52.5, 11.2, 90.0, 23.3];
    let budget = 1000.0;
    let weights = [0.3, 0.25, 0.1, 0.2, 0.15];
    let targets: Vec<f64> = weights.iter().map(|w| w * budget).collect();
    let x = lp_round(&targets, &prices, budget, 10_000).unwrap();

    let spent: f64 = x.iter().zip(&prices).map(|(&x, p)| x as f64 * p).sum();
    assert!(spent <= budget + 1e-9);

    let floors: Vec<i64> = targets.iter().zip(&prices).map(|(t, p)| (t / p).floor() as i64).collect();
    let mut best = f64::INFINITY;
    for mask in 0..(1u32 << prices.len()) {
      let cand: Vec<i64> = floors
        .iter()
        .enumerate()
        .map(|(i, f)| f + ((mask >> i) & 1) as i64)
        .collect();
      let cost: f64 = cand.iter().zip(&prices).map(|(&x, p)| x as f64 * p).sum();
      if cost <= budget {
        best = best.min(objective(&targets, &prices, budget, &cand));
      }
    }
    assert!((objective(&targets, &prices, budget, &x) - best).abs() < 1e-9);
  }

  #[test]
  fn unaffordable_asset_gets_no_shares() {
    let x = lp_round(&[100000.0], &[150000.0], 100000.0, 100).unwrap();
    assert_eq!(x, vec![0]);
  }

  #[test]
  fn node_limit_times_out() {
    let prices = [10.0, 11.0, 12.0, 13.0];
    let targets = [25.0, 25.0, 25.0, 25.0];
    let err = lp_round(&targets, &prices, 100.0, 1).unwrap_err();
    assert!(matches!(err, PortfolioError::SolverTimeout { solver: "branch-and-bound", .. }));
  }
}
