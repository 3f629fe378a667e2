//! # Constraints
//!
//! $$
//! \ell_i\le w_i\le u_i,\qquad L_g\le\sum_{i\in g}w_i\le U_g,\qquad \mathbf 1^\top w = e
//! $$
//!
use std::collections::BTreeMap;

use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::assets::AssetSet;
use crate::error::PortfolioError;
use crate::error::Result;

/// Per-asset weight bounds. A `None` side is unbounded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightBounds {
  /// The same pair for every asset.
  Uniform {
    lower: Option<f64>,
    upper: Option<f64>,
  },
  /// One pair per asset, in asset order.
  PerAsset(Vec<(Option<f64>, Option<f64>)>),
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self::long_only()
  }
}

impl WeightBounds {
  pub fn new(lower: f64, upper: f64) -> Self {
    Self::Uniform {
      lower: Some(lower),
      upper: Some(upper),
    }
  }

  /// `0 <= w_i <= 1`
  pub fn long_only() -> Self {
    Self::new(0.0, 1.0)
  }

  pub fn unbounded() -> Self {
    Self::Uniform {
      lower: None,
      upper: None,
    }
  }

  /// Numeric `(lower, upper)` per asset with infinities for missing sides.
  pub fn resolve(&self, n: usize) -> Result<Vec<(f64, f64)>> {
    let pair = |(lo, hi): (Option<f64>, Option<f64>)| {
      (lo.unwrap_or(f64::NEG_INFINITY), hi.unwrap_or(f64::INFINITY))
    };
    let pairs: Vec<(f64, f64)> = match self {
      Self::Uniform { lower, upper } => vec![pair((*lower, *upper)); n],
      Self::PerAsset(list) => {
        if list.len() != n {
          return Err(PortfolioError::invalid(format!(
            "{} weight bounds for {n} assets",
            list.len()
          )));
        }
        list.iter().copied().map(pair).collect()
      }
    };

    for (i, &(lo, hi)) in pairs.iter().enumerate() {
      if lo.is_nan() || hi.is_nan() || lo > hi {
        return Err(PortfolioError::invalid(format!(
          "invalid bounds ({lo}, {hi}) for asset {i}"
        )));
      }
    }
    Ok(pairs)
  }
}

/// Bounds on the total weight of a group of assets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ImplNew)]
pub struct GroupConstraint {
  pub name: String,
  pub assets: Vec<String>,
  pub lower: Option<f64>,
  pub upper: Option<f64>,
}

/// Asset to sector mapping with per-sector bounds on total weight.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorMapper {
  pub mapping: BTreeMap<String, String>,
  pub lower: BTreeMap<String, f64>,
  pub upper: BTreeMap<String, f64>,
}

impl SectorMapper {
  /// One group per sector that carries a lower or an upper bound.
  ///
  /// Assets without a sector belong to no group; mapped ids that are not in
  /// `assets` are skipped.
  pub fn groups(&self, assets: &AssetSet) -> Vec<GroupConstraint> {
    let mut sectors: Vec<&String> = self.lower.keys().chain(self.upper.keys()).collect();
    sectors.sort();
    sectors.dedup();

    for id in self.mapping.keys().filter(|id| !assets.contains(id)) {
      debug!(asset = %id, "sector mapping names an asset outside the universe");
    }

    sectors
      .into_iter()
      .map(|sector| GroupConstraint {
        name: sector.clone(),
        assets: assets
          .iter()
          .filter(|id| self.mapping.get(*id) == Some(sector))
          .map(str::to_string)
          .collect(),
        lower: self.lower.get(sector).copied(),
        upper: self.upper.get(sector).copied(),
      })
      .collect()
  }
}

/// Feasible-set description for an optimization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
  pub bounds: WeightBounds,
  pub groups: Vec<GroupConstraint>,
  /// Weights sum to 0 instead of 1.
  pub market_neutral: bool,
}

impl Constraints {
  pub fn long_only() -> Self {
    Self::default()
  }

  pub fn with_bounds(mut self, bounds: WeightBounds) -> Self {
    self.bounds = bounds;
    self
  }

  pub fn with_groups(mut self, groups: Vec<GroupConstraint>) -> Self {
    self.groups = groups;
    self
  }

  pub fn with_sectors(mut self, sectors: &SectorMapper, assets: &AssetSet) -> Self {
    self.groups.extend(sectors.groups(assets));
    self
  }

  pub fn with_market_neutral(mut self, market_neutral: bool) -> Self {
    self.market_neutral = market_neutral;
    self
  }

  /// Target sum of weights.
  pub fn net_exposure(&self) -> f64 {
    if self.market_neutral {
      0.0
    } else {
      1.0
    }
  }

  pub(crate) fn resolve(&self, assets: &AssetSet) -> Result<ResolvedConstraints> {
    let mut bounds = self.bounds.resolve(assets.len())?;
    let net = self.net_exposure();

    if self.market_neutral && bounds.iter().all(|&(lo, _)| lo >= 0.0) {
      warn!("market neutral portfolio needs shorting, bounds amended to (-1, 1)");
      bounds = vec![(-1.0, 1.0); assets.len()];
    }

    let groups = self
      .groups
      .iter()
      .map(|g| {
        let members = g
          .assets
          .iter()
          .map(|id| {
            assets
              .index_of(id)
              .ok_or_else(|| PortfolioError::UnknownAsset(id.clone()))
          })
          .collect::<Result<Vec<_>>>()?;
        let lower = g.lower.unwrap_or(f64::NEG_INFINITY);
        let upper = g.upper.unwrap_or(f64::INFINITY);
        if lower.is_nan() || upper.is_nan() || lower > upper {
          return Err(PortfolioError::invalid(format!(
            "group {} has lower bound above upper bound",
            g.name
          )));
        }
        Ok(ResolvedGroup {
          name: g.name.clone(),
          members,
          lower,
          upper,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let resolved = ResolvedConstraints { bounds, groups, net };
    resolved.check_feasible()?;
    Ok(resolved)
  }
}

#[derive(Clone, Debug)]
pub(crate) struct ResolvedGroup {
  pub name: String,
  pub members: Vec<usize>,
  pub lower: f64,
  pub upper: f64,
}

/// Index-based constraints ready to be turned into QP rows.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedConstraints {
  pub bounds: Vec<(f64, f64)>,
  pub groups: Vec<ResolvedGroup>,
  pub net: f64,
}

impl ResolvedConstraints {
  /// Interval sums that already rule out any solution.
  fn check_feasible(&self) -> Result<()> {
    let lo: f64 = self.bounds.iter().map(|b| b.0).sum();
    let hi: f64 = self.bounds.iter().map(|b| b.1).sum();
    if lo > self.net + 1e-12 || hi < self.net - 1e-12 {
      return Err(PortfolioError::infeasible(format!(
        "weight bounds sum to [{lo}, {hi}] which excludes net exposure {}",
        self.net
      )));
    }

    for g in &self.groups {
      let g_lo: f64 = g.members.iter().map(|&i| self.bounds[i].0).sum();
      let g_hi: f64 = g.members.iter().map(|&i| self.bounds[i].1).sum();
      if g.lower > g_hi + 1e-12 || g.upper < g_lo - 1e-12 {
        return Err(PortfolioError::infeasible(format!(
          "group {} cannot reach [{}, {}] within its asset bounds",
          g.name, g.lower, g.upper
        )));
      }
    }

    let floor: f64 = self
      .groups
      .iter()
      .filter(|g| g.lower.is_finite())
      .map(|g| g.lower)
      .sum();
    let disjoint = {
      let mut seen = vec![false; self.bounds.len()];
      self.groups.iter().flat_map(|g| g.members.iter()).all(|&i| !std::mem::replace(&mut seen[i], true))
    };
    let long_only = self.bounds.iter().all(|b| b.0 >= 0.0);
    if disjoint && long_only && floor > self.net + 1e-12 {
      return Err(PortfolioError::infeasible(format!(
        "group lower bounds sum to {floor} above net exposure {}",
        self.net
      )));
    }
    Ok(())
  }

  /// `lower <= w_i <= upper`.
  pub fn contains(&self, i: usize, w: f64) -> bool {
    let (lo, hi) = self.bounds[i];
    w >= lo && w <= hi
  }
}
