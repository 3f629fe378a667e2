//! # Price Table
//!
//! $$
//! P\in\mathbb R_{>0}^{T\times N},\qquad t_1<t_2<\dots<t_T
//! $$
//!
use chrono::NaiveDate;
use ndarray::s;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;

use crate::assets::AssetSet;
use crate::assets::AssetVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// Clean table of prices, one row per date and one column per asset.
#[derive(Clone, Debug)]
pub struct PriceTable {
  dates: Vec<NaiveDate>,
  assets: AssetSet,
  prices: Array2<f64>,
}

impl PriceTable {
  /// Build a table, checking that dates are strictly increasing and every
  /// price is finite and positive.
  pub fn new(dates: Vec<NaiveDate>, assets: AssetSet, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() || prices.ncols() != assets.len() {
      return Err(PortfolioError::invalid(format!(
        "price matrix is {}x{} for {} dates and {} assets",
        prices.nrows(),
        prices.ncols(),
        dates.len(),
        assets.len()
      )));
    }

    if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
      return Err(PortfolioError::invalid(format!(
        "dates must be strictly increasing ({} followed by {})",
        w[0], w[1]
      )));
    }

    for ((t, j), &p) in prices.indexed_iter() {
      if !p.is_finite() || p <= 0.0 {
        return Err(PortfolioError::invalid(format!(
          "price {p} for {} on {} is not a positive number",
          assets.get(j).unwrap_or("?"),
          dates[t]
        )));
      }
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &AssetSet {
    &self.assets
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn n_observations(&self) -> usize {
    self.dates.len()
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Price history of a single asset.
  pub fn column(&self, id: &str) -> Option<ArrayView1<'_, f64>> {
    self.assets.index_of(id).map(|j| self.prices.column(j))
  }

  /// Last observed price per asset.
  pub fn latest_prices(&self) -> Result<AssetVector> {
    let last = self.prices.nrows().checked_sub(1).ok_or(PortfolioError::InsufficientData {
      observations: 0,
      required: 1,
    })?;
    AssetVector::new(self.assets.clone(), self.prices.row(last).to_vec())
  }

  /// Simple periodic returns, shape `(T-1) x N`.
  pub fn returns(&self) -> Array2<f64> {
    if self.prices.nrows() < 2 {
      return Array2::zeros((0, self.n_assets()));
    }
    let prev = self.prices.slice(s![..-1, ..]);
    let next = self.prices.slice(s![1.., ..]);
    &next / &prev - 1.0
  }

  /// Log returns, shape `(T-1) x N`.
  pub fn log_returns(&self) -> Array2<f64> {
    self.returns().mapv(f64::ln_1p)
  }

  /// Restrict the table to a subset of assets, in the given order.
  pub fn select(&self, ids: &[&str]) -> Result<PriceTable> {
    let cols = ids
      .iter()
      .map(|id| self.assets.require(id))
      .collect::<Result<Vec<_>>>()?;
    let prices = self.prices.select(Axis(1), &cols);
    PriceTable::new(self.dates.clone(), AssetSet::new(ids.iter().copied())?, prices)
  }
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, d).unwrap()
  }

  fn table() -> PriceTable {
    PriceTable::new(
      vec![day(4), day(5), day(6)],
      AssetSet::new(["AAA", "BBB"]).unwrap(),
      array![[10.0, 20.0], [11.0, 19.0], [12.1, 19.0]],
    )
    .unwrap()
  }

  #[test]
  fn returns_are_simple_period_changes() {
    let r = table().returns();
    assert_eq!(r.dim(), (2, 2));
    assert!((r[[0, 0]] - 0.1).abs() < 1e-12);
    assert!((r[[1, 0]] - 0.1).abs() < 1e-12);
    assert!((r[[0, 1]] + 0.05).abs() < 1e-12);
    assert_eq!(r[[1, 1]], 0.0);

    let lr = table().log_returns();
    assert!((lr[[0, 0]] - 1.1f64.ln()).abs() < 1e-12);
  }

  #[test]
  fn latest_prices_is_last_row() {
    let p = table().latest_prices().unwrap();
    assert_eq!(p.get("AAA"), Some(12.1));
    assert_eq!(p.get("BBB"), Some(19.0));
  }

  #[test]
  fn rejects_unsorted_dates_and_bad_prices() {
    let assets = AssetSet::new(["AAA"]).unwrap();
    assert!(PriceTable::new(vec![day(5), day(4)], assets.clone(), array![[1.0], [2.0]]).is_err());
    assert!(PriceTable::new(vec![day(4), day(5)], assets.clone(), array![[1.0], [0.0]]).is_err());
    assert!(PriceTable::new(vec![day(4)], assets, array![[1.0], [2.0]]).is_err());
  }

  #[test]
  fn select_reorders_columns() {
    let sub = table().select(&["BBB"]).unwrap();
    assert_eq!(sub.n_assets(), 1);
    assert_eq!(sub.column("BBB").unwrap()[0], 20.0);
    assert!(table().select(&["ZZZ"]).is_err());
  }
}
