//! # Assets
//!
//! $$
//! \mathbf{w}\in\mathbb R^{N},\qquad \Sigma\in\mathbb S_+^{N}
//! $$
//!
//! Asset-keyed containers. Every vector and matrix carries the [`AssetSet`]
//! it was built against, so values from different universes cannot be mixed
//! by accident.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::ser::SerializeMap;
use serde::Serialize;
use serde::Serializer;

use crate::error::PortfolioError;
use crate::error::Result;

/// Ordered, duplicate-free set of asset identifiers.
#[derive(Clone, PartialEq, Eq)]
pub struct AssetSet {
  ids: Arc<[String]>,
  index: Arc<HashMap<String, usize>>,
}

impl AssetSet {
  /// Validate and build an asset set. Ids must be non-empty and unique.
  pub fn new<I, S>(ids: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let ids: Vec<String> = ids.into_iter().map(|s| s.into().trim().to_string()).collect();
    if ids.is_empty() {
      return Err(PortfolioError::invalid("asset set must not be empty"));
    }

    let mut index = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
      if id.is_empty() {
        return Err(PortfolioError::invalid(format!("asset id at position {i} is blank")));
      }
      if index.insert(id.clone(), i).is_some() {
        return Err(PortfolioError::invalid(format!("duplicate asset id {id}")));
      }
    }

    Ok(Self {
      ids: ids.into(),
      index: Arc::new(index),
    })
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.ids.iter().map(String::as_str)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.ids
  }

  /// Asset id at position `i`.
  pub fn get(&self, i: usize) -> Option<&str> {
    self.ids.get(i).map(String::as_str)
  }

  pub fn index_of(&self, id: &str) -> Option<usize> {
    self.index.get(id).copied()
  }

  /// Like [`AssetSet::index_of`] but fails with [`PortfolioError::UnknownAsset`].
  pub fn require(&self, id: &str) -> Result<usize> {
    self
      .index_of(id)
      .ok_or_else(|| PortfolioError::UnknownAsset(id.to_string()))
  }

  pub fn contains(&self, id: &str) -> bool {
    self.index.contains_key(id)
  }

  /// Fail unless both sets hold the same ids in the same order.
  pub fn ensure_same(&self, other: &AssetSet) -> Result<()> {
    if Arc::ptr_eq(&self.ids, &other.ids) || self.ids == other.ids {
      Ok(())
    } else {
      Err(PortfolioError::invalid(
        "containers were built against different asset sets",
      ))
    }
  }
}

impl fmt::Debug for AssetSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.ids.iter()).finish()
  }
}

/// Asset-keyed vector of scalars.
#[derive(Clone, Debug)]
pub struct AssetVector {
  assets: AssetSet,
  values: DVector<f64>,
}

/// Expected annual return per asset.
pub type ReturnVector = AssetVector;
/// Portfolio weight per asset.
pub type WeightVector = AssetVector;

impl AssetVector {
  pub fn new(assets: AssetSet, values: Vec<f64>) -> Result<Self> {
    Self::from_dvector(assets, DVector::from_vec(values))
  }

  pub fn from_dvector(assets: AssetSet, values: DVector<f64>) -> Result<Self> {
    if values.len() != assets.len() {
      return Err(PortfolioError::invalid(format!(
        "vector has {} entries for {} assets",
        values.len(),
        assets.len()
      )));
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid(format!(
        "non-finite value for asset {}",
        assets.get(i).unwrap_or("?")
      )));
    }
    Ok(Self { assets, values })
  }

  /// Build from `(asset, value)` pairs. Missing assets default to zero.
  pub fn from_pairs<'a, I>(assets: AssetSet, pairs: I) -> Result<Self>
  where
    I: IntoIterator<Item = (&'a str, f64)>,
  {
    let mut values = DVector::zeros(assets.len());
    for (id, v) in pairs {
      values[assets.require(id)?] = v;
    }
    Self::from_dvector(assets, values)
  }

  pub fn zeros(assets: AssetSet) -> Self {
    let values = DVector::zeros(assets.len());
    Self { assets, values }
  }

  pub fn assets(&self) -> &AssetSet {
    &self.assets
  }

  pub fn values(&self) -> &DVector<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn get(&self, id: &str) -> Option<f64> {
    self.assets.index_of(id).map(|i| self.values[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.assets.iter().zip(self.values.iter().copied())
  }

  pub fn sum(&self) -> f64 {
    self.values.sum()
  }

  pub fn dot(&self, other: &AssetVector) -> Result<f64> {
    self.assets.ensure_same(&other.assets)?;
    Ok(self.values.dot(&other.values))
  }

  pub fn max(&self) -> f64 {
    self.values.max()
  }

  pub fn min(&self) -> f64 {
    self.values.min()
  }
}

impl Serialize for AssetVector {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.len()))?;
    for (id, v) in self.iter() {
      map.serialize_entry(id, &v)?;
    }
    map.end()
  }
}

/// Symmetric positive semi-definite covariance matrix keyed by an [`AssetSet`].
#[derive(Clone, Debug)]
pub struct CovarianceMatrix {
  assets: AssetSet,
  values: DMatrix<f64>,
}

impl CovarianceMatrix {
  /// Validate shape, symmetry and the diagonal. Exact symmetry is restored by
  /// averaging with the transpose.
  pub fn new(assets: AssetSet, values: DMatrix<f64>) -> Result<Self> {
    let n = assets.len();
    if values.nrows() != n || values.ncols() != n {
      return Err(PortfolioError::invalid(format!(
        "covariance matrix is {}x{} for {} assets",
        values.nrows(),
        values.ncols(),
        n
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid("covariance matrix has non-finite entries"));
    }

    let scale = values.amax().max(1e-300);
    for i in 0..n {
      if values[(i, i)] < -1e-12 * scale {
        return Err(PortfolioError::invalid(format!(
          "negative variance for asset {}",
          assets.get(i).unwrap_or("?")
        )));
      }
      for j in (i + 1)..n {
        if (values[(i, j)] - values[(j, i)]).abs() > 1e-8 * scale {
          return Err(PortfolioError::invalid("covariance matrix is not symmetric"));
        }
      }
    }

    let values = (&values + values.transpose()) * 0.5;
    Ok(Self { assets, values })
  }

  /// Build from row vectors.
  pub fn from_rows(assets: AssetSet, rows: &[Vec<f64>]) -> Result<Self> {
    let n = rows.len();
    if rows.iter().any(|r| r.len() != n) {
      return Err(PortfolioError::invalid("covariance rows must form a square matrix"));
    }
    let values = DMatrix::from_fn(n, n, |i, j| rows[i][j]);
    Self::new(assets, values)
  }

  pub fn assets(&self) -> &AssetSet {
    &self.assets
  }

  pub fn matrix(&self) -> &DMatrix<f64> {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn get(&self, a: &str, b: &str) -> Option<f64> {
    let i = self.assets.index_of(a)?;
    let j = self.assets.index_of(b)?;
    Some(self.values[(i, j)])
  }

  /// wᵀΣw for a raw weight vector aligned with the asset set.
  pub fn quad_form(&self, w: &DVector<f64>) -> f64 {
    w.dot(&(&self.values * w))
  }

  /// Per-asset volatilities (square root of the diagonal).
  pub fn volatilities(&self) -> DVector<f64> {
    self.values.diagonal().map(|v| v.max(0.0).sqrt())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn abc() -> AssetSet {
    AssetSet::new(["AAA", "BBB", "CCC"]).unwrap()
  }

  #[test]
  fn asset_set_rejects_duplicates_and_blanks() {
    assert!(AssetSet::new(["A", "B", "A"]).is_err());
    assert!(AssetSet::new(["A", " "]).is_err());
    assert!(AssetSet::new(Vec::<String>::new()).is_err());

    let set = abc();
    assert_eq!(set.index_of("BBB"), Some(1));
    assert!(matches!(
      set.require("ZZZ"),
      Err(PortfolioError::UnknownAsset(id)) if id == "ZZZ"
    ));
  }

  #[test]
  fn vectors_from_different_sets_do_not_mix() {
    let a = AssetVector::new(abc(), vec![1.0, 2.0, 3.0]).unwrap();
    let b = AssetVector::new(AssetSet::new(["X", "Y", "Z"]).unwrap(), vec![1.0; 3]).unwrap();
    assert!(a.dot(&b).is_err());
    assert_eq!(a.dot(&a).unwrap(), 14.0);
  }

  #[test]
  fn from_pairs_defaults_missing_assets_to_zero() {
    let v = AssetVector::from_pairs(abc(), [("CCC", 0.5), ("AAA", 0.25)]).unwrap();
    assert_eq!(v.get("AAA"), Some(0.25));
    assert_eq!(v.get("BBB"), Some(0.0));
    assert_eq!(v.get("CCC"), Some(0.5));
  }

  #[test]
  fn covariance_validates_shape_and_symmetry() {
    let set = AssetSet::new(["A", "B"]).unwrap();
    assert!(CovarianceMatrix::from_rows(set.clone(), &[vec![0.04, 0.01], vec![0.02, 0.09]]).is_err());
    assert!(CovarianceMatrix::from_rows(set.clone(), &[vec![-0.04, 0.0], vec![0.0, 0.09]]).is_err());
    assert!(CovarianceMatrix::from_rows(set.clone(), &[vec![0.04, 0.0]]).is_err());

    let cov = CovarianceMatrix::from_rows(set, &[vec![0.04, 0.01], vec![0.01, 0.09]]).unwrap();
    assert_eq!(cov.get("A", "B"), Some(0.01));
    let w = DVector::from_vec(vec![0.5, 0.5]);
    assert!((cov.quad_form(&w) - 0.0375).abs() < 1e-12);
    assert!((cov.volatilities()[1] - 0.3).abs() < 1e-12);
  }
}
