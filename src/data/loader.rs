//! # CSV Loader
//!
//! Reads a `Date,<asset>,<asset>,...` table. Columns without a single
//! observation are dropped, then every row with a missing value is dropped.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use super::prices::PriceTable;
use crate::assets::AssetSet;
use crate::error::PortfolioError;
use crate::error::Result;

fn parse_date(raw: &str) -> Option<NaiveDate> {
  let head = raw.get(..10).unwrap_or(raw);
  NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_cell(raw: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
  match raw {
    "" | "NaN" | "nan" | "NA" | "null" => Ok(None),
    s => s.parse::<f64>().map(|v| v.is_finite().then_some(v)),
  }
}

/// Read a price table from a CSV file on disk.
pub fn read_prices_csv(path: impl AsRef<Path>) -> Result<PriceTable> {
  let path = path.as_ref();
  debug!(path = %path.display(), "reading price table");
  PriceTable::from_csv_reader(File::open(path)?)
}

impl PriceTable {
  pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
    read_prices_csv(path)
  }

  /// Read a price table from any CSV source.
  pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
    let mut rdr = csv::ReaderBuilder::new()
      .trim(csv::Trim::All)
      .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
      return Err(PortfolioError::invalid(
        "price file needs a date column and at least one asset column",
      ));
    }
    let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
      let record = record?;
      let raw_date = record.get(0).unwrap_or_default();
      let date = parse_date(raw_date).ok_or_else(|| {
        PortfolioError::invalid(format!("line {}: cannot parse date {raw_date:?}", line + 2))
      })?;
      let cells = record
        .iter()
        .skip(1)
        .map(|c| {
          parse_cell(c).map_err(|_| {
            PortfolioError::invalid(format!("line {}: cannot parse price {c:?}", line + 2))
          })
        })
        .collect::<Result<Vec<_>>>()?;
      rows.push((date, cells));
    }

    rows.sort_by_key(|(d, _)| *d);
    if let Some(w) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
      return Err(PortfolioError::invalid(format!("duplicate date {}", w[0].0)));
    }

    let keep: Vec<usize> = (0..names.len())
      .filter(|&j| {
        let observed = rows.iter().any(|(_, cells)| cells[j].is_some());
        if !observed {
          warn!(asset = %names[j], "dropping asset without observations");
        }
        observed
      })
      .collect();
    if keep.is_empty() {
      return Err(PortfolioError::invalid("price file has no observations"));
    }

    let total = rows.len();
    rows.retain(|(_, cells)| keep.iter().all(|&j| cells[j].is_some()));
    if rows.len() < total {
      warn!(
        dropped = total - rows.len(),
        kept = rows.len(),
        "dropping rows with missing prices"
      );
    }

    let mut prices = Array2::zeros((rows.len(), keep.len()));
    for (t, (_, cells)) in rows.iter().enumerate() {
      for (k, &j) in keep.iter().enumerate() {
        prices[[t, k]] = cells[j].unwrap_or(f64::NAN);
      }
    }

    let assets = AssetSet::new(keep.iter().map(|&j| names[j].clone()))?;
    let dates = rows.into_iter().map(|(d, _)| d).collect();
    PriceTable::new(dates, assets, prices)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tracing_test::traced_test;

  use super::*;

  const CSV: &str = "\
Date,AAA,BBB,EMPTY
2021-01-06,12.0,30.0,
2021-01-04,10.0,,
2021-01-05,11.0,29.0,
2021-01-07 00:00:00,12.5,31.0,
";

  #[test]
  #[traced_test]
  fn drops_empty_columns_and_incomplete_rows() {
    let table = PriceTable::from_csv_reader(CSV.as_bytes()).unwrap();
    assert_eq!(table.assets().as_slice(), &["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(table.n_observations(), 3);
    assert_eq!(table.dates()[0], NaiveDate::from_ymd_opt(2021, 1, 5).unwrap());
    assert_eq!(table.prices()[[2, 1]], 31.0);
    assert!(logs_contain("dropping rows with missing prices"));
    assert!(logs_contain("dropping asset without observations"));
  }

  #[test]
  fn rejects_garbage() {
    let bad_date = "Date,AAA\nyesterday,1.0\n";
    assert!(PriceTable::from_csv_reader(bad_date.as_bytes()).is_err());

    let bad_price = "Date,AAA\n2021-01-04,abc\n";
    assert!(PriceTable::from_csv_reader(bad_price.as_bytes()).is_err());

    let dup = "Date,AAA\n2021-01-04,1.0\n2021-01-04,2.0\n";
    assert!(PriceTable::from_csv_reader(dup.as_bytes()).is_err());
  }

  #[test]
  fn reads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CSV.as_bytes()).unwrap();
    let table = read_prices_csv(file.path()).unwrap();
    assert_eq!(table.n_assets(), 2);
  }
}
