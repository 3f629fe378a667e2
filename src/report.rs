//! # Report
//!
//! $$
//! \big(w^{(r)},\ \mu^\top w^{(r)},\ \sigma(w^{(r)}),\ S(w^{(r)}),\ x^{(r)}\big)_{r}
//! $$
//!
//! Console tables for an [`EngineReport`].
//!
use prettytable::format;
use prettytable::row;
use prettytable::Table;

use crate::allocation::Allocation;
use crate::engine::EngineReport;
use crate::engine::RunResult;

fn pct(x: f64) -> String {
  format!("{:.2}%", 100.0 * x)
}

fn opt_pct(x: Option<f64>) -> String {
  x.map_or_else(|| "-".to_string(), pct)
}

fn new_table() -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
  table
}

/// Annualised return and volatility per asset.
pub fn estimates_table(report: &EngineReport) -> Table {
  let mut table = new_table();
  table.set_titles(row!["Asset", r->"Expected return", r->"Volatility"]);
  let vols = report.covariance.volatilities();
  for (i, id) in report.covariance.assets().iter().enumerate() {
    let mu = report.expected_returns.get(id);
    table.add_row(row![id, r->opt_pct(mu), r->pct(vols[i])]);
  }
  table
}

/// Non-zero weights of one run.
pub fn weights_table(run: &RunResult) -> Table {
  let mut table = new_table();
  table.set_titles(row!["Asset", r->"Weight"]);
  for (id, w) in run.weights.iter().filter(|(_, w)| *w != 0.0) {
    table.add_row(row![id, r->pct(w)]);
  }
  table
}

/// One line per run.
pub fn performance_table(runs: &[RunResult]) -> Table {
  let mut table = new_table();
  table.set_titles(row![
    "Run",
    "Objective",
    r->"Expected return",
    r->"Volatility",
    r->"Sharpe"
  ]);
  for run in runs {
    let p = &run.performance;
    let sharpe = p.sharpe.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"));
    table.add_row(row![
      run.name,
      run.objective,
      r->opt_pct(p.expected_return),
      r->pct(p.volatility),
      r->sharpe
    ]);
  }
  table
}

pub fn allocation_table(allocation: &Allocation) -> Table {
  let mut table = new_table();
  table.set_titles(row!["Asset", r->"Shares"]);
  for (id, shares) in allocation.shares() {
    table.add_row(row![id, r->shares]);
  }
  table.add_row(row![i->"leftover", r->format!("{:.2}", allocation.leftover())]);
  table
}

/// Everything above, as one block of text.
pub fn render_report(report: &EngineReport) -> String {
  let mut out = String::new();
  out.push_str("Estimates\n");
  out.push_str(&estimates_table(report).to_string());

  for run in &report.runs {
    out.push_str(&format!("\n{} ({})\n", run.name, run.objective));
    out.push_str(&weights_table(run).to_string());
    if let Some(allocation) = &run.allocation {
      out.push_str(&format!("Discrete allocation, budget {:.2}\n", allocation.budget()));
      out.push_str(&allocation_table(allocation).to_string());
    }
  }

  out.push_str("\nPerformance\n");
  out.push_str(&performance_table(&report.runs).to_string());
  out
}

pub fn print_report(report: &EngineReport) {
  print!("{}", render_report(report));
}
