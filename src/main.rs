//! # frontier
//!
//! Reads a price table, runs a plan of efficient portfolios and prints the
//! weights, performance and discrete allocations.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use frontier_rs::data::read_prices_csv;
use frontier_rs::engine::EngineConfig;
use frontier_rs::engine::PortfolioEngine;
use frontier_rs::report::print_report;
use frontier_rs::solvers::SolverKind;
use frontier_rs::visualization::write_report_plots;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mean-variance portfolio construction from a CSV of prices.
#[derive(Parser)]
#[command(name = "frontier")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Price table: a date column followed by one column per asset
  #[arg(short, long)]
  prices: PathBuf,

  /// JSON run plan; the built-in plan is used when absent
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write HTML charts into this directory
  #[arg(long)]
  plot_dir: Option<PathBuf>,

  /// QP solver: active-set or interior-point
  #[arg(long, value_parser = parse_solver)]
  solver: Option<SolverKind>,

  /// Override the allocation budget
  #[arg(long)]
  budget: Option<f64>,

  /// Enable debug output
  #[arg(short, long)]
  verbose: bool,
}

fn parse_solver(s: &str) -> std::result::Result<SolverKind, String> {
  SolverKind::parse(s).ok_or_else(|| format!("unknown solver {s:?}, expected active-set or interior-point"))
}

fn setup_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  setup_logging(cli.verbose);

  let mut config = match &cli.config {
    Some(path) => EngineConfig::from_json_path(path)
      .with_context(|| format!("loading run plan {}", path.display()))?,
    None => EngineConfig::default(),
  };
  if let Some(kind) = cli.solver {
    config.solver.kind = kind;
  }
  if let Some(budget) = cli.budget {
    config.allocation.budget = budget;
  }

  let prices = read_prices_csv(&cli.prices)
    .with_context(|| format!("reading prices from {}", cli.prices.display()))?;
  info!(
    assets = prices.n_assets(),
    observations = prices.n_observations(),
    runs = config.runs.len(),
    "prices loaded"
  );

  let report = PortfolioEngine::new(config)
    .run(&prices)
    .context("running portfolio plan")?;
  print_report(&report);

  if let Some(dir) = &cli.plot_dir {
    write_report_plots(&report, dir)
      .with_context(|| format!("writing plots to {}", dir.display()))?;
  }
  Ok(())
}
