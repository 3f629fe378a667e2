//! # Visualization
//!
//! $$
//! \{(\sigma_k,\mu_k)\}_{k=1}^m,\quad w^{(r)}\in\mathbb R^n,\quad
//! \rho_{ij}=\frac{\Sigma_{ij}}{\sigma_i\sigma_j}
//! $$
//!
//! HTML charts of an [`EngineReport`]: the sampled frontier with every run
//! overlaid, grouped weight bars and the correlation heatmap.
//!
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use plotly::common::Marker;
use plotly::common::Mode;
use plotly::common::Title;
use plotly::layout::Axis;
use plotly::layout::BarMode;
use plotly::Bar;
use plotly::HeatMap;
use plotly::Layout;
use plotly::Plot;
use plotly::Scatter;
use tracing::info;

use crate::engine::EngineReport;
use crate::error::Result;
use crate::estimators::cov_to_corr;

/// Frontier curve plus one labelled marker per run that has a return.
pub fn frontier_plot(report: &EngineReport) -> Plot {
  let mut plot = Plot::new();

  if !report.frontier.is_empty() {
    let xs: Vec<f64> = report.frontier.iter().map(|p| p.volatility).collect();
    let ys: Vec<f64> = report.frontier.iter().map(|p| p.expected_return).collect();
    plot.add_trace(
      Scatter::new(xs, ys)
        .name("Efficient frontier")
        .mode(Mode::Lines),
    );
  }

  let runs: Vec<_> = report
    .runs
    .iter()
    .filter_map(|r| r.performance.expected_return.map(|ret| (r, ret)))
    .collect();
  if !runs.is_empty() {
    let xs: Vec<f64> = runs.iter().map(|(r, _)| r.performance.volatility).collect();
    let ys: Vec<f64> = runs.iter().map(|(_, ret)| *ret).collect();
    let labels: Vec<String> = runs.iter().map(|(r, _)| r.name.clone()).collect();
    plot.add_trace(
      Scatter::new(xs, ys)
        .name("Runs")
        .mode(Mode::MarkersText)
        .text_array(labels)
        .marker(Marker::new().size(10)),
    );
  }

  plot.set_layout(
    Layout::new()
      .title(Title::from("Efficient Frontier"))
      .x_axis(Axis::new().title("Volatility"))
      .y_axis(Axis::new().title("Expected return")),
  );
  plot
}

/// One bar group per asset, one bar per run.
pub fn weights_plot(report: &EngineReport) -> Plot {
  let mut plot = Plot::new();
  for run in &report.runs {
    let (ids, ws): (Vec<String>, Vec<f64>) = run
      .weights
      .iter()
      .map(|(id, w)| (id.to_string(), w))
      .unzip();
    plot.add_trace(Bar::new(ids, ws).name(run.name.as_str()));
  }
  plot.set_layout(
    Layout::new()
      .title(Title::from("Portfolio Weights"))
      .bar_mode(BarMode::Group)
      .y_axis(Axis::new().title("Weight")),
  );
  plot
}

pub fn correlation_plot(report: &EngineReport) -> Plot {
  let corr = cov_to_corr(&report.covariance);
  let ids: Vec<String> = report.covariance.assets().iter().map(str::to_string).collect();
  let z: Vec<Vec<f64>> = corr
    .row_iter()
    .map(|row| row.iter().copied().collect())
    .collect();

  let mut plot = Plot::new();
  plot.add_trace(HeatMap::new(ids.clone(), ids, z));
  plot.set_layout(Layout::new().title(Title::from("Correlation")));
  plot
}

/// Writes `frontier.html`, `weights.html` and `correlation.html` into `dir`.
pub fn write_report_plots(report: &EngineReport, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
  let dir = dir.as_ref();
  fs::create_dir_all(dir)?;

  let plots = [
    ("frontier.html", frontier_plot(report)),
    ("weights.html", weights_plot(report)),
    ("correlation.html", correlation_plot(report)),
  ];
  let mut written = Vec::with_capacity(plots.len());
  for (file, plot) in plots {
    let path = dir.join(file);
    fs::write(&path, plot.to_html())?;
    info!(path = %path.display(), "plot written");
    written.push(path);
  }
  Ok(written)
}
