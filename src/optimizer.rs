//! # Optimizer
//!
//! $$
//! w^\*=\arg\min_{w\in\mathcal W}\ f(w;\mu,\Sigma)+\gamma\lVert w\rVert_2^2
//! $$
//!
//! Efficient portfolios under bound, group and net-exposure constraints.

pub mod constraints;
pub mod efficient_frontier;
pub mod objective;
pub mod performance;

pub use constraints::Constraints;
pub use constraints::GroupConstraint;
pub use constraints::SectorMapper;
pub use constraints::WeightBounds;
pub use efficient_frontier::optimize;
pub use efficient_frontier::EfficientFrontier;
pub use efficient_frontier::FrontierPoint;
pub use efficient_frontier::CLEAN_CUTOFF;
pub use objective::Objective;
pub use objective::RISK_FREE_RATE;
pub use performance::portfolio_performance;
pub use performance::PortfolioPerformance;
