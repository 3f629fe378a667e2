//! # frontier-rs
//!
//! $$
//! \min_{w}\ w^\top\Sigma w-\lambda\,\mu^\top w\quad\text{s.t.}\quad Aw=b,\ Gw\le h
//! $$
//!
//! Mean-variance portfolio construction: return and risk estimators, two
//! convex QP solvers, efficient-frontier objectives and whole-share
//! allocation.
//!
pub mod allocation;
pub mod assets;
pub mod data;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod optimizer;
pub mod report;
pub mod solvers;
pub mod visualization;

pub use allocation::Allocation;
pub use allocation::DiscreteAllocation;
pub use assets::AssetSet;
pub use assets::AssetVector;
pub use assets::CovarianceMatrix;
pub use assets::ReturnVector;
pub use assets::WeightVector;
pub use data::PriceTable;
pub use engine::EngineConfig;
pub use engine::PortfolioEngine;
pub use error::PortfolioError;
pub use error::Result;
pub use estimators::Estimator;
pub use optimizer::Constraints;
pub use optimizer::EfficientFrontier;
pub use optimizer::Objective;
