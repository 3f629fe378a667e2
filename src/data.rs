//! # Data
//!
//! $$
//! r_t = \frac{p_t}{p_{t-1}} - 1
//! $$
//!
//! Date-indexed price tables and the CSV loader that produces them.

pub mod loader;
pub mod prices;

pub use loader::read_prices_csv;
pub use prices::PriceTable;
