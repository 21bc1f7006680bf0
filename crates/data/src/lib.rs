//! Data layer: the per-instrument incremental series cache and the
//! Postgres-backed store for instruments, positions, and signal history.

pub mod series_cache;
pub mod store;

pub use series_cache::{FetchPlan, SeriesCache};
