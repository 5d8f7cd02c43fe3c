//! Aggregation of raw scope events into record sections.
//!
//! Reducers here are stateless; the only run-wide state is the
//! [`DurationHistory`], which the run controller owns.

pub mod database;
pub mod flags;
pub mod network;
pub mod percentile;

pub use database::{
    sql_signature, truncate_sql, DatabaseReducer, DatabaseStats, DuplicateGroup, QuerySample,
    QueryTypeCounts, QueryVerb,
};
pub use flags::{PerformanceBlock, PerformanceFlag, Thresholds};
pub use network::NetworkStats;
pub use percentile::{percentile, DurationHistory, PercentileSnapshot};
