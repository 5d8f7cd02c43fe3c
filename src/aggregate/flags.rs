//! Performance flags and the per-test performance block.

use serde::{Deserialize, Serialize};

use super::percentile::PercentileSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceFlag {
    VerySlow,
    Slow,
    HighDbQueries,
    ModerateDbQueries,
    NetworkCallsBlocked,
}

/// Flag thresholds. Comparisons are strict (`>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub slow_ms: u64,
    pub very_slow_ms: u64,
    pub moderate_queries: u64,
    pub high_queries: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_ms: 2000,
            very_slow_ms: 5000,
            moderate_queries: 50,
            high_queries: 100,
        }
    }
}

impl Thresholds {
    /// Flags in priority order: duration, then query volume, then network.
    pub fn flags(&self, duration_ms: u64, query_count: u64, network_activity: bool) -> Vec<PerformanceFlag> {
        let mut flags = Vec::new();

        if duration_ms > self.very_slow_ms {
            flags.push(PerformanceFlag::VerySlow);
        } else if duration_ms > self.slow_ms {
            flags.push(PerformanceFlag::Slow);
        }

        if query_count > self.high_queries {
            flags.push(PerformanceFlag::HighDbQueries);
        } else if query_count > self.moderate_queries {
            flags.push(PerformanceFlag::ModerateDbQueries);
        }

        if network_activity {
            flags.push(PerformanceFlag::NetworkCallsBlocked);
        }
        flags
    }

    pub fn performance(
        &self,
        duration_ms: u64,
        query_count: u64,
        network_activity: bool,
        run: PercentileSnapshot,
    ) -> PerformanceBlock {
        PerformanceBlock {
            duration_ms,
            p50_duration_ms: run.p50,
            p95_duration_ms: run.p95,
            p99_duration_ms: run.p99,
            is_slow: duration_ms > self.very_slow_ms,
            is_db_heavy: query_count > self.moderate_queries,
            is_network_heavy: network_activity,
            flags: self.flags(duration_ms, query_count, network_activity),
        }
    }
}

/// Performance section of a test record. Percentiles are run-wide, taken
/// after this test's duration joined the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBlock {
    pub duration_ms: u64,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub is_slow: bool,
    pub is_db_heavy: bool,
    pub is_network_heavy: bool,
    pub flags: Vec<PerformanceFlag>,
}
