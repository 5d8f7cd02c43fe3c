//! Network statistics for one scope.

use serde::{Deserialize, Serialize};

use crate::capture::{BlockedCall, ScopeCalls};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_calls: u64,
    pub urls: Vec<String>,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_calls: Vec<BlockedCall>,
}

impl NetworkStats {
    /// Captured calls come first, then blocked attempts, each in arrival order.
    pub fn from_calls(calls: &ScopeCalls) -> Self {
        let urls = calls
            .events
            .iter()
            .map(|e| e.url.clone())
            .chain(calls.blocked.iter().map(|b| b.url.clone()))
            .collect::<Vec<_>>();
        let total_duration_ms = calls.events.iter().filter_map(|e| e.duration_ms).sum();

        Self {
            total_calls: urls.len() as u64,
            urls,
            total_duration_ms,
            blocked_calls: calls.blocked.clone(),
        }
    }

    /// Any call seen, captured or blocked.
    pub fn has_activity(&self) -> bool {
        self.total_calls > 0
    }
}
