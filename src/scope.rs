//! Per-test scope tracking.
//!
//! A scope lives from `start` to `end`. Ended scopes are removed from the live
//! map immediately; nothing in `Ended` state is retained.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::capture::InterceptionHandle;
use crate::record::TestIdentity;

/// Lifecycle state of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Pending,
    Running,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Test {0} is already running")]
    Duplicate(String),

    #[error("No running scope for test {0}")]
    Unknown(String),
}

/// One tracked test execution.
#[derive(Debug, Clone)]
pub struct TestScope {
    pub identity: TestIdentity,
    /// Wall-clock start for the record.
    pub start_time: DateTime<Utc>,
    /// Monotonic start for the duration.
    pub started_at: Instant,
    /// Query log length when the scope began. `None` if the log could not
    /// be read at start, in which case no queries are attributed.
    pub query_watermark: Option<usize>,
    pub network_handle: Option<InterceptionHandle>,
    pub state: ScopeState,
}

impl TestScope {
    pub fn new(identity: TestIdentity) -> Self {
        Self {
            identity,
            start_time: Utc::now(),
            started_at: Instant::now(),
            query_watermark: None,
            network_handle: None,
            state: ScopeState::Pending,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.identity.id
    }

    /// `round((end - start) * 1000)` on the monotonic clock.
    pub fn elapsed_ms(&self) -> u64 {
        (self.started_at.elapsed().as_secs_f64() * 1000.0).round() as u64
    }
}

/// Live map of running scopes keyed by test id.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    live: HashMap<String, TestScope>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a pending scope into the live map as `Running`.
    pub fn start(&mut self, mut scope: TestScope) -> Result<&TestScope, ScopeError> {
        let id = scope.test_id().to_string();
        if self.live.contains_key(&id) {
            return Err(ScopeError::Duplicate(id));
        }
        scope.state = ScopeState::Running;
        Ok(self.live.entry(id).or_insert(scope))
    }

    /// Remove a running scope, returning it in `Ended` state.
    pub fn end(&mut self, test_id: &str) -> Result<TestScope, ScopeError> {
        let mut scope = self
            .live
            .remove(test_id)
            .ok_or_else(|| ScopeError::Unknown(test_id.to_string()))?;
        scope.state = ScopeState::Ended;
        Ok(scope)
    }

    pub fn is_running(&self, test_id: &str) -> bool {
        self.live.contains_key(test_id)
    }

    pub fn get(&self, test_id: &str) -> Option<&TestScope> {
        self.live.get(test_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Drain every live scope, e.g. when the run is cut short.
    pub fn drain(&mut self) -> Vec<TestScope> {
        self.live
            .drain()
            .map(|(_, mut scope)| {
                scope.state = ScopeState::Ended;
                scope
            })
            .collect()
    }
}
