//! Query log adapter.
//!
//! The host exposes an append-only list of executed queries (`{sql, time}`).
//! Scopes remember a watermark into that list and later read only the suffix
//! written after it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CaptureError;

/// A query entry exactly as the host logged it.
///
/// `time` is kept untyped: hosts log it as a number, a numeric string, or not
/// at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuery {
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub time: Value,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>, time: impl Into<Value>) -> Self {
        Self {
            sql: sql.into(),
            time: time.into(),
        }
    }

    /// Normalize into a `QueryEvent`, coercing unusable durations to zero.
    pub fn to_event(&self) -> QueryEvent {
        QueryEvent {
            sql_text: self.sql.clone(),
            duration_seconds: parse_duration_seconds(&self.time),
        }
    }
}

/// Normalized query event. Attribution is positional, so it carries no identity.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    pub sql_text: String,
    pub duration_seconds: f64,
}

/// Parse a logged duration. Missing, non-numeric, negative and non-finite
/// values become `0.0`.
pub fn parse_duration_seconds(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

/// Host-provided source of executed queries.
pub trait QuerySource: Send + Sync {
    /// Number of entries currently in the log.
    fn len(&self) -> Result<usize, CaptureError>;

    /// Entries at positions `watermark..`.
    fn since(&self, watermark: usize) -> Result<Vec<RawQuery>, CaptureError>;

    /// Clear the log to bound memory. Sources that cannot reset report
    /// `CaptureError::ResetUnsupported`.
    fn reset(&self) -> Result<(), CaptureError> {
        Err(CaptureError::ResetUnsupported)
    }

    fn is_empty(&self) -> Result<bool, CaptureError> {
        Ok(self.len()? == 0)
    }
}

/// In-process query log shared between the host's database layer and the engine.
pub struct SharedQueryLog {
    entries: Mutex<Vec<RawQuery>>,
    resettable: bool,
}

impl SharedQueryLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            resettable: true,
        }
    }

    /// A log that refuses `reset`, like hosts that only expose a read view.
    pub fn append_only() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            resettable: false,
        }
    }

    /// Append a query as the host's database layer would.
    pub fn record(&self, sql: impl Into<String>, time: impl Into<Value>) {
        self.entries.lock().push(RawQuery::new(sql, time));
    }

    pub fn push(&self, query: RawQuery) {
        self.entries.lock().push(query);
    }
}

impl Default for SharedQueryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySource for SharedQueryLog {
    fn len(&self) -> Result<usize, CaptureError> {
        Ok(self.entries.lock().len())
    }

    fn since(&self, watermark: usize) -> Result<Vec<RawQuery>, CaptureError> {
        let entries = self.entries.lock();
        if watermark > entries.len() {
            return Err(CaptureError::WatermarkAhead {
                watermark,
                len: entries.len(),
            });
        }
        Ok(entries[watermark..].to_vec())
    }

    fn reset(&self) -> Result<(), CaptureError> {
        if !self.resettable {
            return Err(CaptureError::ResetUnsupported);
        }
        self.entries.lock().clear();
        Ok(())
    }
}
