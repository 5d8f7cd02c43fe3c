//! Host event protocol.
//!
//! A host framework that cannot link against this crate streams its
//! lifecycle callbacks, executed queries and outbound calls as one JSON
//! object per line:
//!
//! ```text
//! {"event":"run_start"}
//! {"event":"test_start","id":"tests/test_api.py::TestUsers::test_list"}
//! {"event":"query","sql":"SELECT * FROM users","time":"0.002"}
//! {"event":"network","url":"https://api.example.test/v1","duration_ms":12}
//! {"event":"test_end","id":"tests/test_api.py::TestUsers::test_list","status":"passed"}
//! {"event":"run_end"}
//! ```
//!
//! Lines that fail to decode are logged and skipped. If the stream ends
//! without `run_end`, the summary is still written from what was observed.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capture::{NetworkEvent, RawQuery, SharedQueryLog};
use crate::controller::RunController;
use crate::record::{RunCounts, RunSummary, TestIdentity, TestStatus};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to read host stream: {0}")]
    Read(#[from] std::io::Error),

    #[error("Malformed host event on line {line}: {message}")]
    Decode { line: usize, message: String },
}

/// Test identity as sent by the host. Only `id` is required; missing parts
/// are derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl HostTest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Derive an identity from the id's shape, then apply explicit fields.
    pub fn identity(&self) -> TestIdentity {
        let mut identity = if self.id.contains("::") {
            TestIdentity::from_node_id(&self.id)
        } else if self.id.ends_with(')') && self.id.contains(" (") {
            TestIdentity::from_unittest(&self.id)
        } else {
            TestIdentity::new(self.id.clone())
        };

        if let Some(name) = &self.name {
            identity.name = name.clone();
        }
        if let Some(class_name) = &self.class_name {
            identity.class_name = class_name.clone();
        }
        if let Some(module) = &self.module {
            identity.module = module.clone();
        }
        if let Some(file) = &self.file {
            identity.file = file.clone();
        }
        if let Some(line) = self.line {
            identity.line = line;
        }
        identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTestEnd {
    #[serde(flatten)]
    pub test: HostTest,
    pub status: TestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    RunStart,
    TestStart(HostTest),
    Query {
        sql: String,
        #[serde(default)]
        time: Value,
    },
    Network {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    TestEnd(HostTestEnd),
    RunEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counts: Option<RunCounts>,
    },
}

impl HostEvent {
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// What a [`drive`] call consumed and produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveReport {
    /// Events applied.
    pub events: usize,
    /// Lines that failed to decode.
    pub skipped: usize,
    pub records: usize,
    pub summary: Option<RunSummary>,
    /// True if the stream ended without `run_end`.
    pub truncated: bool,
}

/// Apply one event. Returns `true` for `run_end`.
pub fn apply(
    controller: &RunController,
    queries: &SharedQueryLog,
    event: HostEvent,
    report: &mut DriveReport,
) -> bool {
    match event {
        HostEvent::RunStart => controller.on_run_start(),
        HostEvent::TestStart(test) => {
            controller.on_test_start(test.identity());
        }
        HostEvent::Query { sql, time } => queries.push(RawQuery::new(sql, time)),
        HostEvent::Network {
            url,
            duration_ms,
            status,
        } => controller.network().record_external(NetworkEvent {
            url,
            duration_ms,
            status,
        }),
        HostEvent::TestEnd(end) => {
            if controller.on_test_end(end.test.identity(), end.status).is_some() {
                report.records += 1;
            }
        }
        HostEvent::RunEnd { counts } => {
            report.summary = controller.on_run_end(counts);
            return true;
        }
    }
    false
}

/// Feed a host event stream into the controller until `run_end` or EOF.
///
/// A read error still writes the summary before it is returned.
pub fn drive<R: BufRead>(
    controller: &RunController,
    queries: &SharedQueryLog,
    reader: R,
) -> Result<DriveReport, HostError> {
    let mut report = DriveReport::default();

    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                report.summary = controller.on_run_end(None);
                return Err(HostError::Read(e));
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event = match HostEvent::decode(trimmed) {
            Ok(event) => event,
            Err(e) => {
                let err = HostError::Decode {
                    line: index + 1,
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Skipping host event");
                report.skipped += 1;
                continue;
            }
        };

        report.events += 1;
        if apply(controller, queries, event, &mut report) {
            return Ok(report);
        }
    }

    tracing::warn!(run_id = controller.run_id(), "Host stream ended without run_end");
    report.truncated = true;
    report.summary = controller.on_run_end(None);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lifecycle_events() {
        assert_eq!(HostEvent::decode(r#"{"event":"run_start"}"#).unwrap(), HostEvent::RunStart);

        let start = HostEvent::decode(r#"{"event":"test_start","id":"t1","line":7}"#).unwrap();
        let HostEvent::TestStart(test) = start else {
            panic!("expected test_start");
        };
        assert_eq!(test.id, "t1");
        assert_eq!(test.line, Some(7));

        let end = HostEvent::decode(r#"{"event":"test_end","id":"t1","status":"failed"}"#).unwrap();
        let HostEvent::TestEnd(end) = end else {
            panic!("expected test_end");
        };
        assert_eq!(end.test.id, "t1");
        assert_eq!(end.status, TestStatus::Failed);
    }

    #[test]
    fn test_decode_query_keeps_raw_time() {
        let event = HostEvent::decode(r#"{"event":"query","sql":"SELECT 1","time":"abc"}"#).unwrap();
        assert_eq!(
            event,
            HostEvent::Query {
                sql: "SELECT 1".into(),
                time: Value::String("abc".into()),
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(HostEvent::decode(r#"{"event":"teardown"}"#).is_err());
        assert!(HostEvent::decode(r#"{"event":"test_end","id":"t1"}"#).is_err());
    }

    #[test]
    fn test_identity_from_node_id_with_overrides() {
        let mut test = HostTest::new("tests/test_api.py::TestUsers::test_list");
        test.line = Some(42);
        let identity = test.identity();
        assert_eq!(identity.name, "test_list");
        assert_eq!(identity.class_name, "TestUsers");
        assert_eq!(identity.module, "tests.test_api");
        assert_eq!(identity.line, 42);
    }

    #[test]
    fn test_identity_from_unittest_description() {
        let identity = HostTest::new("test_save (app.tests.ModelTests)").identity();
        assert_eq!(identity.name, "test_save");
        assert_eq!(identity.class_name, "ModelTests");
        assert_eq!(identity.file, "app/tests.py");
    }
}
