//! Output records: one immutable record per test and one summary per run.
//!
//! These are the only shapes that ever reach the sink. Field names follow the
//! NDJSON schema consumed by CI dashboards, so renames here are breaking.

use serde::{Deserialize, Serialize};

use crate::aggregate::{DatabaseStats, NetworkStats, PerformanceBlock};

/// Value of the `type` tag that marks summary lines.
pub const SUMMARY_TYPE: &str = "test_run_summary";

/// Outcome of a single test, decided by the host and passed to `end_test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    /// Failed and errored tests both count against the exit code.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "ok" | "success" => Ok(Self::Passed),
            "failed" | "fail" | "failure" => Ok(Self::Failed),
            "error" | "errored" => Ok(Self::Error),
            "skipped" | "skip" => Ok(Self::Skipped),
            other => Err(format!("unknown test status: {}", other)),
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a test as reported by the host framework.
///
/// `id` is the map key for the live scope table and must be unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIdentity {
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub module: String,
    pub file: String,
    pub line: u32,
}

impl TestIdentity {
    /// Identity with only an id; every other field is derived from it.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            class_name: String::new(),
            module: String::new(),
            file: String::new(),
            line: 0,
        }
    }

    /// Parse a node id of the form `path/to/test_file.py::Class::test_name`.
    ///
    /// Two segments mean a module-level test function; three or more put the
    /// second segment in `class`.
    pub fn from_node_id(node_id: &str) -> Self {
        let parts: Vec<&str> = node_id.split("::").collect();
        if parts.len() < 2 {
            return Self::new(node_id);
        }

        let file = parts[0].to_string();
        let name = parts[parts.len() - 1].to_string();
        let class_name = if parts.len() > 2 {
            parts[1].to_string()
        } else {
            String::new()
        };
        let module = file.trim_end_matches(".py").replace('/', ".");

        Self {
            id: node_id.to_string(),
            name,
            class_name,
            module,
            file,
            line: 0,
        }
    }

    /// Parse a unittest description of the form `test_name (pkg.module.Class)`.
    pub fn from_unittest(description: &str) -> Self {
        let Some((name, rest)) = description.split_once(" (") else {
            return Self::new(description);
        };
        let Some(qualified) = rest.strip_suffix(')') else {
            return Self::new(description);
        };

        let (module, class_name) = match qualified.rsplit_once('.') {
            Some((module, class_name)) => (module.to_string(), class_name.to_string()),
            None => (String::new(), qualified.to_string()),
        };
        let file = if module.is_empty() {
            String::new()
        } else {
            format!("{}.py", module.replace('.', "/"))
        };

        Self {
            id: description.to_string(),
            name: name.trim().to_string(),
            class_name,
            module,
            file,
            line: 0,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

/// One test's telemetry. Built once at `end_test` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTelemetryRecord {
    pub run_id: String,
    #[serde(flatten)]
    pub identity: TestIdentity,
    pub status: TestStatus,
    pub duration_ms: u64,
    /// ISO-8601.
    pub start_time: String,
    /// ISO-8601.
    pub end_time: String,
    pub database: DatabaseStats,
    pub network: NetworkStats,
    pub performance: PerformanceBlock,
    /// Set when `end_test` found no live scope for this id.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scope_missing: bool,
}

/// Pass/fail tallies for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunCounts {
    pub fn record(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed | TestStatus::Error => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }

    /// `0` iff nothing failed.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }
}

/// The run-level summary line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub skipped_tests: u64,
    pub exit_code: i32,
    /// True when the summary was forced by a termination signal.
    #[serde(default)]
    pub interrupted: bool,
    /// Outbound calls refused while no test was running (blocking policy only).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub blocked_outside_tests: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, counts: RunCounts, interrupted: bool) -> Self {
        Self {
            run_id: run_id.into(),
            kind: SUMMARY_TYPE.to_string(),
            total_tests: counts.total,
            passed_tests: counts.passed,
            failed_tests: counts.failed,
            skipped_tests: counts.skipped,
            exit_code: counts.exit_code(),
            interrupted,
            blocked_outside_tests: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_with_class() {
        let identity = TestIdentity::from_node_id("tests/test_api.py::TestUsers::test_create");
        assert_eq!(identity.name, "test_create");
        assert_eq!(identity.class_name, "TestUsers");
        assert_eq!(identity.file, "tests/test_api.py");
        assert_eq!(identity.module, "tests.test_api");
    }

    #[test]
    fn test_node_id_without_class() {
        let identity = TestIdentity::from_node_id("test_api.py::test_health");
        assert_eq!(identity.name, "test_health");
        assert_eq!(identity.class_name, "");
        assert_eq!(identity.module, "test_api");
    }

    #[test]
    fn test_unittest_description() {
        let identity = TestIdentity::from_unittest("test_list (demo_app.tests.ItemTests)");
        assert_eq!(identity.id, "test_list (demo_app.tests.ItemTests)");
        assert_eq!(identity.name, "test_list");
        assert_eq!(identity.class_name, "ItemTests");
        assert_eq!(identity.module, "demo_app.tests");
        assert_eq!(identity.file, "demo_app/tests.py");
    }

    #[test]
    fn test_unparseable_identity_falls_back_to_id() {
        let identity = TestIdentity::from_unittest("weird-id");
        assert_eq!(identity.id, "weird-id");
        assert_eq!(identity.name, "weird-id");
    }

    #[test]
    fn test_counts_and_exit_code() {
        let mut counts = RunCounts::default();
        counts.record(TestStatus::Passed);
        counts.record(TestStatus::Skipped);
        assert_eq!(counts.exit_code(), 0);

        counts.record(TestStatus::Error);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.exit_code(), 1);
    }

    #[test]
    fn test_summary_serializes_type_tag() {
        let summary = RunSummary::new("run_1", RunCounts::default(), false);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "test_run_summary");
        assert_eq!(json["exit_code"], 0);
        assert!(json.get("blocked_outside_tests").is_none());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("PASSED".parse::<TestStatus>(), Ok(TestStatus::Passed));
        assert_eq!("errored".parse::<TestStatus>(), Ok(TestStatus::Error));
        assert!("flaky".parse::<TestStatus>().is_err());
    }
}
