//! Run controller tests: lifecycle, attribution and exactly-once output.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use trim_telemetry::aggregate::PerformanceFlag;
use trim_telemetry::capture::{
    InterceptionManager, NetworkPolicy, OutboundRequest, OutboundResponse, SharedQueryLog,
    Transport, TransportError,
};
use trim_telemetry::controller::{ControllerConfig, RunController};
use trim_telemetry::record::{TestIdentity, TestStatus};
use trim_telemetry::sink::{self, NdjsonSink, SinkLine};

struct Harness {
    controller: RunController,
    log: Arc<SharedQueryLog>,
    network: Arc<InterceptionManager>,
}

fn ok_transport() -> Arc<dyn Transport> {
    Arc::new(|_: &OutboundRequest| -> Result<OutboundResponse, TransportError> {
        Ok(OutboundResponse::with_status(200))
    })
}

fn harness_with(dir: &Path, log: SharedQueryLog, policy: NetworkPolicy) -> Harness {
    let log = Arc::new(log);
    let network = Arc::new(InterceptionManager::new(ok_transport(), policy));
    let sink = Arc::new(NdjsonSink::new(dir, "run_test"));
    let controller = RunController::new(
        ControllerConfig::new("run_test"),
        sink,
        log.clone(),
        network.clone(),
    );
    Harness {
        controller,
        log,
        network,
    }
}

fn harness(dir: &Path) -> Harness {
    harness_with(dir, SharedQueryLog::new(), NetworkPolicy::Capture)
}

fn lines(dir: &Path) -> Vec<SinkLine> {
    sink::read_file(&dir.join("run_test.ndjson")).unwrap()
}

fn test_records(dir: &Path) -> usize {
    lines(dir)
        .iter()
        .filter(|l| matches!(l, SinkLine::Test(_)))
        .count()
}

// ============================================================================
// Exactly-once
// ============================================================================

#[test]
fn test_exactly_one_record_per_test_and_one_summary() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_run_start();
    for i in 0..5 {
        let id = format!("tests/test_x.py::test_{}", i);
        h.controller.on_test_start(TestIdentity::from_node_id(&id));
        h.controller
            .on_test_end(TestIdentity::from_node_id(&id), TestStatus::Passed);
    }
    let summary = h.controller.on_run_end(None).unwrap();

    let lines = lines(dir.path());
    assert_eq!(lines.len(), 6);
    assert_eq!(test_records(dir.path()), 5);
    assert_eq!(summary.total_tests, 5);
    assert_eq!(summary.exit_code, 0);
    assert!(matches!(lines.last(), Some(SinkLine::Summary(s)) if s.total_tests == 5));
}

#[test]
fn test_duplicate_end_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("t"));
    assert!(h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Failed)
        .is_some());
    assert!(h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .is_none());

    assert_eq!(test_records(dir.path()), 1);
    assert_eq!(h.controller.counts().failed, 1);
    assert_eq!(h.controller.usage_errors(), 1);
}

#[test]
fn test_failures_set_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    for (id, status) in [
        ("a", TestStatus::Passed),
        ("b", TestStatus::Error),
        ("c", TestStatus::Skipped),
    ] {
        h.controller.on_test_start(TestIdentity::new(id));
        h.controller.on_test_end(TestIdentity::new(id), status);
    }
    let summary = h.controller.on_run_end(None).unwrap();

    assert_eq!(summary.passed_tests, 1);
    assert_eq!(summary.failed_tests, 1);
    assert_eq!(summary.skipped_tests, 1);
    assert_eq!(summary.exit_code, 1);
}

#[test]
fn test_emergency_summary_reports_partial_counts() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("done"));
    h.controller
        .on_test_end(TestIdentity::new("done"), TestStatus::Failed);
    h.controller.on_test_start(TestIdentity::new("in_flight"));

    let summary = h.controller.emergency_summary().unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.total_tests, 1);
    assert_eq!(summary.exit_code, 1);
    assert!(!h.network.is_installed());

    assert!(h.controller.on_run_end(None).is_none());
    let summaries = lines(dir.path())
        .into_iter()
        .filter(|l| matches!(l, SinkLine::Summary(_)))
        .count();
    assert_eq!(summaries, 1);
}

// ============================================================================
// Query attribution
// ============================================================================

#[test]
fn test_watermark_excludes_prior_queries_without_reset() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(dir.path(), SharedQueryLog::append_only(), NetworkPolicy::Capture);
    for i in 0..3 {
        h.log.record(format!("SELECT {}", i), "0.001");
    }

    h.controller.on_test_start(TestIdentity::new("t"));
    h.log.record("INSERT INTO t VALUES (1)", "0.002");
    h.log.record("UPDATE t SET a = 2", "0.003");
    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();

    assert_eq!(record.database.count, 2);
    assert_eq!(record.database.query_types.insert, 1);
    assert_eq!(record.database.query_types.update, 1);
    assert_eq!(record.database.query_types.select, 0);
    assert_eq!(record.database.total_duration_ms, 5);
}

#[test]
fn test_watermark_after_reset() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    for _ in 0..4 {
        h.log.record("SELECT 1", "0.001");
    }

    h.controller.on_test_start(TestIdentity::new("t"));
    h.log.record("DELETE FROM t", "0.001");
    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();

    assert_eq!(record.database.count, 1);
    assert_eq!(record.database.query_types.delete, 1);
}

#[test]
fn test_overlapping_scope_does_not_reset_under_a_live_scope() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("outer"));
    h.log.record("SELECT 1", "0.001");
    h.controller.on_test_start(TestIdentity::new("inner"));
    h.log.record("SELECT 2", "0.001");

    let inner = h
        .controller
        .on_test_end(TestIdentity::new("inner"), TestStatus::Passed)
        .unwrap();
    let outer = h
        .controller
        .on_test_end(TestIdentity::new("outer"), TestStatus::Passed)
        .unwrap();

    assert_eq!(inner.database.count, 1);
    assert_eq!(outer.database.count, 2);
}

#[test]
fn test_malformed_duration_does_not_propagate() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("t"));
    h.log.record("SELECT 1", "not-a-number");
    h.log.record("SELECT 2", json!(null));
    h.log.record("SELECT 3", "0.004");
    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();

    assert_eq!(record.database.count, 3);
    assert_eq!(record.database.total_duration_ms, 4);
    assert_eq!(record.database.queries[0].duration_ms, 0);
}

#[test]
fn test_duplicate_queries_reported_per_test() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("t"));
    h.log.record("select * from users where id = 1", "0.001");
    h.log.record("SELECT * FROM USERS WHERE ID = 1  ", "0.002");
    h.log.record("SELECT * FROM orders", "0.001");
    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();

    let dupes = &record.database.duplicate_queries;
    assert_eq!(dupes.len(), 1);
    assert_eq!(dupes[0].count, 2);
    assert_eq!(dupes[0].total_duration_ms, 3);
}

// ============================================================================
// Network attribution
// ============================================================================

#[test]
fn test_patch_survives_until_last_scope_ends() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    assert!(!h.network.is_installed());

    h.controller.on_test_start(TestIdentity::new("a"));
    h.controller.on_test_start(TestIdentity::new("b"));
    assert!(h.network.is_installed());
    assert_eq!(h.network.ref_count(), 2);

    h.controller.on_test_end(TestIdentity::new("a"), TestStatus::Passed);
    assert!(h.network.is_installed());

    h.controller.on_test_end(TestIdentity::new("b"), TestStatus::Passed);
    assert!(!h.network.is_installed());
    assert!(!h.network.entry_point().is_interceptor());
}

#[test]
fn test_calls_fan_out_to_every_active_scope() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_test_start(TestIdentity::new("a"));
    h.network.call(OutboundRequest::get("https://one.test")).unwrap();
    h.controller.on_test_start(TestIdentity::new("b"));
    h.network.call(OutboundRequest::get("https://two.test")).unwrap();

    let b = h
        .controller
        .on_test_end(TestIdentity::new("b"), TestStatus::Passed)
        .unwrap();
    let a = h
        .controller
        .on_test_end(TestIdentity::new("a"), TestStatus::Passed)
        .unwrap();

    assert_eq!(a.network.urls, vec!["https://one.test", "https://two.test"]);
    assert_eq!(b.network.urls, vec!["https://two.test"]);
    assert!(a.performance.is_network_heavy);
    assert!(a
        .performance
        .flags
        .contains(&PerformanceFlag::NetworkCallsBlocked));
}

#[test]
fn test_blocking_policy_refuses_and_records_origin() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(dir.path(), SharedQueryLog::new(), NetworkPolicy::Block);

    h.controller.on_test_start(TestIdentity::new("t"));
    let err = h
        .network
        .call(OutboundRequest::get("https://blocked.test"))
        .unwrap_err();
    assert!(matches!(err, TransportError::Blocked(_)));

    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();
    assert_eq!(record.network.blocked_calls.len(), 1);
    let blocked = &record.network.blocked_calls[0];
    assert_eq!(blocked.url, "https://blocked.test");
    assert!(blocked.file.ends_with("controller_test.rs"));
    assert!(blocked.line > 0);
    assert!(!h.network.is_installed());
}

#[test]
fn test_blocking_policy_covers_the_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let transport: Arc<dyn Transport> = Arc::new(
        move |_: &OutboundRequest| -> Result<OutboundResponse, TransportError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(OutboundResponse::with_status(200))
        },
    );
    let network = Arc::new(InterceptionManager::new(transport, NetworkPolicy::Block));
    let controller = RunController::new(
        ControllerConfig::new("run_test"),
        Arc::new(NdjsonSink::new(dir.path(), "run_test")),
        Arc::new(SharedQueryLog::new()),
        network.clone(),
    );

    controller.on_run_start();
    let before = network.call(OutboundRequest::get("https://before.test"));
    assert!(matches!(before, Err(TransportError::Blocked(_))));

    controller.on_test_start(TestIdentity::new("a"));
    let record = controller
        .on_test_end(TestIdentity::new("a"), TestStatus::Passed)
        .unwrap();
    assert!(record.network.blocked_calls.is_empty());

    let between = network.call(OutboundRequest::get("https://between.test"));
    assert!(matches!(between, Err(TransportError::Blocked(_))));
    assert!(network.is_installed());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let summary = controller.on_run_end(None).unwrap();
    assert_eq!(summary.blocked_outside_tests, 2);
    assert!(!network.is_installed());

    network.call(OutboundRequest::get("https://after.test")).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_emergency_summary_releases_run_level_block() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(dir.path(), SharedQueryLog::new(), NetworkPolicy::Block);

    h.controller.on_run_start();
    assert!(h.network.is_installed());
    let _ = h.network.call(OutboundRequest::get("https://setup.test"));

    let summary = h.controller.emergency_summary().unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.blocked_outside_tests, 1);
    assert!(!h.network.is_installed());
}

#[test]
fn test_capture_policy_does_not_hold_between_tests() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.controller.on_run_start();
    assert!(!h.network.is_installed());
    h.network.call(OutboundRequest::get("https://free.test")).unwrap();
    assert_eq!(h.controller.on_run_end(None).unwrap().blocked_outside_tests, 0);
}

#[test]
fn test_calls_outside_any_scope_are_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    h.network.call(OutboundRequest::get("https://early.test")).unwrap();
    h.controller.on_test_start(TestIdentity::new("t"));
    let record = h
        .controller
        .on_test_end(TestIdentity::new("t"), TestStatus::Passed)
        .unwrap();

    assert_eq!(record.network.total_calls, 0);
}

// ============================================================================
// Records
// ============================================================================

#[test]
fn test_record_carries_identity_and_timing() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let id = "tests/test_api.py::TestUsers::test_list";

    h.controller.on_test_start(TestIdentity::from_node_id(id).with_line(12));
    let record = h
        .controller
        .on_test_end(TestIdentity::from_node_id(id), TestStatus::Passed)
        .unwrap();

    assert_eq!(record.run_id, "run_test");
    assert_eq!(record.identity.class_name, "TestUsers");
    assert_eq!(record.identity.line, 12);
    assert!(record.start_time <= record.end_time);
    assert_eq!(record.performance.duration_ms, record.duration_ms);
    assert!(!record.scope_missing);

    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["class"], "TestUsers");
    assert_eq!(value["status"], "passed");
    assert!(value.get("scope_missing").is_none());
}
