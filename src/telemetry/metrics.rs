//! Process metrics through the `metrics` facade.
//!
//! No exporter is installed here. Without a recorder every call is a no-op,
//! so the engine never depends on one being present.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use crate::record::TestStatus;

pub const TESTS_EMITTED: &str = "trim_telemetry_tests_emitted_total";
pub const SINK_FALLBACK: &str = "trim_telemetry_sink_fallback_total";
pub const COLLECTOR_FAILURES: &str = "trim_telemetry_collector_failures_total";
pub const TEST_DURATION: &str = "trim_telemetry_test_duration_ms";
pub const BLOCKED_OUTSIDE_TESTS: &str = "trim_telemetry_blocked_outside_tests_total";

/// Register metric descriptions with whatever recorder is installed.
pub fn init_metrics() {
    describe_counter!(TESTS_EMITTED, Unit::Count, "Test records written, by status");
    describe_counter!(
        SINK_FALLBACK,
        Unit::Count,
        "Lines that could not be written to the telemetry file"
    );
    describe_counter!(
        COLLECTOR_FAILURES,
        Unit::Count,
        "Collector errors collapsed to empty statistics"
    );
    describe_counter!(
        BLOCKED_OUTSIDE_TESTS,
        Unit::Count,
        "Outbound calls refused while no test was running"
    );
    describe_histogram!(TEST_DURATION, Unit::Milliseconds, "Test wall-clock duration");
}

pub fn record_test_emitted(status: TestStatus, duration_ms: u64) {
    counter!(TESTS_EMITTED, "status" => status.as_str()).increment(1);
    histogram!(TEST_DURATION).record(duration_ms as f64);
}

pub fn record_sink_fallback() {
    counter!(SINK_FALLBACK).increment(1);
}

/// `collector` is "database" or "network".
pub fn record_collector_failure(collector: &'static str) {
    counter!(COLLECTOR_FAILURES, "collector" => collector).increment(1);
}

pub fn record_blocked_outside_tests(count: u64) {
    counter!(BLOCKED_OUTSIDE_TESTS).increment(count);
}
