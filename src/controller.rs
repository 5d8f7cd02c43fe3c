//! Run controller: the single owner of run state.
//!
//! Lifecycle callbacks arrive from the host. Each one is infallible from the
//! caller's point of view; usage errors and collector failures are logged,
//! counted, and replaced with zero-valued output.
//!
//! Under the blocking network policy the run holds the interceptor from run
//! start to run end, so calls between tests are refused as well.
//!
//! Start order for a test:
//! 1. read the query log length
//! 2. reset the log if it supports it and no other scope is live
//! 3. take the watermark from the length after any reset
//! 4. acquire the shared network interceptor
//!
//! End order:
//! 1. collect database statistics from the watermark
//! 2. release the network scope, tearing the interceptor down at zero
//! 3. reduce into a record and write it
//!
//! Exactly one record is written per test id and exactly one summary per run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::aggregate::{
    database, DatabaseReducer, DatabaseStats, DurationHistory, NetworkStats, Thresholds,
};
use crate::capture::{CaptureError, InterceptionManager, QuerySource};
use crate::record::{RunCounts, RunSummary, TestIdentity, TestStatus, TestTelemetryRecord};
use crate::scope::{ScopeTracker, TestScope};
use crate::sink::NdjsonSink;
use crate::telemetry::{metrics, SpanExt, TestSpan};
use crate::timestamp::iso8601;

/// How long the emergency path waits for in-progress callbacks before giving up on scope cleanup.
const EMERGENCY_LOCK_WAIT: Duration = Duration::from_millis(500);

/// Per-run settings for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub run_id: String,
    pub reducer: DatabaseReducer,
    pub thresholds: Thresholds,
}

impl ControllerConfig {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            reducer: DatabaseReducer::default(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Default)]
struct RunState {
    started: bool,
    scopes: ScopeTracker,
    history: DurationHistory,
    completed: HashSet<String>,
    usage_errors: u64,
}

pub struct RunController {
    config: ControllerConfig,
    sink: Arc<NdjsonSink>,
    queries: Arc<dyn QuerySource>,
    network: Arc<InterceptionManager>,
    state: Mutex<RunState>,
    // Kept apart from `state` so the emergency path can read it without
    // waiting behind an in-progress callback.
    counts: Mutex<RunCounts>,
    summary_emitted: AtomicBool,
}

impl RunController {
    pub fn new(
        config: ControllerConfig,
        sink: Arc<NdjsonSink>,
        queries: Arc<dyn QuerySource>,
        network: Arc<InterceptionManager>,
    ) -> Self {
        Self {
            config,
            sink,
            queries,
            network,
            state: Mutex::new(RunState::default()),
            counts: Mutex::new(RunCounts::default()),
            summary_emitted: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.config.run_id
    }

    pub fn sink(&self) -> &Arc<NdjsonSink> {
        &self.sink
    }

    pub fn network(&self) -> &Arc<InterceptionManager> {
        &self.network
    }

    /// Tallies of records written so far.
    pub fn counts(&self) -> RunCounts {
        *self.counts.lock()
    }

    /// Double starts, unknown ends and duplicate ends seen this run.
    pub fn usage_errors(&self) -> u64 {
        self.state.lock().usage_errors
    }

    pub fn live_scopes(&self) -> usize {
        self.state.lock().scopes.len()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn summary_emitted(&self) -> bool {
        self.summary_emitted.load(Ordering::SeqCst)
    }

    pub fn on_run_start(&self) {
        let mut state = self.state.lock();
        if state.started {
            tracing::debug!(run_id = %self.config.run_id, "Run already started");
            return;
        }
        state.started = true;
        let held = self.network.hold_for_run();
        tracing::info!(
            run_id = %self.config.run_id,
            path = %self.sink.path().display(),
            network_blocked = held,
            "Telemetry run started"
        );
    }

    /// Begin tracking a test. Returns `false` when the start was rejected as a
    /// usage error; the test itself is unaffected either way.
    pub fn on_test_start(&self, identity: TestIdentity) -> bool {
        let mut state = self.state.lock();
        let test_id = identity.id.clone();

        if state.scopes.is_running(&test_id) || state.completed.contains(&test_id) {
            state.usage_errors += 1;
            tracing::warn!(test_id = %test_id, "Test started twice, ignoring second start");
            return false;
        }

        let mut scope = TestScope::new(identity);
        let watermark = self.take_watermark(state.scopes.is_empty());
        let handle = self.network.acquire(&test_id);
        scope.query_watermark = watermark;
        scope.network_handle = Some(handle.clone());

        match state.scopes.start(scope).map(|_| ()) {
            Ok(()) => {
                tracing::debug!(test_id = %test_id, watermark = ?watermark, "Test scope started");
                true
            }
            Err(e) => {
                state.usage_errors += 1;
                self.network.release(&handle);
                tracing::warn!(error = %e, "Could not start test scope");
                false
            }
        }
    }

    /// Finish a test and write its record.
    ///
    /// Returns `None` only when the id already produced a record this run.
    /// An id that was never started still yields a zero-valued record with
    /// `scope_missing` set.
    pub fn on_test_end(&self, identity: TestIdentity, status: TestStatus) -> Option<TestTelemetryRecord> {
        let span = TestSpan::new(&self.config.run_id, &identity.id);
        let _enter = span.enter();
        span.record("status", status.as_str());

        let mut state = self.state.lock();
        if state.completed.contains(&identity.id) {
            state.usage_errors += 1;
            tracing::warn!(test_id = %identity.id, "Test ended twice, dropping second record");
            return None;
        }

        let record = match state.scopes.end(&identity.id) {
            Ok(scope) => {
                let end_time = Utc::now();
                let duration_ms = scope.elapsed_ms();

                let database = self.collect_database(&scope);
                let calls = scope
                    .network_handle
                    .as_ref()
                    .map(|handle| self.network.release(handle))
                    .unwrap_or_default();
                let network = NetworkStats::from_calls(&calls);

                state.history.push(duration_ms as f64);
                let performance = self.config.thresholds.performance(
                    duration_ms,
                    database.count,
                    network.has_activity(),
                    state.history.snapshot(),
                );

                TestTelemetryRecord {
                    run_id: self.config.run_id.clone(),
                    identity: scope.identity,
                    status,
                    duration_ms,
                    start_time: iso8601(scope.start_time),
                    end_time: iso8601(end_time),
                    database,
                    network,
                    performance,
                    scope_missing: false,
                }
            }
            Err(e) => {
                state.usage_errors += 1;
                tracing::warn!(error = %e, "Ending a test with no live scope, writing empty record");
                self.missing_scope_record(identity, status, &state.history)
            }
        };

        span.record("duration_ms", record.duration_ms);
        span.record("query_count", record.database.count);

        state.completed.insert(record.identity.id.clone());
        self.counts.lock().record(status);
        metrics::record_test_emitted(status, record.duration_ms);
        self.sink.write(&record);
        Some(record)
    }

    /// Finish the run and write the summary.
    ///
    /// `host_counts` overrides the tallies observed here when the host reports
    /// its own. Returns `None` if a summary was already written.
    pub fn on_run_end(&self, host_counts: Option<RunCounts>) -> Option<RunSummary> {
        {
            let mut state = self.state.lock();
            let leftover = state.scopes.drain();
            if !leftover.is_empty() {
                tracing::warn!(count = leftover.len(), "Run ended with tests still running");
            }
            for scope in &leftover {
                if let Some(handle) = &scope.network_handle {
                    self.network.release(handle);
                }
            }
        }
        let blocked_outside = self.release_run_hold();

        let counts = host_counts.unwrap_or_else(|| self.counts());
        self.emit_summary(counts, false, blocked_outside)
    }

    /// Write the best-available summary after a termination signal.
    ///
    /// Never blocks indefinitely: if a callback holds the run state, live
    /// scopes are left alone and the interceptor is reset directly.
    pub fn emergency_summary(&self) -> Option<RunSummary> {
        if self.summary_emitted() {
            return None;
        }

        match self.state.try_lock_for(EMERGENCY_LOCK_WAIT) {
            Some(mut state) => {
                let leftover = state.scopes.drain();
                tracing::warn!(live = leftover.len(), "Interrupted, writing emergency summary");
            }
            None => tracing::warn!("Interrupted mid-callback, writing emergency summary"),
        }
        let blocked_outside = self.release_run_hold();
        self.network.reset();

        let counts = self.counts();
        self.emit_summary(counts, true, blocked_outside)
    }

    /// Tear down a run-level interceptor and count what it refused outside tests.
    fn release_run_hold(&self) -> u64 {
        let outside = self.network.release_run();
        if !outside.is_empty() {
            for call in &outside {
                tracing::debug!(url = %call.url, file = %call.file, line = call.line, "Call blocked outside any test");
            }
            tracing::warn!(count = outside.len(), "Outbound calls were blocked while no test was running");
            metrics::record_blocked_outside_tests(outside.len() as u64);
        }
        outside.len() as u64
    }

    fn emit_summary(
        &self,
        counts: RunCounts,
        interrupted: bool,
        blocked_outside: u64,
    ) -> Option<RunSummary> {
        if self.summary_emitted.swap(true, Ordering::SeqCst) {
            tracing::debug!(run_id = %self.config.run_id, "Summary already written");
            return None;
        }

        let mut summary = RunSummary::new(self.config.run_id.clone(), counts, interrupted);
        summary.blocked_outside_tests = blocked_outside;
        self.sink.write_summary(&summary);
        tracing::info!(
            run_id = %summary.run_id,
            total = summary.total_tests,
            failed = summary.failed_tests,
            interrupted,
            "Telemetry run finished"
        );
        Some(summary)
    }

    fn take_watermark(&self, sole_scope: bool) -> Option<usize> {
        let pre_start = match self.queries.len() {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!(error = %e, "Query log unavailable at test start");
                metrics::record_collector_failure("database");
                return None;
            }
        };

        // Resetting under another live scope would invalidate its watermark.
        if !sole_scope {
            return Some(pre_start);
        }
        match self.queries.reset() {
            Ok(()) => self.queries.len().ok(),
            Err(CaptureError::ResetUnsupported) => Some(pre_start),
            Err(e) => {
                tracing::debug!(error = %e, "Query log reset failed");
                Some(pre_start)
            }
        }
    }

    fn collect_database(&self, scope: &TestScope) -> DatabaseStats {
        let span = TestSpan::collector("database");
        let _enter = span.enter();
        let result = match scope.query_watermark {
            Some(watermark) => database::collect(self.queries.as_ref(), watermark, &self.config.reducer),
            None => Err(CaptureError::Unavailable(
                "query log was unreadable at test start".to_string(),
            )),
        };
        span.record_result(&result);

        result.unwrap_or_else(|e| {
            tracing::debug!(collector = "database", error = %e, "Collector failed, using empty stats");
            metrics::record_collector_failure("database");
            DatabaseStats::default()
        })
    }

    fn missing_scope_record(
        &self,
        identity: TestIdentity,
        status: TestStatus,
        history: &DurationHistory,
    ) -> TestTelemetryRecord {
        let now = iso8601(Utc::now());
        TestTelemetryRecord {
            run_id: self.config.run_id.clone(),
            identity,
            status,
            duration_ms: 0,
            start_time: now.clone(),
            end_time: now,
            database: DatabaseStats::default(),
            network: NetworkStats::default(),
            performance: self
                .config
                .thresholds
                .performance(0, 0, false, history.snapshot()),
            scope_missing: true,
        }
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("run_id", &self.config.run_id)
            .field("counts", &self.counts())
            .field("summary_emitted", &self.summary_emitted())
            .finish()
    }
}
