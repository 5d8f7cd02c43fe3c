// Copyright 2024-2026 trim-telemetry Contributors
// SPDX-License-Identifier: Apache-2.0

//! `summarize` subcommand: report on a finished telemetry file.

use std::path::Path;

use serde::Serialize;

use crate::aggregate::{DurationHistory, PercentileSnapshot};
use crate::record::{RunCounts, RunSummary};
use crate::sink::{self, SinkLine};

/// Slowest tests listed by default.
pub const DEFAULT_TOP: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlowTest {
    pub id: String,
    pub duration_ms: u64,
    pub query_count: u64,
}

/// Digest of one telemetry file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub counts: RunCounts,
    pub durations: PercentileSnapshot,
    pub total_queries: u64,
    pub duplicate_groups: u64,
    pub network_calls: u64,
    pub flagged_tests: u64,
    pub slowest: Vec<SlowTest>,
    /// The summary line, if the run wrote one.
    pub summary: Option<RunSummary>,
}

pub fn summarize(lines: &[SinkLine], top: usize) -> RunReport {
    let mut counts = RunCounts::default();
    let mut history = DurationHistory::new();
    let mut run_id = None;
    let mut summary = None;
    let mut total_queries = 0;
    let mut duplicate_groups = 0;
    let mut network_calls = 0;
    let mut flagged_tests = 0;
    let mut slowest = Vec::new();

    for line in lines {
        match line {
            SinkLine::Test(record) => {
                run_id.get_or_insert_with(|| record.run_id.clone());
                counts.record(record.status);
                history.push(record.duration_ms as f64);
                total_queries += record.database.count;
                duplicate_groups += record.database.duplicate_queries.len() as u64;
                network_calls += record.network.total_calls;
                if !record.performance.flags.is_empty() {
                    flagged_tests += 1;
                }
                slowest.push(SlowTest {
                    id: record.identity.id.clone(),
                    duration_ms: record.duration_ms,
                    query_count: record.database.count,
                });
            }
            SinkLine::Summary(s) => {
                run_id.get_or_insert_with(|| s.run_id.clone());
                summary = Some(s.clone());
            }
        }
    }

    slowest.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms).then_with(|| a.id.cmp(&b.id)));
    slowest.truncate(top);

    RunReport {
        run_id,
        counts,
        durations: history.snapshot(),
        total_queries,
        duplicate_groups,
        network_calls,
        flagged_tests,
        slowest,
        summary,
    }
}

/// Print a report for `path`. Returns 0 on success, 1 if the file cannot be read.
pub fn run_summarize(path: &Path, json: bool, top: usize) -> i32 {
    let lines = match sink::read_file(path) {
        Ok(lines) => lines,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            return 1;
        }
    };
    let report = summarize(&lines, top);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        print_report(&report);
    }
    0
}

fn print_report(report: &RunReport) {
    println!("Run:        {}", report.run_id.as_deref().unwrap_or("<unknown>"));
    println!(
        "Tests:      {} total, {} passed, {} failed, {} skipped",
        report.counts.total, report.counts.passed, report.counts.failed, report.counts.skipped
    );
    println!(
        "Durations:  p50 {:.1} ms, p95 {:.1} ms, p99 {:.1} ms",
        report.durations.p50, report.durations.p95, report.durations.p99
    );
    println!(
        "Queries:    {} total, {} duplicate group(s)",
        report.total_queries, report.duplicate_groups
    );
    println!("Network:    {} call(s)", report.network_calls);
    println!("Flagged:    {} test(s)", report.flagged_tests);

    match &report.summary {
        Some(summary) if summary.interrupted => {
            println!("Summary:    interrupted, exit code {}", summary.exit_code)
        }
        Some(summary) => println!("Summary:    exit code {}", summary.exit_code),
        None => println!("Summary:    missing"),
    }

    if !report.slowest.is_empty() {
        println!();
        println!("Slowest tests:");
        for test in &report.slowest {
            println!(
                "  {:>8} ms  {:>4} queries  {}",
                test.duration_ms, test.query_count, test.id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{DatabaseStats, NetworkStats, PerformanceBlock};
    use crate::record::{TestIdentity, TestStatus, TestTelemetryRecord};

    fn record(id: &str, status: TestStatus, duration_ms: u64) -> SinkLine {
        SinkLine::Test(Box::new(TestTelemetryRecord {
            run_id: "r".into(),
            identity: TestIdentity::new(id),
            status,
            duration_ms,
            start_time: String::new(),
            end_time: String::new(),
            database: DatabaseStats::default(),
            network: NetworkStats::default(),
            performance: PerformanceBlock::default(),
            scope_missing: false,
        }))
    }

    #[test]
    fn test_summarize_counts_and_percentiles() {
        let lines = vec![
            record("a", TestStatus::Passed, 10),
            record("b", TestStatus::Failed, 30),
            record("c", TestStatus::Skipped, 20),
        ];
        let report = summarize(&lines, 2);

        assert_eq!(report.run_id.as_deref(), Some("r"));
        assert_eq!(report.counts.total, 3);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.durations.p50, 20.0);
        assert_eq!(report.slowest.len(), 2);
        assert_eq!(report.slowest[0].id, "b");
        assert!(report.summary.is_none());
    }

    #[test]
    fn test_summarize_empty_file() {
        let report = summarize(&[], DEFAULT_TOP);
        assert_eq!(report.counts, RunCounts::default());
        assert_eq!(report.durations, PercentileSnapshot::default());
    }
}
