// Copyright 2024-2026 trim-telemetry Contributors
// SPDX-License-Identifier: Apache-2.0

//! `ingest` subcommand: run the engine over a host event stream.
//!
//! A termination signal during ingestion writes the emergency summary and
//! exits with `128 + signo`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::config;
use crate::host::{self, DriveReport, HostError};
use crate::shutdown::SignalWatcher;
use crate::{DetachedTransport, Engine};

/// Drive `engine` from `reader` without any signal handling.
pub fn ingest<R: BufRead>(engine: &Engine, reader: R) -> Result<DriveReport, HostError> {
    host::drive(engine.controller(), engine.queries(), reader)
}

/// Run a full ingestion from `input` (stdin when `None`).
///
/// Returns the run's exit code: 0 if no test failed, 1 if any did, 2 if the
/// input could not be opened.
pub fn run_ingest(input: Option<&Path>) -> i32 {
    let engine = Engine::new(config::load(), Arc::new(DetachedTransport));

    let controller = engine.controller().clone();
    let watcher = SignalWatcher::spawn(move |signal| {
        controller.emergency_summary();
        std::process::exit(signal.exit_code());
    });
    let mut watcher = match watcher {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Signal handlers unavailable, interrupted runs will have no summary");
            None
        }
    };

    let result = match input {
        Some(path) => match File::open(path) {
            Ok(file) => ingest(&engine, BufReader::new(file)),
            Err(e) => {
                eprintln!("Error: cannot open {}: {}", path.display(), e);
                return 2;
            }
        },
        None => ingest(&engine, io::stdin().lock()),
    };

    if let Some(watcher) = watcher.as_mut() {
        watcher.stop();
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return engine.controller().counts().exit_code().max(1);
        }
    };

    if report.skipped > 0 {
        eprintln!("Skipped {} malformed event line(s)", report.skipped);
    }
    eprintln!(
        "Wrote {} test record(s) to {}",
        report.records,
        engine.controller().sink().path().display()
    );

    match report.summary {
        Some(summary) => summary.exit_code,
        None => engine.controller().counts().exit_code(),
    }
}
