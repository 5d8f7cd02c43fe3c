// Copyright 2024-2026 trim-telemetry Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for trim-telemetry.
//!
//! ## Usage
//!
//! ```bash
//! trim-telemetry ingest [FILE]          # Drive a run from host events (stdin by default)
//! trim-telemetry summarize FILE         # Report on a finished telemetry file
//! trim-telemetry config show            # Print effective configuration
//! ```

pub mod config_cmd;
pub mod ingest;
pub mod summarize;

pub use ingest::{ingest, run_ingest};
pub use summarize::{run_summarize, summarize, RunReport, SlowTest};
