// Copyright 2024-2026 trim-telemetry Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use tracing_subscriber::EnvFilter;

use crate::config::{self, ConfigError, EffectiveConfig, EnvConfig};

/// Print effective config as key-value pairs (or JSON) to stdout.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Print default config values (no file or env overrides) to stdout.
pub fn run_defaults() {
    print_config(&config::defaults());
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let warnings = validate(config::try_load());
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }

    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Collect warnings for a loaded configuration.
pub fn validate(loaded: Result<EnvConfig, ConfigError>) -> Vec<String> {
    let cfg = match loaded {
        Ok(cfg) => cfg,
        Err(e) => return vec![e.to_string()],
    };
    let mut warnings = Vec::new();

    if let Err(e) = EnvFilter::try_new(&cfg.log.level) {
        warnings.push(format!(
            "TRIM_TELEMETRY_LOG_LEVEL ({}) is not a valid filter: {}",
            cfg.log.level, e
        ));
    }

    if cfg.dir.exists() && !cfg.dir.is_dir() {
        warnings.push(format!(
            "TRIM_TELEMETRY_DIR ({}) is not a directory; records will go to stdout",
            cfg.dir.display()
        ));
    }

    if cfg.run_id.contains(['/', '\\']) {
        warnings.push(format!(
            "TRIM_TELEMETRY_RUN_ID ({}) contains a path separator",
            cfg.run_id
        ));
    }

    warnings
}

/// Render config as `KEY=value` lines.
pub fn render_config(cfg: &EffectiveConfig) -> Vec<String> {
    vec![
        format!("TRIM_TELEMETRY_DIR={}", cfg.dir),
        format!("TRIM_TELEMETRY_RUN_ID={}", cfg.run_id),
        format!("TRIM_TELEMETRY_SETTINGS_MODULE={}", cfg.settings_module),
        format!("TRIM_TELEMETRY_TESTS={}", cfg.tests),
        format!("TRIM_TELEMETRY_BLOCK_NETWORK={}", cfg.block_network),
        format!("TRIM_TELEMETRY_SIGNATURE_CHARS={}", cfg.signature_chars),
        format!("TRIM_TELEMETRY_SQL_MAX_CHARS={}", cfg.sql_max_chars),
        format!("TRIM_TELEMETRY_SLOW_MS={}", cfg.slow_ms),
        format!("TRIM_TELEMETRY_VERY_SLOW_MS={}", cfg.very_slow_ms),
        format!("TRIM_TELEMETRY_MODERATE_QUERIES={}", cfg.moderate_queries),
        format!("TRIM_TELEMETRY_HIGH_QUERIES={}", cfg.high_queries),
        format!("TRIM_TELEMETRY_LOG_LEVEL={}", cfg.log_level),
        format!("TRIM_TELEMETRY_LOG_FORMAT={}", cfg.log_format),
    ]
}

fn print_config(cfg: &EffectiveConfig) {
    for line in render_config(cfg) {
        println!("{}", line);
    }
}
