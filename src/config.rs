//! Configuration loading from environment variables and an optional TOML file.
//!
//! Values are layered: built-in defaults, then the file named by
//! `TRIM_TELEMETRY_CONFIG`, then `TRIM_TELEMETRY_*` variables. Invalid values
//! fall back to the layer below without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TRIM_TELEMETRY_CONFIG` | unset | TOML file applied before env overrides |
//! | `TRIM_TELEMETRY_DIR` | `telemetry` | Output directory |
//! | `TRIM_TELEMETRY_RUN_ID` | `run_<YYYYmmdd_HHMMSS>` | Run id and output file stem |
//! | `TRIM_TELEMETRY_SETTINGS_MODULE` | `core.settings` | Host settings module |
//! | `TRIM_TELEMETRY_TESTS` | empty | Comma-separated test targets |
//! | `TRIM_TELEMETRY_BLOCK_NETWORK` | `false` | Block outbound calls instead of capturing them |
//! | `TRIM_TELEMETRY_SIGNATURE_CHARS` | 100 | Duplicate signature length |
//! | `TRIM_TELEMETRY_SQL_MAX_CHARS` | 200 | Stored SQL length before truncation |
//! | `TRIM_TELEMETRY_SLOW_MS` | 2000 | `slow` flag threshold |
//! | `TRIM_TELEMETRY_VERY_SLOW_MS` | 5000 | `very_slow` flag threshold |
//! | `TRIM_TELEMETRY_MODERATE_QUERIES` | 50 | `moderate_db_queries` threshold |
//! | `TRIM_TELEMETRY_HIGH_QUERIES` | 100 | `high_db_queries` threshold |
//! | `TRIM_TELEMETRY_LOG_LEVEL` | `warn` | Diagnostic log filter |
//! | `TRIM_TELEMETRY_LOG_FORMAT` | `json` | `json` or `pretty` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::database::{DEFAULT_SIGNATURE_CHARS, DEFAULT_SQL_MAX_CHARS};
use crate::aggregate::{DatabaseReducer, Thresholds};
use crate::capture::NetworkPolicy;
use crate::controller::ControllerConfig;
use crate::telemetry::{LogConfig, LogFormat};
use crate::timestamp::run_id_now;

pub const DEFAULT_DIR: &str = "telemetry";
pub const DEFAULT_SETTINGS_MODULE: &str = "core.settings";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

const MIN_SIGNATURE_CHARS: usize = 1;
const MIN_SQL_MAX_CHARS: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Optional overrides read from the TOML file. Every key may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub dir: Option<PathBuf>,
    pub run_id: Option<String>,
    pub settings_module: Option<String>,
    pub tests: Option<Vec<String>>,
    pub block_network: Option<bool>,
    pub signature_chars: Option<usize>,
    pub sql_max_chars: Option<usize>,
    pub slow_ms: Option<u64>,
    pub very_slow_ms: Option<u64>,
    pub moderate_queries: Option<u64>,
    pub high_queries: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl FileConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&text, path)
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub dir: String,
    pub run_id: String,
    pub settings_module: String,
    pub tests: String,
    pub block_network: bool,
    pub signature_chars: usize,
    pub sql_max_chars: usize,
    pub slow_ms: u64,
    pub very_slow_ms: u64,
    pub moderate_queries: u64,
    pub high_queries: u64,
    pub log_level: String,
    pub log_format: String,
}

/// All configuration after layering.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub config_file: Option<PathBuf>,
    pub dir: PathBuf,
    pub run_id: String,
    pub settings_module: String,
    pub tests: Vec<String>,
    pub network_policy: NetworkPolicy,
    pub reducer: DatabaseReducer,
    pub thresholds: Thresholds,
    pub log: LogConfig,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn split_tests(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn load_reducer(file: &FileConfig) -> DatabaseReducer {
    let signature_chars = parse_usize(
        "TRIM_TELEMETRY_SIGNATURE_CHARS",
        file.signature_chars.unwrap_or(DEFAULT_SIGNATURE_CHARS),
    );
    let sql_max_chars = parse_usize(
        "TRIM_TELEMETRY_SQL_MAX_CHARS",
        file.sql_max_chars.unwrap_or(DEFAULT_SQL_MAX_CHARS),
    );
    DatabaseReducer {
        signature_chars: signature_chars.max(MIN_SIGNATURE_CHARS),
        sql_max_chars: sql_max_chars.max(MIN_SQL_MAX_CHARS),
    }
}

fn load_thresholds(file: &FileConfig) -> Thresholds {
    let defaults = Thresholds::default();
    let slow_ms = parse_u64("TRIM_TELEMETRY_SLOW_MS", file.slow_ms.unwrap_or(defaults.slow_ms));
    let very_slow_ms = parse_u64(
        "TRIM_TELEMETRY_VERY_SLOW_MS",
        file.very_slow_ms.unwrap_or(defaults.very_slow_ms),
    );
    let moderate_queries = parse_u64(
        "TRIM_TELEMETRY_MODERATE_QUERIES",
        file.moderate_queries.unwrap_or(defaults.moderate_queries),
    );
    let high_queries = parse_u64(
        "TRIM_TELEMETRY_HIGH_QUERIES",
        file.high_queries.unwrap_or(defaults.high_queries),
    );
    Thresholds {
        slow_ms,
        very_slow_ms: very_slow_ms.max(slow_ms),
        moderate_queries,
        high_queries: high_queries.max(moderate_queries),
    }
}

fn load_log_config(file: &FileConfig) -> LogConfig {
    let level = env_string("TRIM_TELEMETRY_LOG_LEVEL")
        .or_else(|| file.log_level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let format = env_string("TRIM_TELEMETRY_LOG_FORMAT")
        .or_else(|| file.log_format.clone())
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

fn build(config_file: Option<PathBuf>, file: FileConfig) -> EnvConfig {
    let dir = env_string("TRIM_TELEMETRY_DIR")
        .map(PathBuf::from)
        .or_else(|| file.dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR));
    let run_id = env_string("TRIM_TELEMETRY_RUN_ID")
        .or_else(|| file.run_id.clone())
        .unwrap_or_else(run_id_now);
    let settings_module = env_string("TRIM_TELEMETRY_SETTINGS_MODULE")
        .or_else(|| file.settings_module.clone())
        .unwrap_or_else(|| DEFAULT_SETTINGS_MODULE.to_string());
    let tests = match env_string("TRIM_TELEMETRY_TESTS") {
        Some(raw) => split_tests(&raw),
        None => file.tests.clone().unwrap_or_default(),
    };
    let block_network = parse_bool(
        "TRIM_TELEMETRY_BLOCK_NETWORK",
        file.block_network.unwrap_or(false),
    );

    EnvConfig {
        config_file,
        dir,
        run_id,
        settings_module,
        tests,
        network_policy: if block_network {
            NetworkPolicy::Block
        } else {
            NetworkPolicy::Capture
        },
        reducer: load_reducer(&file),
        thresholds: load_thresholds(&file),
        log: load_log_config(&file),
    }
}

/// Load configuration, surfacing a bad config file as an error.
pub fn try_load() -> Result<EnvConfig, ConfigError> {
    let config_file = env_string("TRIM_TELEMETRY_CONFIG").map(PathBuf::from);
    let file = match &config_file {
        Some(path) => FileConfig::read(path)?,
        None => FileConfig::default(),
    };
    Ok(build(config_file, file))
}

/// Load configuration. A bad config file is logged and ignored.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    match try_load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring config file");
            build(None, FileConfig::default())
        }
    }
}

/// Built-in defaults with no file or env applied.
pub fn defaults() -> EffectiveConfig {
    let thresholds = Thresholds::default();
    EffectiveConfig {
        dir: DEFAULT_DIR.to_string(),
        run_id: "run_<YYYYmmdd_HHMMSS>".to_string(),
        settings_module: DEFAULT_SETTINGS_MODULE.to_string(),
        tests: String::new(),
        block_network: false,
        signature_chars: DEFAULT_SIGNATURE_CHARS,
        sql_max_chars: DEFAULT_SQL_MAX_CHARS,
        slow_ms: thresholds.slow_ms,
        very_slow_ms: thresholds.very_slow_ms,
        moderate_queries: thresholds.moderate_queries,
        high_queries: thresholds.high_queries,
        log_level: DEFAULT_LOG_LEVEL.to_string(),
        log_format: "json".to_string(),
    }
}

impl EnvConfig {
    /// Built-in defaults for `run_id`, ignoring the environment and any file.
    pub fn builtin(run_id: impl Into<String>) -> Self {
        Self {
            config_file: None,
            dir: PathBuf::from(DEFAULT_DIR),
            run_id: run_id.into(),
            settings_module: DEFAULT_SETTINGS_MODULE.to_string(),
            tests: Vec::new(),
            network_policy: NetworkPolicy::Capture,
            reducer: DatabaseReducer::default(),
            thresholds: Thresholds::default(),
            log: LogConfig::default(),
        }
    }

    /// Where this run's records land.
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(format!("{}.ndjson", self.run_id))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            run_id: self.run_id.clone(),
            reducer: self.reducer,
            thresholds: self.thresholds,
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            dir: self.dir.display().to_string(),
            run_id: self.run_id.clone(),
            settings_module: self.settings_module.clone(),
            tests: self.tests.join(","),
            block_network: self.network_policy == NetworkPolicy::Block,
            signature_chars: self.reducer.signature_chars,
            sql_max_chars: self.reducer.sql_max_chars,
            slow_ms: self.thresholds.slow_ms,
            very_slow_ms: self.thresholds.very_slow_ms,
            moderate_queries: self.thresholds.moderate_queries,
            high_queries: self.thresholds.high_queries,
            log_level: self.log.level.clone(),
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
        }
    }
}
