//! trim-telemetry entry point.
//!
//! ## CLI Subcommands
//!
//! - `trim-telemetry ingest [FILE]` - Drive a run from host events
//! - `trim-telemetry summarize FILE` - Report on a telemetry file
//! - `trim-telemetry config show|defaults|validate` - Inspect configuration

use std::path::Path;
use std::process::ExitCode;

use trim_telemetry::cli::{self, config_cmd, summarize};
use trim_telemetry::config;
use trim_telemetry::telemetry::{init_logging, init_metrics};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "ingest" => {
            init_diagnostics();
            let input = args.get(2).filter(|a| a.as_str() != "-").map(Path::new);
            exit_code(cli::run_ingest(input))
        }
        "summarize" => {
            let Some(path) = args.get(2) else {
                eprintln!("Missing telemetry file");
                print_command_help("summarize");
                return ExitCode::FAILURE;
            };
            let json = has_flag(&args, "--json");
            let top = flag_value(&args, "--top")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(summarize::DEFAULT_TOP);
            exit_code(cli::run_summarize(Path::new(path), json, top))
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => exit_code(config_cmd::run_show(has_flag(&args, "--json"))),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("trim-telemetry {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

/// Logging goes to stderr so stdout stays clean for fallback records.
fn init_diagnostics() {
    let cfg = config::load();
    if let Err(e) = init_logging(&cfg.log) {
        eprintln!("Logging disabled: {}", e);
    }
    init_metrics();
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().skip(2).any(|a| a == flag)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .skip(2)
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 3))
        .map(|s| s.as_str())
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "trim-telemetry - per-test telemetry aggregation v{}

USAGE:
    trim-telemetry <COMMAND> [OPTIONS]

COMMANDS:
    ingest       Drive a run from newline-delimited host events
    summarize    Report on a finished telemetry file
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    host-runner --events | trim-telemetry ingest
    trim-telemetry ingest events.ndjson
    trim-telemetry summarize telemetry/run_20240301_120000.ndjson --top 10
    trim-telemetry config validate

ENVIRONMENT:
    TRIM_TELEMETRY_CONFIG         Optional TOML config file
    TRIM_TELEMETRY_DIR            Output directory (default: telemetry)
    TRIM_TELEMETRY_RUN_ID         Run id (default: run_<YYYYmmdd_HHMMSS>)
    TRIM_TELEMETRY_BLOCK_NETWORK  Block outbound calls instead of capturing
    TRIM_TELEMETRY_LOG_LEVEL      Diagnostic log filter (default: warn)

EXIT CODES:
    0  Success / no failed tests
    1  Failure / at least one failed test
    2  Input error
    130, 143  Interrupted by SIGINT / SIGTERM
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "ingest" => {
            eprintln!(
                "trim-telemetry ingest - Drive a run from host events

USAGE:
    trim-telemetry ingest [FILE|-]

DESCRIPTION:
    Reads one JSON event per line from FILE or stdin. Events are
    run_start, test_start, query, network, test_end and run_end.
    Malformed lines are skipped. If input ends without run_end, the
    summary is still written.

    Records go to <TRIM_TELEMETRY_DIR>/<run_id>.ndjson, or to stdout
    with TEST_RESULT:/TEST_SUMMARY: prefixes if the file is unusable.

EXAMPLES:
    trim-telemetry ingest events.ndjson
    host-runner --events | trim-telemetry ingest -
"
            );
        }
        "summarize" => {
            eprintln!(
                "trim-telemetry summarize - Report on a telemetry file

USAGE:
    trim-telemetry summarize FILE [--json] [--top N]

OPTIONS:
    --json    Output in JSON format
    --top N   Number of slowest tests to list (default: 5)
"
            );
        }
        "config" => {
            eprintln!(
                "trim-telemetry config - Inspect configuration

USAGE:
    trim-telemetry config <SUBCOMMAND>

SUBCOMMANDS:
    show [--json]  Print effective configuration
    defaults       Print built-in defaults
    validate       Check configuration (exit 1 on warnings)
"
            );
        }
        _ => {
            eprintln!("No help available for '{}'", command);
            print_usage();
        }
    }
}
