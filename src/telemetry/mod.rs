//! Engine self-observability: structured logging, spans and metrics.
//!
//! None of this touches the telemetry records themselves.

mod logging;
pub mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_blocked_outside_tests, record_collector_failure, record_sink_fallback,
    record_test_emitted,
};
pub use spans::{SpanExt, TestSpan};
