//! Span utilities and extension traits.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-test spans.
pub struct TestSpan;

impl TestSpan {
    /// Span covering one test's end-of-scope aggregation.
    ///
    /// `status` carries the test outcome; `duration_ms` and `query_count` are
    /// filled in as the record is built.
    pub fn new(run_id: &str, test_id: &str) -> Span {
        info_span!(
            "test_scope",
            run_id = %run_id,
            test_id = %test_id,
            status = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            query_count = tracing::field::Empty,
        )
    }

    /// Child span for one collector; [`SpanExt::record_result`] fills it.
    pub fn collector(collector: &'static str) -> Span {
        info_span!(
            "collector",
            collector = collector,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
