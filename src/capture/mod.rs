//! Event capture adapters.
//!
//! Thin shims over the two host-provided event streams: the executed-query log
//! and the outbound-call entry point.

pub mod network;
pub mod query_log;

use thiserror::Error;

pub use network::{
    BlockedCall, CallSite, InterceptionHandle, InterceptionManager, NetworkCallBlocked,
    NetworkEvent, NetworkPolicy, OutboundRequest, OutboundResponse, ScopeCalls, Transport,
    TransportError,
};
pub use query_log::{parse_duration_seconds, QueryEvent, QuerySource, RawQuery, SharedQueryLog};

/// Errors raised while reading a host event source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Query log unavailable: {0}")]
    Unavailable(String),

    #[error("Query log does not support reset")]
    ResetUnsupported,

    #[error("Watermark {watermark} is past the end of the query log ({len} entries)")]
    WatermarkAhead { watermark: usize, len: usize },
}
