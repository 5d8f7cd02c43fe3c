//! trim-telemetry
//!
//! Per-test telemetry for automated test runs. The engine tracks each test
//! from start to end, attributes executed database queries and outbound
//! network calls to it, and writes one immutable NDJSON record per test plus
//! one summary per run.
//!
//! # Guarantees
//!
//! - Telemetry never changes a test outcome: every lifecycle callback is
//!   infallible and collector failures degrade to zero-valued statistics.
//! - Exactly one record per test id and exactly one summary per run, even
//!   when the run is interrupted by a signal.
//! - Output is append-only. If the output file is unusable, the same JSON
//!   goes to stdout behind `TEST_RESULT:` / `TEST_SUMMARY:` markers.
//!
//! # Attribution
//!
//! - Queries: positional. A scope records the query log length when it
//!   starts and owns everything appended after that.
//! - Network calls: fan-out. One shared interceptor appends each call to
//!   every scope active at call time.

pub mod aggregate;
pub mod capture;
pub mod cli;
pub mod config;
pub mod controller;
pub mod host;
pub mod record;
pub mod scope;
pub mod shutdown;
pub mod sink;
pub mod telemetry;
pub mod timestamp;

use std::sync::Arc;

use capture::{
    InterceptionManager, OutboundRequest, OutboundResponse, SharedQueryLog, Transport,
    TransportError,
};
use config::EnvConfig;
use controller::RunController;
use sink::NdjsonSink;

/// Transport for processes that only relay calls reported by the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedTransport;

impl Transport for DetachedTransport {
    fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse, TransportError> {
        Err(TransportError::Connection(format!(
            "no outbound transport attached for {}",
            request.url
        )))
    }
}

/// A fully wired telemetry engine for one run.
pub struct Engine {
    config: EnvConfig,
    queries: Arc<SharedQueryLog>,
    network: Arc<InterceptionManager>,
    controller: Arc<RunController>,
}

impl Engine {
    /// Create an engine writing to the configured directory, with stdout fallback.
    pub fn new(config: EnvConfig, transport: Arc<dyn Transport>) -> Self {
        let sink = NdjsonSink::new(&config.dir, &config.run_id);
        Self::with_sink(config, transport, sink)
    }

    pub fn with_sink(config: EnvConfig, transport: Arc<dyn Transport>, sink: NdjsonSink) -> Self {
        let queries = Arc::new(SharedQueryLog::new());
        let network = Arc::new(InterceptionManager::new(transport, config.network_policy));
        let controller = Arc::new(RunController::new(
            config.controller_config(),
            Arc::new(sink),
            queries.clone(),
            network.clone(),
        ));

        Self {
            config,
            queries,
            network,
            controller,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// The query log the host's database layer appends to.
    pub fn queries(&self) -> &Arc<SharedQueryLog> {
        &self.queries
    }

    /// The outbound entry point the host routes calls through.
    pub fn network(&self) -> &Arc<InterceptionManager> {
        &self.network
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("run_id", &self.config.run_id)
            .field("controller", &self.controller)
            .finish()
    }
}
