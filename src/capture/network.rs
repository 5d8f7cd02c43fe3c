//! Outbound call interception.
//!
//! The host routes every outbound call through one swappable entry point owned
//! by [`InterceptionManager`]. While at least one scope is interested, the
//! entry point is replaced by an interceptor; when the last scope releases,
//! the original transport is restored.
//!
//! Two policies exist and a run picks one:
//! - [`NetworkPolicy::Capture`]: forward to the real transport, then append a
//!   [`NetworkEvent`] to every active scope.
//! - [`NetworkPolicy::Block`]: refuse the call with [`NetworkCallBlocked`] and
//!   record where it came from.
//!
//! Under the blocking policy the run itself can hold the interceptor
//! ([`InterceptionManager::hold_for_run`]), so calls made between tests are
//! refused too. Those attempts have no scope to land in and are kept in a
//! run-level list instead.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which interception policy a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    Capture,
    Block,
}

/// Where an outbound call was made from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub thread: String,
}

impl CallSite {
    fn capture(location: &Location<'_>) -> Self {
        let function = tracing::Span::current()
            .metadata()
            .map(|m| m.name().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();

        Self {
            file: location.file().to_string(),
            line: location.line(),
            function,
            thread,
        }
    }
}

/// An outbound call as seen by the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    /// Filled in by [`InterceptionManager::call`].
    pub origin: Option<CallSite>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            origin: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl OutboundResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// A captured call, fanned out to every scope active when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl NetworkEvent {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            duration_ms: None,
            status: None,
        }
    }
}

/// A call refused under the blocking policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCall {
    pub url: String,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub thread: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Network call blocked in {file}:{line} ({function})")]
pub struct NetworkCallBlocked {
    pub url: String,
    pub file: String,
    pub line: u32,
    pub function: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Blocked(#[from] NetworkCallBlocked),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// The outbound-call entry point.
pub trait Transport: Send + Sync {
    fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse, TransportError>;

    /// Interceptors report `true` so they are never wrapped twice.
    fn is_interceptor(&self) -> bool {
        false
    }
}

impl<F> Transport for F
where
    F: Fn(&OutboundRequest) -> Result<OutboundResponse, TransportError> + Send + Sync,
{
    fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse, TransportError> {
        self(request)
    }
}

/// Everything one scope observed while it was active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeCalls {
    pub events: Vec<NetworkEvent>,
    pub blocked: Vec<BlockedCall>,
}

impl ScopeCalls {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.blocked.is_empty()
    }
}

type ScopeTable = Arc<Mutex<HashMap<String, ScopeCalls>>>;

/// Opaque registration of one scope with the shared interceptor.
///
/// Scopes active at the same time share a `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptionHandle {
    test_id: String,
    generation: u64,
}

impl InterceptionHandle {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct CapturingTransport {
    inner: Arc<dyn Transport>,
    scopes: ScopeTable,
}

impl Transport for CapturingTransport {
    fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let started = Instant::now();
        let result = self.inner.send(request);
        let event = NetworkEvent {
            url: request.url.clone(),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            status: result.as_ref().ok().map(|r| r.status),
        };

        for calls in self.scopes.lock().values_mut() {
            calls.events.push(event.clone());
        }
        result
    }

    fn is_interceptor(&self) -> bool {
        true
    }
}

struct BlockingTransport {
    scopes: ScopeTable,
    outside: Arc<Mutex<Vec<BlockedCall>>>,
}

impl Transport for BlockingTransport {
    fn send(&self, request: &OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let origin = request.origin.clone().unwrap_or_else(|| CallSite {
            file: "<unknown>".to_string(),
            line: 0,
            function: "<unknown>".to_string(),
            thread: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string(),
        });

        let attempt = BlockedCall {
            url: request.url.clone(),
            file: origin.file.clone(),
            line: origin.line,
            function: origin.function.clone(),
            thread: origin.thread.clone(),
            timestamp: crate::timestamp::now_iso8601(),
        };
        {
            let mut scopes = self.scopes.lock();
            if scopes.is_empty() {
                self.outside.lock().push(attempt);
            } else {
                for calls in scopes.values_mut() {
                    calls.blocked.push(attempt.clone());
                }
            }
        }

        tracing::debug!(url = %request.url, file = %origin.file, line = origin.line, "Blocked outbound call");
        Err(NetworkCallBlocked {
            url: request.url.clone(),
            file: origin.file,
            line: origin.line,
            function: origin.function,
        }
        .into())
    }

    fn is_interceptor(&self) -> bool {
        true
    }
}

/// Shared, reference-counted owner of the outbound entry point.
pub struct InterceptionManager {
    policy: NetworkPolicy,
    original: Arc<dyn Transport>,
    current: RwLock<Arc<dyn Transport>>,
    scopes: ScopeTable,
    generation: AtomicU64,
    run_hold: AtomicBool,
    outside: Arc<Mutex<Vec<BlockedCall>>>,
}

impl InterceptionManager {
    pub fn new(original: Arc<dyn Transport>, policy: NetworkPolicy) -> Self {
        Self {
            policy,
            current: RwLock::new(original.clone()),
            original,
            scopes: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            run_hold: AtomicBool::new(false),
            outside: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn policy(&self) -> NetworkPolicy {
        self.policy
    }

    /// Make an outbound call through whatever entry point is installed.
    #[track_caller]
    pub fn call(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let mut request = request;
        if request.origin.is_none() {
            request.origin = Some(CallSite::capture(Location::caller()));
        }
        // Clone out so the lock is not held across the real call.
        let transport = self.current.read().clone();
        transport.send(&request)
    }

    /// The currently installed entry point.
    pub fn entry_point(&self) -> Arc<dyn Transport> {
        self.current.read().clone()
    }

    /// Register interest for a scope, installing the interceptor on first use.
    pub fn acquire(&self, test_id: &str) -> InterceptionHandle {
        let mut scopes = self.scopes.lock();
        if scopes.is_empty() {
            self.install();
        }
        scopes.entry(test_id.to_string()).or_default();

        InterceptionHandle {
            test_id: test_id.to_string(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    /// Drop a scope's interest and hand back what it observed. The original
    /// entry point is restored when no scope remains and the run holds nothing.
    pub fn release(&self, handle: &InterceptionHandle) -> ScopeCalls {
        let mut scopes = self.scopes.lock();
        let calls = scopes.remove(&handle.test_id).unwrap_or_default();
        if scopes.is_empty() && !self.is_held_for_run() {
            self.teardown();
        }
        calls
    }

    /// Keep the blocking interceptor installed for the whole run.
    ///
    /// Returns `false` under the capture policy, where interception follows
    /// scope lifetimes only.
    pub fn hold_for_run(&self) -> bool {
        if self.policy != NetworkPolicy::Block {
            return false;
        }
        let _scopes = self.scopes.lock();
        self.run_hold.store(true, Ordering::SeqCst);
        self.install();
        true
    }

    /// Drop the run's hold and return the attempts blocked outside any scope.
    ///
    /// The original entry point comes back once no scope is live either.
    pub fn release_run(&self) -> Vec<BlockedCall> {
        let scopes = self.scopes.lock();
        if self.run_hold.swap(false, Ordering::SeqCst) && scopes.is_empty() {
            self.teardown();
        }
        std::mem::take(&mut *self.outside.lock())
    }

    pub fn is_held_for_run(&self) -> bool {
        self.run_hold.load(Ordering::SeqCst)
    }

    /// Attempts blocked so far while no scope was live.
    pub fn blocked_outside_scopes(&self) -> usize {
        self.outside.lock().len()
    }

    /// Append a call the host intercepted itself to every active scope.
    pub fn record_external(&self, event: NetworkEvent) {
        for calls in self.scopes.lock().values_mut() {
            calls.events.push(event.clone());
        }
    }

    pub fn is_installed(&self) -> bool {
        self.current.read().is_interceptor()
    }

    /// Number of scopes currently holding the interceptor.
    pub fn ref_count(&self) -> usize {
        self.scopes.lock().len()
    }

    pub fn is_active(&self, test_id: &str) -> bool {
        self.scopes.lock().contains_key(test_id)
    }

    /// Restore the original entry point and forget all scopes and the run hold.
    pub fn reset(&self) {
        let mut scopes = self.scopes.lock();
        scopes.clear();
        self.run_hold.store(false, Ordering::SeqCst);
        self.teardown();
    }

    fn install(&self) {
        let mut current = self.current.write();
        if current.is_interceptor() {
            tracing::debug!("Interceptor already installed, skipping re-wrap");
            return;
        }

        let interceptor: Arc<dyn Transport> = match self.policy {
            NetworkPolicy::Capture => Arc::new(CapturingTransport {
                inner: self.original.clone(),
                scopes: self.scopes.clone(),
            }),
            NetworkPolicy::Block => Arc::new(BlockingTransport {
                scopes: self.scopes.clone(),
                outside: self.outside.clone(),
            }),
        };
        *current = interceptor;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, policy = ?self.policy, "Installed outbound interceptor");
    }

    fn teardown(&self) {
        let mut current = self.current.write();
        if !current.is_interceptor() {
            return;
        }
        *current = self.original.clone();
        tracing::debug!("Restored original outbound entry point");
    }
}

impl std::fmt::Debug for InterceptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionManager")
            .field("policy", &self.policy)
            .field("installed", &self.is_installed())
            .field("ref_count", &self.ref_count())
            .field("held_for_run", &self.is_held_for_run())
            .finish()
    }
}
