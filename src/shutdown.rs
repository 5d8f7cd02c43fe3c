//! Termination signal handling.
//!
//! [`SignalWatcher`] owns a dedicated thread running a single-threaded tokio
//! runtime that waits for SIGINT or SIGTERM. When one arrives it runs the
//! caller's callback, typically [`RunController::emergency_summary`] followed
//! by a process exit.
//!
//! [`RunController::emergency_summary`]: crate::controller::RunController::emergency_summary

use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;

/// A termination signal the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// Conventional `128 + signo` exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Watcher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Watching,
    Signalled(ShutdownSignal),
    Stopped,
}

pub struct SignalWatcher {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Option<ShutdownSignal>>>,
    state: ShutdownState,
}

impl SignalWatcher {
    /// Start watching. Returns once the handlers are registered, so a signal
    /// sent after this call is guaranteed to reach `on_signal`.
    pub fn spawn<F>(on_signal: F) -> io::Result<Self>
    where
        F: FnOnce(ShutdownSignal) + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();

        let thread = std::thread::Builder::new()
            .name("trim-telemetry-signals".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return None;
                    }
                };

                let received = runtime.block_on(wait_for_signal(ready_tx, stop_rx));
                if let Some(signal) = received {
                    tracing::warn!(signal = signal.as_str(), "Termination signal received");
                    on_signal(signal);
                }
                received
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "signal thread exited before registering handlers",
                ));
            }
        }

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
            state: ShutdownState::Watching,
        })
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Block until a signal arrives (and its callback returns) or the watcher is stopped.
    pub fn wait(mut self) -> Option<ShutdownSignal> {
        self.join()
    }

    /// Stop watching without waiting for a signal.
    pub fn stop(&mut self) -> Option<ShutdownSignal> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.join()
    }

    fn join(&mut self) -> Option<ShutdownSignal> {
        let received = self.thread.take().and_then(|t| t.join().ok()).flatten();
        self.state = match received {
            Some(signal) => ShutdownState::Signalled(signal),
            None => ShutdownState::Stopped,
        };
        received
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for SignalWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWatcher").field("state", &self.state).finish()
    }
}

#[cfg(unix)]
async fn wait_for_signal(
    ready: mpsc::Sender<io::Result<()>>,
    stop: oneshot::Receiver<()>,
) -> Option<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let registered = signal(SignalKind::interrupt())
        .and_then(|interrupt| signal(SignalKind::terminate()).map(|terminate| (interrupt, terminate)));
    let (mut interrupt, mut terminate) = match registered {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready.send(Err(e));
            return None;
        }
    };
    let _ = ready.send(Ok(()));

    tokio::select! {
        _ = interrupt.recv() => Some(ShutdownSignal::Interrupt),
        _ = terminate.recv() => Some(ShutdownSignal::Terminate),
        _ = stop => None,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(
    ready: mpsc::Sender<io::Result<()>>,
    stop: oneshot::Receiver<()>,
) -> Option<ShutdownSignal> {
    let _ = ready.send(Ok(()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.ok().map(|()| ShutdownSignal::Interrupt),
        _ = stop => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
    }

    #[test]
    fn test_stop_without_signal() {
        let mut watcher = SignalWatcher::spawn(|_| panic!("no signal was sent")).unwrap();
        assert_eq!(watcher.state(), ShutdownState::Watching);
        assert_eq!(watcher.stop(), None);
        assert_eq!(watcher.state(), ShutdownState::Stopped);
    }
}
