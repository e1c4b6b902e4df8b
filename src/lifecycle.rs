//! Coordinated shutdown.
//!
//! OS signals, child exit and listener failures all funnel into one
//! [`Shutdown`]. The first trigger wins: it records its reason, logs once and
//! cancels the shared token every component watches. Later triggers are
//! no-ops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why shutdown started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal was received.
    Signal(&'static str),
    /// The supervised process terminated.
    ChildExited,
    /// A listener could not bind or its accept loop aborted.
    ListenerFailed {
        /// Listener name, e.g. `https`.
        listener: String,
        /// Rendered error.
        message: String,
    },
    /// The overlay network could not be joined.
    BringUpFailed(String),
}

impl ShutdownReason {
    /// Whether this reason makes the run a failure regardless of the child's exit.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ShutdownReason::ListenerFailed { .. } | ShutdownReason::BringUpFailed(_)
        )
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {name}"),
            ShutdownReason::ChildExited => f.write_str("child process exited"),
            ShutdownReason::ListenerFailed { listener, message } => {
                write!(f, "{listener} listener failed: {message}")
            }
            ShutdownReason::BringUpFailed(message) => {
                write!(f, "overlay bring-up failed: {message}")
            }
        }
    }
}

/// Single-fire shutdown trigger shared by every component.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
    failed: Arc<AtomicBool>,
}

impl Shutdown {
    /// Create an untriggered shutdown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown fires.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire shutdown. Returns true only for the first call.
    ///
    /// Failure reasons are remembered even when they arrive after shutdown
    /// already started.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        if reason.is_failure() {
            self.failed.store(true, Ordering::SeqCst);
        }

        match self.reason.set(reason) {
            Ok(()) => {
                if let Some(reason) = self.reason.get() {
                    if reason.is_failure() {
                        error!("Shutting down: {reason}");
                    } else {
                        info!("Shutting down: {reason}");
                    }
                }
                self.token.cancel();
                true
            }
            Err(reason) => {
                debug!("Shutdown already in progress, ignoring: {reason}");
                false
            }
        }
    }

    /// The reason recorded by the first trigger.
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// Whether any failure reason was ever triggered.
    pub fn has_failure(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Whether shutdown has fired.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Watch SIGINT, SIGTERM and SIGHUP and trigger `shutdown` on each.
///
/// The task runs until aborted; signals after the first are logged at debug.
pub fn spawn_signal_watcher(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigint.recv() => "SIGINT",
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sighup.recv() => "SIGHUP",
                else => break,
            };
            shutdown.trigger(ShutdownReason::Signal(name));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_fires_once() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        assert!(shutdown.trigger(ShutdownReason::Signal("SIGINT")));
        assert!(!shutdown.trigger(ShutdownReason::Signal("SIGTERM")));
        assert!(!shutdown.trigger(ShutdownReason::ChildExited));

        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.reason(), Some(&ShutdownReason::Signal("SIGINT")));
    }

    #[test]
    fn test_clones_share_state() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();

        assert!(other.trigger(ShutdownReason::ChildExited));
        assert!(shutdown.token().is_cancelled());
        assert!(!shutdown.trigger(ShutdownReason::ChildExited));
    }

    #[test]
    fn test_late_failure_is_remembered() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Signal("SIGTERM"));
        assert!(!shutdown.has_failure());

        shutdown.trigger(ShutdownReason::ListenerFailed {
            listener: "http".to_string(),
            message: "address in use".to_string(),
        });
        assert!(shutdown.has_failure());
        assert_eq!(shutdown.reason(), Some(&ShutdownReason::Signal("SIGTERM")));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        shutdown.trigger(ShutdownReason::BringUpFailed("timeout".to_string()));
        handle.await.unwrap();
        assert!(shutdown.has_failure());
    }
}
