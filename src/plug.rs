//! The supervisor core shared by every plug program.
//!
//! Start the child, join the overlay, start the listeners, and wait. Whatever
//! ends the run (a signal, the child exiting, a listener failing) fires the
//! one [`Shutdown`], which tears everything else down. The child's exit is
//! always awaited and is the run's outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::config::PlugConfig;
use crate::lifecycle::{Shutdown, ShutdownReason, spawn_signal_watcher};
use crate::listeners::{self, ListenerContext, ListenerSet};
use crate::overlay::{Overlay, OverlayError};
use crate::proxy::ProxyTransport;
use crate::supervisor::{ChildSupervisor, ExitResult};

/// Time listeners get to wind down after shutdown.
pub const LISTENER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Tunables of a run. Defaults match production.
#[derive(Debug, Clone)]
pub struct PlugOptions {
    /// Child supervisor (grace period, extra environment).
    pub supervisor: ChildSupervisor,
    /// Proxy deadlines.
    pub transport: ProxyTransport,
    /// DNS receive loop wake-up interval.
    pub dns_poll_interval: Duration,
    /// Listener wind-down budget.
    pub listener_grace: Duration,
}

impl Default for PlugOptions {
    fn default() -> Self {
        Self {
            supervisor: ChildSupervisor::new(),
            transport: ProxyTransport::default(),
            dns_poll_interval: listeners::dns::DEFAULT_POLL_INTERVAL,
            listener_grace: LISTENER_SHUTDOWN_GRACE,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugOutcome {
    /// The child's termination.
    pub child: ExitResult,
    /// First shutdown reason.
    pub reason: Option<ShutdownReason>,
    /// A listener failed at some point.
    pub listener_failed: bool,
}

impl PlugOutcome {
    /// Process exit code.
    ///
    /// The child's code, except that a clean child exit after a listener
    /// failure still reports failure.
    pub fn exit_code(&self) -> i32 {
        match self.child.exit_code() {
            0 if self.listener_failed => 1,
            code => code,
        }
    }
}

/// Run with OS signal handling and default options.
pub async fn run(config: &PlugConfig, overlay: Arc<dyn Overlay>) -> Result<PlugOutcome> {
    let shutdown = Shutdown::new();
    let signals =
        spawn_signal_watcher(shutdown.clone()).context("Failed to install signal handlers")?;

    let outcome = run_with(config, overlay, shutdown, PlugOptions::default()).await;
    signals.abort();
    outcome
}

/// Run until the child exits, driven by an externally owned `shutdown`.
///
/// Spawn failures and overlay bring-up failures are errors; the child is
/// torn down before a bring-up error is returned.
pub async fn run_with(
    config: &PlugConfig,
    overlay: Arc<dyn Overlay>,
    shutdown: Shutdown,
    options: PlugOptions,
) -> Result<PlugOutcome> {
    let child = options
        .supervisor
        .start(&config.command, shutdown.token())
        .context("Failed to start command")?;

    let child_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = child.wait().await;
            info!("Command exited with {}", result);
            shutdown.trigger(ShutdownReason::ChildExited);
            result
        })
    };

    let mut fatal = None;
    let listeners = match start_listeners(config, overlay, &shutdown, &options).await {
        Ok(listeners) => listeners,
        Err(OverlayError::Cancelled) => {
            debug!("Overlay bring-up cancelled");
            None
        }
        Err(e) => {
            error!("Failed to bring up overlay: {}", e);
            shutdown.trigger(ShutdownReason::BringUpFailed(e.to_string()));
            fatal = Some(e);
            None
        }
    };

    let child_result = child_task
        .await
        .unwrap_or_else(|e| ExitResult::WaitFailed(e.to_string()));

    if let Some(listeners) = listeners {
        listeners.join(options.listener_grace).await;
    }

    if let Some(e) = fatal {
        return Err(anyhow::Error::new(e).context("Failed to bring up overlay network"));
    }

    Ok(PlugOutcome {
        child: child_result,
        reason: shutdown.reason().cloned(),
        listener_failed: shutdown.has_failure(),
    })
}

async fn start_listeners(
    config: &PlugConfig,
    overlay: Arc<dyn Overlay>,
    shutdown: &Shutdown,
    options: &PlugOptions,
) -> Result<Option<ListenerSet>, OverlayError> {
    let cancel = shutdown.token();
    let status = overlay
        .bring_up(&cancel, &config.hostname, &config.state_dir)
        .await?;
    info!("Joined overlay as {}", status.host_name());

    if shutdown.is_triggered() {
        return Ok(None);
    }

    let identity = overlay.identity_client().await?;
    let mut ctx = ListenerContext::new(overlay, status, identity);
    ctx.transport = options.transport;
    ctx.dns_poll_interval = options.dns_poll_interval;

    let specs = listeners::plan(&config.listeners);
    Ok(Some(ListenerSet::start(specs, ctx, shutdown)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(child: ExitResult, listener_failed: bool) -> PlugOutcome {
        PlugOutcome {
            child,
            reason: None,
            listener_failed,
        }
    }

    #[test]
    fn test_exit_code_follows_child() {
        assert_eq!(outcome(ExitResult::Exited(0), false).exit_code(), 0);
        assert_eq!(outcome(ExitResult::Exited(7), false).exit_code(), 7);
        assert_eq!(outcome(ExitResult::Signaled(15), false).exit_code(), 143);
    }

    #[test]
    fn test_listener_failure_forces_nonzero() {
        assert_eq!(outcome(ExitResult::Exited(0), true).exit_code(), 1);
        assert_eq!(outcome(ExitResult::Exited(3), true).exit_code(), 3);
        assert_eq!(outcome(ExitResult::Signaled(15), true).exit_code(), 143);
    }
}
