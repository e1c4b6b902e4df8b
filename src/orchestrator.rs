//! Process-level orchestration.
//!
//! Builds the tokio runtime, wires the overlay provider selected by the
//! configuration into the supervisor core, and turns the outcome into a
//! process exit code.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::{OverlaySettings, PlugConfig};
use crate::overlay::{Overlay, TailscaledOverlay};
use crate::plug;

/// Time background tasks get to finish once the run is over.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervise the configured command and return its exit code.
pub fn run_plug(config: &PlugConfig) -> Result<i32> {
    debug!("Resolved configuration: {:?}", config);
    info!(
        "Starting {:?} as {} on the overlay",
        config.command.join(" "),
        config.hostname
    );

    let rt = build_runtime()?;
    let overlay = overlay_for(&config.overlay);
    let outcome = rt.block_on(plug::run(config, overlay));
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let outcome = outcome?;
    if let Some(reason) = &outcome.reason {
        debug!("Stopped because: {}", reason);
    }
    Ok(outcome.exit_code())
}

/// Overlay provider for the given settings.
pub fn overlay_for(settings: &OverlaySettings) -> Arc<dyn Overlay> {
    debug!("Using overlay daemon at {:?}", settings.socket);
    Arc::new(TailscaledOverlay::new(&settings.socket))
}

/// Multi-threaded runtime used by every program variant.
pub fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}
