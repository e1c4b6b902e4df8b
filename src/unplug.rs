//! Reverse direction: a remote overlay service on a local port.
//!
//! Listens on `127.0.0.1:<port>` and proxies every request to a remote
//! address dialed through the overlay. No child process is involved and no
//! identity headers are added. Runs until a signal arrives.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::UnplugConfig;
use crate::lifecycle::{Shutdown, spawn_signal_watcher};
use crate::overlay::{FanInListener, Overlay, OverlayError};
use crate::proxy::{OverlayDialer, ProxyTransport, ReverseProxy, serve};

/// Port assumed when the remote address has none.
pub const DEFAULT_REMOTE_PORT: u16 = 80;

/// Ensure `addr` carries a port, adding port 80 if it does not.
pub fn normalize_remote(addr: &str) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }

    let bare = addr.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => return format!("[{ip}]:{DEFAULT_REMOTE_PORT}"),
        Ok(IpAddr::V4(ip)) => return format!("{ip}:{DEFAULT_REMOTE_PORT}"),
        Err(_) => {}
    }

    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{addr}:{DEFAULT_REMOTE_PORT}"),
    }
}

/// Run with OS signal handling.
pub async fn run(config: &UnplugConfig, overlay: Arc<dyn Overlay>) -> Result<()> {
    let shutdown = Shutdown::new();
    let signals =
        spawn_signal_watcher(shutdown.clone()).context("Failed to install signal handlers")?;

    let result = run_with(config, overlay, shutdown).await;
    signals.abort();
    result
}

/// Serve until `shutdown` fires.
pub async fn run_with(
    config: &UnplugConfig,
    overlay: Arc<dyn Overlay>,
    shutdown: Shutdown,
) -> Result<()> {
    if config.remote_addr.trim().is_empty() {
        bail!("Remote address is required");
    }
    let remote = normalize_remote(&config.remote_addr);

    let cancel = shutdown.token();
    let status = match overlay
        .bring_up(&cancel, &config.hostname, &config.state_dir)
        .await
    {
        Ok(status) => status,
        Err(OverlayError::Cancelled) => return Ok(()),
        Err(e) => return Err(e).context("Failed to bring up overlay network"),
    };
    info!("Joined overlay as {}", status.host_name());

    let proxy = ReverseProxy::new(
        &remote,
        Arc::new(OverlayDialer::new(overlay)),
        ProxyTransport::unbounded(),
    )
    .with_context(|| format!("Invalid remote address '{}'", remote))?;

    let listener = TcpListener::bind(("127.0.0.1", config.local_port))
        .await
        .with_context(|| format!("Failed to listen on 127.0.0.1:{}", config.local_port))?;
    let local = listener.local_addr().context("Failed to read local address")?;
    info!("Forwarding http://{} -> {}", local, proxy.upstream_url());

    let listener = Box::new(FanInListener::new(vec![listener], None));
    serve(listener, Arc::new(proxy), cancel)
        .await
        .context("Local listener failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_default_port() {
        assert_eq!(normalize_remote("db"), "db:80");
        assert_eq!(normalize_remote("web.tail.ts.net"), "web.tail.ts.net:80");
        assert_eq!(normalize_remote("100.64.0.5"), "100.64.0.5:80");
        assert_eq!(normalize_remote("fd7a:115c::5"), "[fd7a:115c::5]:80");
        assert_eq!(normalize_remote("[fd7a:115c::5]"), "[fd7a:115c::5]:80");
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        assert_eq!(normalize_remote("db:5432"), "db:5432");
        assert_eq!(normalize_remote("100.64.0.5:8080"), "100.64.0.5:8080");
        assert_eq!(normalize_remote("[fd7a::5]:443"), "[fd7a::5]:443");
    }
}
