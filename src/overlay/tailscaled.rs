//! Overlay provider backed by a host `tailscaled`.
//!
//! The daemon owns the node: membership, keys and the tunnel interface.
//! This provider names the node, waits for it to be running, and then binds
//! ordinary sockets on the node's overlay addresses.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::OnceCell;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::OverlayError;
use super::listener::{FanInListener, StreamListener};
use super::localapi::{BACKEND_NEEDS_LOGIN, LocalApiClient};
use super::tls::{CertStore, acceptor_from_pem};
use super::types::SelfStatus;
use super::{IdentityClient, Overlay};

/// Interval between status polls during bring-up.
pub const BRING_UP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Overlay provider using the local API of a running `tailscaled`.
///
/// The daemon runs exactly one node, so bring-up changes that node's
/// `Hostname` preference. The whole host is renamed on the tailnet and keeps
/// the new name after ts-plug exits; no separate node is created.
pub struct TailscaledOverlay {
    api: LocalApiClient,
    poll_interval: Duration,
    status: OnceLock<SelfStatus>,
    state_dir: OnceLock<PathBuf>,
    tls: OnceCell<TlsAcceptor>,
}

impl TailscaledOverlay {
    /// Provider for the daemon listening on `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            api: LocalApiClient::new(socket),
            poll_interval: BRING_UP_POLL_INTERVAL,
            status: OnceLock::new(),
            state_dir: OnceLock::new(),
            tls: OnceCell::new(),
        }
    }

    /// Override the bring-up poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn running_status(&self) -> Result<&SelfStatus, OverlayError> {
        self.status.get().ok_or(OverlayError::NotRunning)
    }

    async fn wait_running(&self, cancel: &CancellationToken) -> Result<SelfStatus, OverlayError> {
        let mut announced_login = false;
        loop {
            let status = tokio::select! {
                status = self.api.status() => status?,
                () = cancel.cancelled() => return Err(OverlayError::Cancelled),
            };

            if status.is_running() {
                return Ok(status.self_status());
            }

            if status.backend_state == BACKEND_NEEDS_LOGIN
                && !status.auth_url.is_empty()
                && !announced_login
            {
                info!("To join the tailnet, visit: {}", status.auth_url);
                announced_login = true;
            }
            debug!("Waiting for overlay, backend state {}", status.backend_state);

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => return Err(OverlayError::Cancelled),
            }
        }
    }

    async fn tls_acceptor(&self) -> Result<TlsAcceptor, OverlayError> {
        self.tls
            .get_or_try_init(|| async {
                let status = self.running_status()?;
                let domain = status.host_name();
                if domain.is_empty() {
                    return Err(OverlayError::NoDnsName);
                }

                let state_dir = self.state_dir.get().ok_or(OverlayError::NotRunning)?;
                let store = CertStore::new(state_dir);
                let pem = store.refresh(domain, self.api.cert_pair(domain).await)?;

                debug!("Loaded certificate for {}", domain);
                acceptor_from_pem(&pem)
            })
            .await
            .cloned()
    }

    async fn bind_overlay(&self, port: u16) -> Result<Vec<TcpListener>, OverlayError> {
        let status = self.running_status()?;
        if status.addresses.is_empty() {
            return Err(OverlayError::NoAddresses);
        }

        let mut listeners = Vec::with_capacity(status.addresses.len());
        for ip in &status.addresses {
            listeners.push(bind_tcp(SocketAddr::new(*ip, port)).await?);
        }
        Ok(listeners)
    }
}

async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, OverlayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| OverlayError::Bind {
            addr: addr.to_string(),
            source,
        })
}

#[async_trait]
impl Overlay for TailscaledOverlay {
    async fn bring_up(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
        state_dir: &Path,
    ) -> Result<SelfStatus, OverlayError> {
        if let Some(status) = self.status.get() {
            return Ok(status.clone());
        }

        info!(
            "Renaming this host's overlay node to {} via {}",
            hostname,
            self.api.socket().display()
        );
        tokio::select! {
            result = self.api.set_hostname(hostname) => result?,
            () = cancel.cancelled() => return Err(OverlayError::Cancelled),
        }

        let status = self.wait_running(cancel).await?;
        let _ = self.state_dir.set(state_dir.to_path_buf());
        Ok(self.status.get_or_init(|| status).clone())
    }

    async fn identity_client(&self) -> Result<Arc<dyn IdentityClient>, OverlayError> {
        self.running_status()?;
        Ok(Arc::new(self.api.clone()))
    }

    async fn listen(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError> {
        let listeners = self.bind_overlay(port).await?;
        Ok(Box::new(FanInListener::new(listeners, None)))
    }

    async fn listen_tls(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError> {
        let acceptor = self.tls_acceptor().await?;
        let listeners = self.bind_overlay(port).await?;
        Ok(Box::new(FanInListener::new(listeners, Some(acceptor))))
    }

    async fn listen_public_ingress(
        &self,
        port: u16,
    ) -> Result<Box<dyn StreamListener>, OverlayError> {
        let acceptor = self.tls_acceptor().await?;
        let listener = bind_tcp(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?;
        Ok(Box::new(FanInListener::new(vec![listener], Some(acceptor))))
    }

    async fn listen_packet(&self, addr: SocketAddr) -> Result<UdpSocket, OverlayError> {
        UdpSocket::bind(addr)
            .await
            .map_err(|source| OverlayError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}
