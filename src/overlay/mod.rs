//! The overlay network as seen by the supervisor.
//!
//! Everything the plug needs from the mesh goes through [`Overlay`]: joining
//! the network, looking up who is calling, and opening listeners. The
//! shipped implementation is [`TailscaledOverlay`]; tests substitute their own.
//!
//! # Listeners
//!
//! - [`Overlay::listen`]: plain TCP on every overlay address
//! - [`Overlay::listen_tls`]: the same with the node's certificate
//! - [`Overlay::listen_public_ingress`]: TLS reachable from outside the overlay
//! - [`Overlay::listen_packet`]: UDP on one address

mod error;
pub mod listener;
pub mod localapi;
mod tailscaled;
pub mod tls;
mod types;

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

pub use error::OverlayError;
pub use listener::{BoxedConnection, Connection, FanInListener, StreamListener};
pub use localapi::LocalApiClient;
pub use tailscaled::{BRING_UP_POLL_INTERVAL, TailscaledOverlay};
pub use types::{Identity, SelfStatus, UserProfile};

/// Membership directory lookups.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Identify the caller at `remote`. `None` if the directory has no entry.
    async fn who_is(
        &self,
        cancel: &CancellationToken,
        remote: SocketAddr,
    ) -> Result<Option<Identity>, OverlayError>;
}

/// Overlay network provider.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Join the network and wait until the node is running.
    ///
    /// Returns [`OverlayError::Cancelled`] if `cancel` fires first.
    async fn bring_up(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
        state_dir: &Path,
    ) -> Result<SelfStatus, OverlayError>;

    /// Client for who-is lookups. Only valid after bring-up.
    async fn identity_client(&self) -> Result<Arc<dyn IdentityClient>, OverlayError>;

    /// Plain TCP listener on `port` of every overlay address.
    async fn listen(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError>;

    /// TLS listener on `port` of every overlay address.
    async fn listen_tls(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError>;

    /// TLS listener reachable from the public internet.
    async fn listen_public_ingress(&self, port: u16)
    -> Result<Box<dyn StreamListener>, OverlayError>;

    /// UDP socket bound on `addr`.
    async fn listen_packet(&self, addr: SocketAddr) -> Result<UdpSocket, OverlayError>;

    /// Open a TCP connection to a peer, `host:port`.
    async fn dial(&self, addr: &str) -> io::Result<TcpStream>;
}
