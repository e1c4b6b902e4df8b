//! Client for the overlay daemon's local HTTP API.
//!
//! Every call opens a fresh Unix socket connection and performs one HTTP/1
//! exchange. The daemon only answers requests carrying its magic host name
//! and the `Sec-Tailscale` header.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::IdentityClient;
use super::error::OverlayError;
use super::types::{Identity, SelfStatus, UserProfile};

/// Host header the daemon expects.
pub const LOCALAPI_HOST: &str = "local-tailscaled.sock";

/// Backend state of a node that has joined the network.
pub const BACKEND_RUNNING: &str = "Running";

/// Backend state of a node waiting for interactive login.
pub const BACKEND_NEEDS_LOGIN: &str = "NeedsLogin";

/// Decoded subset of `/localapi/v0/status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendStatus {
    /// Daemon state machine position, e.g. `Running`.
    #[serde(rename = "BackendState", default)]
    pub backend_state: String,
    /// Login URL while the state is `NeedsLogin`.
    #[serde(rename = "AuthURL", default)]
    pub auth_url: String,
    /// This node.
    #[serde(rename = "Self", default)]
    pub self_node: Option<PeerStatus>,
}

/// One node in a status response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerStatus {
    /// Fully qualified DNS name.
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    /// Overlay addresses.
    #[serde(rename = "TailscaleIPs", default)]
    pub tailscale_ips: Vec<IpAddr>,
}

impl BackendStatus {
    /// Whether the node has joined the network.
    pub fn is_running(&self) -> bool {
        self.backend_state == BACKEND_RUNNING
    }

    /// Self status of a running node.
    pub fn self_status(&self) -> SelfStatus {
        self.self_node
            .as_ref()
            .map(|node| SelfStatus {
                dns_name: node.dns_name.clone(),
                addresses: node.tailscale_ips.clone(),
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct WhoIsResponse {
    #[serde(rename = "Node", default)]
    node: Option<WhoIsNode>,
    #[serde(rename = "UserProfile", default)]
    user_profile: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct WhoIsNode {
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct HostnamePrefs<'a> {
    #[serde(rename = "Hostname")]
    hostname: &'a str,
    #[serde(rename = "HostnameSet")]
    hostname_set: bool,
}

/// Local API client bound to a socket path.
#[derive(Debug, Clone)]
pub struct LocalApiClient {
    socket: PathBuf,
}

impl LocalApiClient {
    /// Client for the daemon listening on `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), OverlayError> {
        let stream =
            UnixStream::connect(&self.socket)
                .await
                .map_err(|source| OverlayError::Connect {
                    path: self.socket.clone(),
                    source,
                })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Local API connection ended: {}", e);
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, LOCALAPI_HOST)
            .header("Sec-Tailscale", "localapi");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        trace!("Local API {} {}", method, path);
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    async fn send_ok(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, OverlayError> {
        let (status, body) = self.send(method, path, body).await?;
        if !status.is_success() {
            return Err(status_error(path, status, &body));
        }
        Ok(body)
    }

    /// Fetch the daemon status.
    pub async fn status(&self) -> Result<BackendStatus, OverlayError> {
        let body = self
            .send_ok(Method::GET, "/localapi/v0/status", None)
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Set this node's hostname preference.
    pub async fn set_hostname(&self, hostname: &str) -> Result<(), OverlayError> {
        let prefs = serde_json::to_vec(&HostnamePrefs {
            hostname,
            hostname_set: true,
        })?;
        self.send_ok(Method::PATCH, "/localapi/v0/prefs", Some(prefs))
            .await?;
        Ok(())
    }

    /// Look up the node and user behind an overlay address.
    ///
    /// Returns `None` when the address is unknown to the directory.
    pub async fn who_is(&self, remote: SocketAddr) -> Result<Option<Identity>, OverlayError> {
        let path = format!("/localapi/v0/whois?addr={}", encode_query(&remote.to_string()));
        let (status, body) = self.send(Method::GET, &path, None).await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(&path, status, &body));
        }

        let response: WhoIsResponse = serde_json::from_slice(&body)?;
        Ok(Some(Identity {
            node_name: response.node.map(|n| n.name).unwrap_or_default(),
            user_profile: response.user_profile,
        }))
    }

    /// Fetch the PEM key and certificate chain for `domain`.
    pub async fn cert_pair(&self, domain: &str) -> Result<Vec<u8>, OverlayError> {
        let path = format!("/localapi/v0/cert/{}?type=pair", domain);
        let body = self.send_ok(Method::GET, &path, None).await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl IdentityClient for LocalApiClient {
    async fn who_is(
        &self,
        cancel: &CancellationToken,
        remote: SocketAddr,
    ) -> Result<Option<Identity>, OverlayError> {
        tokio::select! {
            result = LocalApiClient::who_is(self, remote) => result,
            () = cancel.cancelled() => Err(OverlayError::Cancelled),
        }
    }
}

fn status_error(path: &str, status: StatusCode, body: &[u8]) -> OverlayError {
    OverlayError::Status {
        path: path.to_string(),
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// Percent-encode the characters of a socket address that are not valid in a query.
fn encode_query(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '[' => "%5B".to_string(),
            ']' => "%5D".to_string(),
            '%' => "%25".to_string(),
            c => c.to_string(),
        })
        .collect()
}
