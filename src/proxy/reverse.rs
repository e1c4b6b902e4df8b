//! Forwarding requests to an upstream HTTP/1 server.
//!
//! Each request dials its own upstream connection; there is no pool and no
//! shared mutable state. Bodies stream through in both directions. Requests
//! asking for a protocol upgrade (WebSocket and friends) are tunneled as raw
//! bytes once both sides agree on `101 Switching Protocols`.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, HeaderName, HeaderValue, UPGRADE};
use hyper::http::uri::{Authority, PathAndQuery};
use hyper::upgrade::OnUpgrade;
use hyper::{HeaderMap, Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::ProxyError;
use crate::identity::{OverlayIdentity, apply_identity_headers};
use crate::overlay::{BoxedConnection, Overlay};

/// Body type used for all proxied responses.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Connect deadline for local upstreams.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Response header deadline for local upstreams.
pub const DEFAULT_RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(1);

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Deadlines applied to each forwarded request. `None` disables a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyTransport {
    /// Deadline for establishing the upstream connection.
    pub connect_timeout: Option<Duration>,
    /// Deadline for the upstream's response headers.
    pub response_header_timeout: Option<Duration>,
}

impl ProxyTransport {
    /// Transport with no deadlines.
    pub const fn unbounded() -> Self {
        Self {
            connect_timeout: None,
            response_header_timeout: None,
        }
    }
}

impl Default for ProxyTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            response_header_timeout: Some(DEFAULT_RESPONSE_HEADER_TIMEOUT),
        }
    }
}

/// Opens upstream connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `addr` (`host:port`).
    async fn dial(&self, addr: &str) -> io::Result<BoxedConnection>;
}

/// Dials over the host network stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxedConnection> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(stream))
    }
}

/// Dials peers through the overlay provider.
#[derive(Clone)]
pub struct OverlayDialer {
    overlay: Arc<dyn Overlay>,
}

impl OverlayDialer {
    /// Dialer using `overlay`.
    pub fn new(overlay: Arc<dyn Overlay>) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl Dialer for OverlayDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxedConnection> {
        let stream = self.overlay.dial(addr).await?;
        Ok(Box::new(stream))
    }
}

/// A reverse proxy to one upstream authority.
#[derive(Clone)]
pub struct ReverseProxy {
    authority: Authority,
    dialer: Arc<dyn Dialer>,
    transport: ProxyTransport,
}

impl ReverseProxy {
    /// Proxy to `localhost:<port>` over the host network.
    pub fn localhost(port: u16, transport: ProxyTransport) -> Result<Self, ProxyError> {
        Self::new(&format!("localhost:{port}"), Arc::new(TcpDialer), transport)
    }

    /// Proxy to `authority` (`host:port`) using `dialer`.
    pub fn new(
        authority: &str,
        dialer: Arc<dyn Dialer>,
        transport: ProxyTransport,
    ) -> Result<Self, ProxyError> {
        let authority = Authority::from_str(authority)
            .map_err(|_| ProxyError::InvalidUpstream(authority.to_string()))?;
        if authority.port_u16().is_none() {
            return Err(ProxyError::InvalidUpstream(authority.to_string()));
        }

        Ok(Self {
            authority,
            dialer,
            transport,
        })
    }

    /// Upstream `host:port`.
    pub fn upstream(&self) -> &str {
        self.authority.as_str()
    }

    /// Upstream URL.
    pub fn upstream_url(&self) -> String {
        format!("http://{}", self.authority)
    }

    /// Forward `req` from `remote` and return the upstream's response.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        remote: SocketAddr,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        self.forward_as(req, remote, None).await
    }

    /// Forward `req` with the caller's identity headers stamped on.
    ///
    /// The headers are written after hop-by-hop stripping, so a client
    /// cannot remove them by listing them in `Connection`.
    pub async fn forward_as(
        &self,
        mut req: Request<Incoming>,
        remote: SocketAddr,
        identity: Option<&OverlayIdentity>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let client_upgrade = upgrade_protocol(req.headers())
            .is_some()
            .then(|| hyper::upgrade::on(&mut req));

        let (body_done, body_sent) = oneshot::channel();
        let outbound = self
            .prepare_request(req, remote.ip(), identity)
            .map(|body| NotifyOnEnd::new(body, body_done));
        let upstream = self.connect().await?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(upstream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        // The header deadline starts once the request body is fully written.
        let mut pending = std::pin::pin!(sender.send_request(outbound));
        let mut response = match self.transport.response_header_timeout {
            Some(timeout) => tokio::select! {
                result = &mut pending => result?,
                _ = body_sent => tokio::time::timeout(timeout, &mut pending).await.map_err(|_| {
                    ProxyError::UpstreamTimeout {
                        addr: self.upstream().to_string(),
                        timeout,
                    }
                })??,
            },
            None => pending.await?,
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                tokio::spawn(tunnel(client_upgrade, upstream_upgrade));
            }
        } else {
            strip_hop_by_hop(response.headers_mut());
        }

        Ok(response.map(|body| body.boxed()))
    }

    async fn connect(&self) -> Result<BoxedConnection, ProxyError> {
        let addr = self.upstream();
        let dial = self.dialer.dial(addr);
        let result = match self.transport.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dial).await.map_err(|_| {
                ProxyError::UpstreamConnectTimeout {
                    addr: addr.to_string(),
                    timeout,
                }
            })?,
            None => dial.await,
        };

        result.map_err(|source| ProxyError::UpstreamConnect {
            addr: addr.to_string(),
            source,
        })
    }

    fn prepare_request(
        &self,
        req: Request<Incoming>,
        client_ip: IpAddr,
        identity: Option<&OverlayIdentity>,
    ) -> Request<Incoming> {
        let (mut parts, body) = req.into_parts();

        let upgrade = upgrade_protocol(&parts.headers);
        strip_hop_by_hop(&mut parts.headers);
        if let Some(protocol) = upgrade {
            parts
                .headers
                .insert(CONNECTION, HeaderValue::from_static("upgrade"));
            parts.headers.insert(UPGRADE, protocol);
        }

        append_forwarded_for(&mut parts.headers, client_ip);
        if let Some(identity) = identity {
            apply_identity_headers(&mut parts.headers, identity);
        }

        if !parts.headers.contains_key(HOST)
            && let Ok(host) = HeaderValue::from_str(self.authority.as_str())
        {
            parts.headers.insert(HOST, host);
        }

        parts.uri = origin_form(&parts.uri);
        parts.version = Version::HTTP_11;
        Request::from_parts(parts, body)
    }
}

/// Request body that reports when it has been fully consumed.
struct NotifyOnEnd<B> {
    inner: B,
    sent: Option<oneshot::Sender<()>>,
}

impl<B: Body> NotifyOnEnd<B> {
    fn new(inner: B, sent: oneshot::Sender<()>) -> Self {
        let mut body = Self {
            inner,
            sent: Some(sent),
        };
        if body.inner.is_end_stream() {
            body.notify();
        }
        body
    }

    fn notify(&mut self) {
        if let Some(sent) = self.sent.take() {
            let _ = sent.send(());
        }
    }
}

impl<B: Body + Unpin> Body for NotifyOnEnd<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        let finished = match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => true,
            Poll::Ready(Some(Ok(_))) => this.inner.is_end_stream(),
            Poll::Pending => false,
        };
        if finished {
            this.notify();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// The `Upgrade` value if the request or response asks for a protocol switch.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    if wants_upgrade {
        headers.get(UPGRADE).cloned()
    } else {
        None
    }
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_str(token.trim()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Append the client address to `X-Forwarded-For`, merging prior values.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"))
        .into()
}

async fn tunnel(client: OnUpgrade, upstream: OnUpgrade) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("Protocol upgrade failed: {}", e);
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => debug!("Tunnel closed ({} bytes up, {} bytes down)", sent, received),
        Err(e) => debug!("Tunnel ended: {}", e),
    }
}

/// Create an empty response body.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text gateway error response for `err`.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let status = err.status();
    let mut response = Response::new(full_body(format!(
        "{}\n",
        status.canonical_reason().unwrap_or("Bad Gateway")
    )));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
