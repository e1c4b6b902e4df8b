//! Shared fixtures: an in-process overlay provider bound on loopback and a
//! header-echoing upstream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

use ts_plug::config::PortMapping;
use ts_plug::lifecycle::Shutdown;
use ts_plug::listeners::{ListenerContext, ListenerKind, ListenerSet, ListenerSpec};
use ts_plug::overlay::{
    Identity, IdentityClient, Overlay, OverlayError, SelfStatus, StreamListener, UserProfile,
};

/// Who-is client answering every lookup with the same identity.
pub struct StaticIdentity(pub Option<Identity>);

#[async_trait]
impl IdentityClient for StaticIdentity {
    async fn who_is(
        &self,
        _cancel: &CancellationToken,
        _remote: SocketAddr,
    ) -> Result<Option<Identity>, OverlayError> {
        Ok(self.0.clone())
    }
}

/// Identity of a regular user.
pub fn user(login: &str, name: &str) -> Option<Identity> {
    Some(Identity {
        node_name: "laptop.tail.ts.net.".to_string(),
        user_profile: Some(UserProfile {
            id: 7,
            login_name: login.to_string(),
            display_name: name.to_string(),
            profile_pic_url: format!("https://example.com/{login}.png"),
        }),
    })
}

/// How `bring_up` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// Joins immediately.
    Ready,
    /// Never joins; returns only once cancelled.
    Hang,
    /// Fails immediately.
    Fail,
}

/// Overlay provider that binds everything on 127.0.0.1 with ephemeral ports.
///
/// Requested ports are recorded so tests can find the real address.
pub struct LoopbackOverlay {
    identity: Option<Identity>,
    fail_tls: bool,
    bring_up: BringUp,
    bound: Mutex<HashMap<u16, SocketAddr>>,
}

impl LoopbackOverlay {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity,
            fail_tls: false,
            bring_up: BringUp::Ready,
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bring_up(mut self, bring_up: BringUp) -> Self {
        self.bring_up = bring_up;
        self
    }

    /// Make `listen_tls` fail, shortly after being called, as if no
    /// certificate were available.
    pub fn failing_tls(mut self) -> Self {
        self.fail_tls = true;
        self
    }

    pub fn status() -> SelfStatus {
        SelfStatus {
            dns_name: "app.tail.ts.net.".to_string(),
            addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }

    /// Real address behind a requested port, waiting for it to be bound.
    pub async fn bound(&self, port: u16) -> SocketAddr {
        for _ in 0..200 {
            if let Some(addr) = self.bound.lock().unwrap().get(&port) {
                return *addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("port {port} was never bound");
    }

    fn record(&self, port: u16, addr: SocketAddr) {
        self.bound.lock().unwrap().insert(port, addr);
    }

    async fn bind_tcp(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|source| OverlayError::Bind {
                addr: format!("127.0.0.1:{port}"),
                source,
            })?;
        self.record(port, listener.local_addr().unwrap());
        Ok(Box::new(listener))
    }
}

#[async_trait]
impl Overlay for LoopbackOverlay {
    async fn bring_up(
        &self,
        cancel: &CancellationToken,
        _hostname: &str,
        _state_dir: &Path,
    ) -> Result<SelfStatus, OverlayError> {
        match self.bring_up {
            BringUp::Ready => Ok(Self::status()),
            BringUp::Hang => {
                cancel.cancelled().await;
                Err(OverlayError::Cancelled)
            }
            BringUp::Fail => Err(OverlayError::Status {
                path: "/localapi/v0/status".to_string(),
                status: 500,
                body: "backend unavailable".to_string(),
            }),
        }
    }

    async fn identity_client(&self) -> Result<Arc<dyn IdentityClient>, OverlayError> {
        Ok(Arc::new(StaticIdentity(self.identity.clone())))
    }

    async fn listen(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError> {
        self.bind_tcp(port).await
    }

    async fn listen_tls(&self, port: u16) -> Result<Box<dyn StreamListener>, OverlayError> {
        if self.fail_tls {
            // Leaves the child time to install its signal handlers.
            tokio::time::sleep(Duration::from_millis(200)).await;
            return Err(OverlayError::Tls("no certificate for app.tail.ts.net".to_string()));
        }
        self.bind_tcp(port).await
    }

    async fn listen_public_ingress(
        &self,
        port: u16,
    ) -> Result<Box<dyn StreamListener>, OverlayError> {
        self.bind_tcp(port).await
    }

    async fn listen_packet(&self, addr: SocketAddr) -> Result<UdpSocket, OverlayError> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|source| OverlayError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        self.record(addr.port(), socket.local_addr().unwrap());
        Ok(socket)
    }

    async fn dial(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// Upstream that answers every request with its request headers, one
/// `name: value` line each.
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let mut body = String::new();
                    for (name, value) in req.headers() {
                        body.push_str(&format!(
                            "{}: {}\n",
                            name,
                            String::from_utf8_lossy(value.as_bytes())
                        ));
                    }
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Upstream that reads the whole request body before answering with its
/// length.
pub async fn spawn_body_reading_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = req.into_body().collect().await?.to_bytes();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(format!(
                        "received {} bytes",
                        body.len()
                    )))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Upstream that accepts connections and never answers.
pub async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start an HTTP listener on overlay port 80 proxying to `upstream_port`.
///
/// Returns the listener's real address and the shutdown that stops it.
pub async fn start_http_listener(
    overlay: Arc<LoopbackOverlay>,
    upstream_port: u16,
) -> (SocketAddr, Shutdown) {
    let identity = overlay.identity_client().await.unwrap();
    let ctx = ListenerContext::new(overlay.clone(), LoopbackOverlay::status(), identity);
    let spec = ListenerSpec {
        kind: ListenerKind::Http,
        mapping: PortMapping::parse(&format!("80:{upstream_port}"), (0, 0)).unwrap(),
    };

    let shutdown = Shutdown::new();
    let _set = ListenerSet::start(vec![spec], ctx, &shutdown);
    (overlay.bound(80).await, shutdown)
}

/// Write `request` as-is and return the whole response text.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_response(stream).await
}

async fn read_response(mut stream: TcpStream) -> String {
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Send a raw HTTP/1.1 GET and return the whole response text.
pub async fn http_get(addr: SocketAddr, extra_headers: &[(&str, &str)]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = String::from("GET /whoami HTTP/1.1\r\nHost: app.tail.ts.net\r\n");
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    if !extra_headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("connection"))
    {
        request.push_str("Connection: close\r\n");
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    read_response(stream).await
}
