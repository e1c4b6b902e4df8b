//! DNS-over-UDP forwarding.
//!
//! Every inbound datagram is handled by its own task: bind an ephemeral
//! socket, send the query upstream, wait for one reply and relay it back to
//! the original sender. A single deadline covers the whole exchange. Failed
//! exchanges are logged and the client simply gets no answer. Receive errors
//! on the listening socket are logged and the loop carries on.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::error::ListenerError;
use super::http::listener_url;
use super::{ListenerContext, ListenerKind, ListenerSpec};

/// Largest datagram relayed in either direction.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Deadline for one upstream exchange (dial, write and read).
pub const DEFAULT_UPSTREAM_DEADLINE: Duration = Duration::from_secs(5);

/// Interval at which an idle receive loop wakes up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay after a failed receive before reading again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The listening side of the forwarder.
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Receive one datagram into `buf`.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }
}

/// Forwards datagrams from a listening socket to one upstream.
#[derive(Debug, Clone)]
pub struct DnsForwarder {
    upstream: SocketAddr,
    deadline: Duration,
    poll_interval: Duration,
}

impl DnsForwarder {
    /// Forwarder to `upstream` with default timing.
    pub fn new(upstream: SocketAddr) -> Self {
        Self {
            upstream,
            deadline: DEFAULT_UPSTREAM_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Forwarder to `127.0.0.1:<port>`.
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Override the upstream exchange deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upstream address.
    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// Receive and forward datagrams until `cancel` fires.
    pub async fn run<S: DatagramSocket>(
        &self,
        socket: S,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("DNS forwarder shutting down");
                    return Ok(());
                }
                received = tokio::time::timeout(self.poll_interval, socket.recv_from(&mut buf)) => received,
            };

            let (len, client) = match received {
                Err(_) => {
                    trace!("DNS poll interval elapsed");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!("Failed to receive DNS query: {}", e);
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            let query = buf[..len].to_vec();
            let socket = socket.clone();
            let upstream = self.upstream;
            let deadline = self.deadline;
            tokio::spawn(async move {
                if let Err(e) = forward_query(&*socket, &query, client, upstream, deadline).await {
                    error!("DNS query from {} failed: {}", client, e);
                }
            });
        }
    }
}

/// Bind the DNS listener on the first overlay address and forward until cancelled.
pub async fn run(
    spec: ListenerSpec,
    ctx: ListenerContext,
    cancel: CancellationToken,
) -> Result<(), ListenerError> {
    let ip = ctx
        .status
        .first_address()
        .ok_or(ListenerError::NoOverlayAddress)?;
    let port = spec.inbound_port();

    let socket = ctx
        .overlay
        .listen_packet(SocketAddr::new(ip, port))
        .await
        .map_err(|source| ListenerError::Bind {
            kind: ListenerKind::Dns,
            port,
            source,
        })?;

    let forwarder = DnsForwarder::localhost(spec.mapping.outbound())
        .with_poll_interval(ctx.dns_poll_interval);
    info!(
        "{} listening on {} -> {}",
        ListenerKind::Dns,
        listener_url(ListenerKind::Dns, ctx.status.host_name(), port),
        forwarder.upstream()
    );

    forwarder.run(socket, cancel).await
}

async fn forward_query<S: DatagramSocket>(
    socket: &S,
    query: &[u8],
    client: SocketAddr,
    upstream: SocketAddr,
    deadline: Duration,
) -> io::Result<()> {
    let exchange = async {
        let local: SocketAddr = if upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let conn = UdpSocket::bind(local).await?;
        conn.connect(upstream).await?;
        conn.send(query).await?;

        let mut reply = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = conn.recv(&mut reply).await?;
        reply.truncate(len);
        Ok::<_, io::Error>(reply)
    };

    let reply = tokio::time::timeout(deadline, exchange)
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply from {upstream} within {deadline:?}"),
            )
        })??;

    socket.send_to(&reply, client).await?;
    trace!("Relayed {} byte DNS reply to {}", reply.len(), client);
    Ok(())
}
