//! Stream listeners handed out by the overlay provider.
//!
//! A node usually has several overlay addresses (IPv4 and IPv6). The
//! [`FanInListener`] binds each of them and merges their accepted connections
//! into one stream, optionally completing a TLS handshake first. Handshakes
//! run in their own tasks so a slow client never stalls the accept path.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Deadline for a client to complete the TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after a failed accept before retrying.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Capacity of the accepted-connection queue.
const ACCEPT_QUEUE: usize = 64;

/// A bidirectional byte stream.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// An accepted connection of any transport.
pub type BoxedConnection = Box<dyn Connection>;

/// Source of inbound stream connections.
#[async_trait]
pub trait StreamListener: Send + Sync {
    /// Wait for the next connection.
    async fn accept(&self) -> io::Result<(BoxedConnection, SocketAddr)>;

    /// Addresses this listener is bound to.
    fn local_addrs(&self) -> Vec<SocketAddr>;
}

#[async_trait]
impl StreamListener for TcpListener {
    async fn accept(&self) -> io::Result<(BoxedConnection, SocketAddr)> {
        let (stream, remote) = TcpListener::accept(self).await?;
        Ok((Box::new(stream), remote))
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        self.local_addr().into_iter().collect()
    }
}

type Accepted = (BoxedConnection, SocketAddr);

/// Merges several TCP listeners into one, optionally terminating TLS.
pub struct FanInListener {
    accepted: Mutex<mpsc::Receiver<Accepted>>,
    local_addrs: Vec<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl FanInListener {
    /// Start accepting on every listener.
    pub fn new(listeners: Vec<TcpListener>, tls: Option<TlsAcceptor>) -> Self {
        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE);
        let local_addrs = listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect();

        let tasks = listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, tls.clone(), tx.clone())))
            .collect();

        Self {
            accepted: Mutex::new(rx),
            local_addrs,
            tasks,
        }
    }
}

impl Drop for FanInListener {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl StreamListener for FanInListener {
    async fn accept(&self) -> io::Result<(BoxedConnection, SocketAddr)> {
        self.accepted.lock().await.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "all accept loops have stopped")
        })
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        self.local_addrs.clone()
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    tx: mpsc::Sender<Accepted>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        match &tls {
            None => {
                if tx.send((Box::new(stream), remote)).await.is_err() {
                    break;
                }
            }
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await
                    {
                        Ok(Ok(tls_stream)) => {
                            let _ = tx.send((Box::new(tls_stream), remote)).await;
                        }
                        Ok(Err(e)) => debug!("TLS handshake with {} failed: {}", remote, e),
                        Err(_) => debug!("TLS handshake with {} timed out", remote),
                    }
                });
            }
        }
    }
}
