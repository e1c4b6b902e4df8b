//! HTTP/1 server loop shared by every proxy listener.
//!
//! Each accepted connection is served in its own task with upgrade support.
//! When the cancellation token fires the accept loop returns and every open
//! connection is dropped.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ProxyError;
use super::middleware::ProxyHandler;
use crate::overlay::StreamListener;

/// Serve `handler` on `listener` until `cancel` fires.
///
/// Returns an error only if the listener itself fails.
pub async fn serve<H: ProxyHandler>(
    listener: Box<dyn StreamListener>,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<(), ProxyError> {
    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => accepted?,
            () = cancel.cancelled() => {
                debug!("Proxy listener on {:?} shutting down", listener.local_addrs());
                return Ok(());
            }
        };

        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req, remote).await) }
            });

            let connection = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();

            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        // Client resets are routine.
                        if e.is_incomplete_message() || e.is_canceled() {
                            debug!("Connection from {} ended: {}", remote, e);
                        } else {
                            warn!("Connection from {} failed: {}", remote, e);
                        }
                    }
                }
                () = cancel.cancelled() => {
                    debug!("Dropping connection from {}", remote);
                }
            }
        });
    }
}
