//! Error types for proxy operations.
//!
//! Every upstream failure is turned into a gateway response: timeouts become
//! 504, everything else 502.

use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Errors while forwarding a request upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream address cannot form a URL authority.
    #[error("Invalid upstream '{0}'")]
    InvalidUpstream(String),

    /// Failed to connect to the upstream.
    #[error("Failed to connect to upstream '{addr}': {source}")]
    UpstreamConnect {
        /// Address we dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the upstream took too long.
    #[error("Timed out connecting to upstream '{addr}' after {timeout:?}")]
    UpstreamConnectTimeout {
        /// Address we dialed.
        addr: String,
        /// Connect deadline.
        timeout: Duration,
    },

    /// The upstream did not send response headers in time.
    #[error("Upstream '{addr}' did not respond within {timeout:?}")]
    UpstreamTimeout {
        /// Address of the upstream.
        addr: String,
        /// Response header deadline.
        timeout: Duration,
    },

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// I/O error (accepting connections).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status code returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamConnectTimeout { .. } | ProxyError::UpstreamTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}
