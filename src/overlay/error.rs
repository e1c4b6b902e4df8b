//! Error types for the overlay provider.

use std::path::PathBuf;

use thiserror::Error;

/// Errors talking to or listening on the overlay network.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The local API socket could not be reached.
    #[error("Failed to connect to overlay daemon at {path:?}: {source}")]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// HTTP exchange with the local API failed.
    #[error("Local API request failed: {0}")]
    Http(#[from] hyper::Error),

    /// The local API request could not be built.
    #[error("Invalid local API request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The local API answered with a non-success status.
    #[error("Local API {path} returned {status}: {body}")]
    Status {
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed.
        body: String,
    },

    /// A local API response could not be decoded.
    #[error("Failed to decode local API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Bring-up was cancelled before the node was running.
    #[error("Overlay bring-up cancelled")]
    Cancelled,

    /// An operation needs a running node but bring-up has not completed.
    #[error("Overlay is not running")]
    NotRunning,

    /// The node has no DNS name, so no certificate can be issued.
    #[error("Overlay node has no DNS name")]
    NoDnsName,

    /// The node has no overlay addresses to bind on.
    #[error("Overlay node has no addresses")]
    NoAddresses,

    /// Certificate or key material was unusable.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Reading or writing the certificate cache failed.
    #[error("Certificate cache error at {path:?}: {source}")]
    CertCache {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Binding a listening socket failed.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<rustls::Error> for OverlayError {
    fn from(err: rustls::Error) -> Self {
        OverlayError::Tls(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = OverlayError::Status {
            path: "/localapi/v0/status".to_string(),
            status: 403,
            body: "access denied".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("403"));
        assert!(rendered.contains("access denied"));
    }

    #[test]
    fn test_bind_error_display() {
        let err = OverlayError::Bind {
            addr: "100.64.0.1:443".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("100.64.0.1:443"));
    }
}
