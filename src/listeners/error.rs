//! Error types for protocol listeners.

use thiserror::Error;

use super::ListenerKind;
use crate::overlay::OverlayError;
use crate::proxy::ProxyError;

/// Fatal errors of a single listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The overlay refused to open the listener.
    #[error("Failed to listen for {kind} on port {port}: {source}")]
    Bind {
        /// Listener that failed.
        kind: ListenerKind,
        /// Inbound port.
        port: u16,
        /// Overlay failure.
        #[source]
        source: OverlayError,
    },

    /// The proxy could not be built or its accept loop stopped.
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// The node has no overlay address to bind the DNS listener on.
    #[error("Overlay node has no address for the DNS listener")]
    NoOverlayAddress,
}
