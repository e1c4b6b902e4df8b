//! Reverse proxy from overlay listeners to a local upstream.
//!
//! This module provides:
//! - [`ReverseProxy`]: per-request forwarding with connect and response deadlines
//! - [`IdentityProxy`]: caller identity headers stamped before forwarding
//! - [`serve`]: the HTTP/1 accept loop used by every HTTP-speaking listener
//!
//! # Architecture
//!
//! ```text
//! client --(overlay)--> StreamListener --> serve --> ProxyHandler --> upstream
//! ```
//!
//! Upstream failures never reach the client as connection errors; they become
//! `502 Bad Gateway` or `504 Gateway Timeout`.

mod error;
mod middleware;
mod reverse;
mod server;

pub use error::ProxyError;
pub use middleware::{IdentityProxy, ProxyHandler};
pub use reverse::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_HEADER_TIMEOUT, Dialer, OverlayDialer, ProxyBody,
    ProxyTransport, ReverseProxy, TcpDialer, append_forwarded_for, empty_body, error_response,
    full_body, strip_hop_by_hop,
};
pub use server::serve;
