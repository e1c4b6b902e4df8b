//! Request handlers placed in front of the reverse proxy.

use std::net::SocketAddr;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tracing::{debug, warn};

use super::reverse::{ProxyBody, ReverseProxy, error_response};
use crate::identity::{IdentityResolver, OverlayIdentity};

/// Turns one inbound request into one response.
#[async_trait]
pub trait ProxyHandler: Send + Sync + 'static {
    /// Handle `req` received from `remote`.
    async fn handle(&self, req: Request<Incoming>, remote: SocketAddr) -> Response<ProxyBody>;
}

#[async_trait]
impl ProxyHandler for ReverseProxy {
    async fn handle(&self, req: Request<Incoming>, remote: SocketAddr) -> Response<ProxyBody> {
        respond(self, req, remote, None).await
    }
}

/// Forward and turn proxy failures into gateway error responses.
async fn respond(
    proxy: &ReverseProxy,
    req: Request<Incoming>,
    remote: SocketAddr,
    identity: Option<&OverlayIdentity>,
) -> Response<ProxyBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match proxy.forward_as(req, remote, identity).await {
        Ok(response) => {
            debug!("{} {} from {} -> {}", method, path, remote, response.status());
            response
        }
        Err(e) => {
            warn!("{} {} from {} failed: {}", method, path, remote, e);
            error_response(&e)
        }
    }
}

/// Resolves the caller and has the proxy stamp identity headers on the request.
pub struct IdentityProxy {
    resolver: IdentityResolver,
    proxy: ReverseProxy,
}

impl IdentityProxy {
    /// Wrap `proxy` with identity injection.
    pub fn new(resolver: IdentityResolver, proxy: ReverseProxy) -> Self {
        Self { resolver, proxy }
    }
}

#[async_trait]
impl ProxyHandler for IdentityProxy {
    async fn handle(&self, req: Request<Incoming>, remote: SocketAddr) -> Response<ProxyBody> {
        let identity = self.resolver.resolve(remote).await;
        respond(&self.proxy, req, remote, Some(&identity)).await
    }
}
