//! HTTP, HTTPS and public-ingress listeners.
//!
//! All three run the same identity-injecting reverse proxy and differ only in
//! how the overlay opens the socket.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::ListenerError;
use super::{ListenerContext, ListenerKind, ListenerSpec, PUBLIC_INGRESS_PORT};
use crate::identity::IdentityResolver;
use crate::overlay::StreamListener;
use crate::proxy::{IdentityProxy, ReverseProxy, serve};

/// Open the listener for `spec` and proxy until cancelled.
pub async fn run(
    spec: ListenerSpec,
    ctx: ListenerContext,
    cancel: CancellationToken,
) -> Result<(), ListenerError> {
    let port = spec.inbound_port();
    let opened = tokio::select! {
        opened = open(&spec, &ctx, port) => opened,
        () = cancel.cancelled() => return Ok(()),
    };
    let listener = opened.map_err(|source| ListenerError::Bind {
        kind: spec.kind,
        port,
        source,
    })?;

    let proxy = ReverseProxy::localhost(spec.mapping.outbound(), ctx.transport)?;
    info!(
        "{} listening on {} -> {}",
        spec.kind,
        listener_url(spec.kind, ctx.status.host_name(), port),
        proxy.upstream_url()
    );

    let resolver = IdentityResolver::new(ctx.identity.clone(), cancel.clone());
    let handler = Arc::new(IdentityProxy::new(resolver, proxy));
    serve(listener, handler, cancel).await?;
    Ok(())
}

async fn open(
    spec: &ListenerSpec,
    ctx: &ListenerContext,
    port: u16,
) -> Result<Box<dyn StreamListener>, crate::overlay::OverlayError> {
    match spec.kind {
        ListenerKind::Https => ctx.overlay.listen_tls(port).await,
        ListenerKind::PublicIngress => ctx.overlay.listen_public_ingress(PUBLIC_INGRESS_PORT).await,
        ListenerKind::Http | ListenerKind::Dns => ctx.overlay.listen(port).await,
    }
}

/// URL announced for a listener. Default ports are omitted.
pub fn listener_url(kind: ListenerKind, host: &str, port: u16) -> String {
    match (kind, port) {
        (ListenerKind::Http, 80) => format!("http://{host}"),
        (ListenerKind::Http, _) => format!("http://{host}:{port}"),
        (ListenerKind::Https | ListenerKind::PublicIngress, 443) => format!("https://{host}"),
        (ListenerKind::Https | ListenerKind::PublicIngress, _) => format!("https://{host}:{port}"),
        (ListenerKind::Dns, _) => format!("{host}:{port}"),
    }
}
