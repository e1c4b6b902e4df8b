mod common;

use std::sync::Arc;

use common::{LoopbackOverlay, http_get, spawn_echo_upstream, user};
use ts_plug::config::PortMapping;
use ts_plug::lifecycle::Shutdown;
use ts_plug::listeners::{ListenerContext, ListenerKind, ListenerSet, ListenerSpec};
use ts_plug::overlay::{Identity, Overlay};

async fn proxy_with_identity(identity: Option<Identity>) -> (Arc<LoopbackOverlay>, Shutdown) {
    let upstream = spawn_echo_upstream().await;
    let overlay = Arc::new(LoopbackOverlay::new(identity));
    let identity_client = overlay.identity_client().await.unwrap();
    let ctx = ListenerContext::new(
        overlay.clone(),
        LoopbackOverlay::status(),
        identity_client,
    );

    let spec = ListenerSpec {
        kind: ListenerKind::Http,
        mapping: PortMapping::parse(&format!("80:{}", upstream.port()), (0, 0)).unwrap(),
    };
    let shutdown = Shutdown::new();
    // Dropping the set leaves the listener running until shutdown fires.
    let _set = ListenerSet::start(vec![spec], ctx, &shutdown);
    (overlay, shutdown)
}

fn header_line<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .lines()
        .find(|line| line.starts_with(&format!("{name}:")))
}

#[tokio::test]
async fn test_identity_headers_injected() {
    let (overlay, shutdown) = proxy_with_identity(user("alice@example.com", "Alice")).await;
    let addr = overlay.bound(80).await;

    let response = http_get(addr, &[]).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(
        header_line(&response, "tailscale-user-login"),
        Some("tailscale-user-login: alice@example.com")
    );
    assert_eq!(
        header_line(&response, "tailscale-user-name"),
        Some("tailscale-user-name: Alice")
    );
    assert_eq!(
        header_line(&response, "tailscale-user-profile-pic"),
        Some("tailscale-user-profile-pic: https://example.com/alice@example.com.png")
    );
    assert!(header_line(&response, "x-forwarded-for").is_some(), "{response}");

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}

#[tokio::test]
async fn test_client_supplied_identity_is_overwritten() {
    let (overlay, shutdown) = proxy_with_identity(user("alice@example.com", "Alice")).await;
    let addr = overlay.bound(80).await;

    let response = http_get(
        addr,
        &[
            ("Tailscale-User-Login", "evil@example.com"),
            ("Tailscale-User-Name", "Mallory"),
        ],
    )
    .await;

    assert!(!response.contains("evil@example.com"), "{response}");
    assert!(!response.contains("Mallory"), "{response}");
    assert_eq!(
        response
            .lines()
            .filter(|line| line.starts_with("tailscale-user-login:"))
            .count(),
        1
    );

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}

#[tokio::test]
async fn test_anonymous_caller_gets_empty_headers() {
    let (overlay, shutdown) = proxy_with_identity(None).await;
    let addr = overlay.bound(80).await;

    let response = http_get(addr, &[("Tailscale-User-Login", "evil@example.com")]).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(!response.contains("evil@example.com"), "{response}");
    assert_eq!(
        header_line(&response, "tailscale-user-login").map(str::trim_end),
        Some("tailscale-user-login:")
    );
    assert_eq!(
        header_line(&response, "tailscale-user-name").map(str::trim_end),
        Some("tailscale-user-name:")
    );

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}

#[tokio::test]
async fn test_tagged_device_is_anonymous() {
    let (overlay, shutdown) = proxy_with_identity(user("tagged-devices", "tagged-devices")).await;
    let addr = overlay.bound(80).await;

    let response = http_get(addr, &[]).await;
    assert!(!response.contains("tagged-devices"), "{response}");
    assert_eq!(
        header_line(&response, "tailscale-user-login").map(str::trim_end),
        Some("tailscale-user-login:")
    );

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}

#[tokio::test]
async fn test_identity_headers_survive_connection_listing() {
    let (overlay, shutdown) = proxy_with_identity(user("alice@example.com", "Alice")).await;
    let addr = overlay.bound(80).await;

    let response = http_get(
        addr,
        &[(
            "Connection",
            "close, Tailscale-User-Login, Tailscale-User-Name, Tailscale-User-Profile-Pic",
        )],
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(
        header_line(&response, "tailscale-user-login"),
        Some("tailscale-user-login: alice@example.com")
    );
    assert_eq!(
        header_line(&response, "tailscale-user-name"),
        Some("tailscale-user-name: Alice")
    );
    assert!(
        header_line(&response, "tailscale-user-profile-pic").is_some(),
        "{response}"
    );

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}

#[tokio::test]
async fn test_anonymous_headers_survive_connection_listing() {
    let (overlay, shutdown) = proxy_with_identity(None).await;
    let addr = overlay.bound(80).await;

    let response = http_get(
        addr,
        &[("Connection", "close, Tailscale-User-Login, Tailscale-User-Name")],
    )
    .await;

    assert_eq!(
        header_line(&response, "tailscale-user-login").map(str::trim_end),
        Some("tailscale-user-login:")
    );
    assert_eq!(
        header_line(&response, "tailscale-user-name").map(str::trim_end),
        Some("tailscale-user-name:")
    );

    shutdown.trigger(ts_plug::lifecycle::ShutdownReason::ChildExited);
}
