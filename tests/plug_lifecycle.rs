mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{BringUp, LoopbackOverlay, http_get, spawn_echo_upstream, user};
use ts_plug::config::{ListenerSettings, LogLevel, OverlaySettings, PlugConfig, PortMapping};
use ts_plug::lifecycle::{Shutdown, ShutdownReason};
use ts_plug::plug::{self, PlugOptions};
use ts_plug::supervisor::{ChildSupervisor, ExitResult};

fn config(listeners: ListenerSettings, script: &str) -> PlugConfig {
    PlugConfig {
        hostname: "app".to_string(),
        state_dir: PathBuf::from(".data"),
        log_level: LogLevel::Info,
        overlay: OverlaySettings {
            socket: PathBuf::from("/nonexistent/tailscaled.sock"),
            debug: false,
        },
        listeners,
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
    }
}

fn options() -> PlugOptions {
    PlugOptions {
        supervisor: ChildSupervisor::new().with_grace_period(Duration::from_millis(500)),
        dns_poll_interval: Duration::from_millis(50),
        listener_grace: Duration::from_millis(500),
        ..PlugOptions::default()
    }
}

fn mapping(value: &str) -> PortMapping {
    PortMapping::parse(value, (0, 0)).unwrap()
}

#[tokio::test]
async fn test_child_exit_code_is_propagated() {
    let listeners = ListenerSettings {
        http: Some(mapping("80:8080")),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(None));

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        plug::run_with(&config(listeners, "exit 3"), overlay, Shutdown::new(), options()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome.child, ExitResult::Exited(3));
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.reason, Some(ShutdownReason::ChildExited));
    assert!(!outcome.listener_failed);
}

#[tokio::test]
async fn test_external_shutdown_terminates_child_and_listeners() {
    let upstream = spawn_echo_upstream().await;
    let listeners = ListenerSettings {
        http: Some(mapping(&format!("80:{}", upstream.port()))),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(user("bob@example.com", "Bob")));
    let shutdown = Shutdown::new();

    let run = {
        let overlay = overlay.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            plug::run_with(&config(listeners, "exec sleep 30"), overlay, shutdown, options()).await
        })
    };

    let addr = overlay.bound(80).await;
    let response = http_get(addr, &[]).await;
    assert!(response.contains("tailscale-user-login: bob@example.com"), "{response}");

    shutdown.trigger(ShutdownReason::Signal("SIGTERM"));
    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(outcome.child, ExitResult::Signaled(15));
    assert_eq!(outcome.reason, Some(ShutdownReason::Signal("SIGTERM")));
    assert!(!outcome.listener_failed);
}

#[tokio::test]
async fn test_listener_failure_stops_everything_with_failure() {
    let listeners = ListenerSettings {
        http: Some(mapping("80:8080")),
        https: Some(mapping("443:8080")),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(None).failing_tls());

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        plug::run_with(
            &config(listeners, "exec sleep 30"),
            overlay.clone(),
            Shutdown::new(),
            options(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    // The HTTP listener bound independently of the HTTPS failure.
    overlay.bound(80).await;
    assert!(outcome.listener_failed);
    assert!(matches!(
        outcome.reason,
        Some(ShutdownReason::ListenerFailed { ref listener, .. }) if listener == "https"
    ));
    assert_eq!(outcome.child, ExitResult::Signaled(15));
    assert_ne!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_clean_exit_after_listener_failure_is_still_failure() {
    let listeners = ListenerSettings {
        https: Some(mapping("443:8080")),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(None).failing_tls());

    let script = "trap 'exit 0' TERM; sleep 30 & wait";
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        plug::run_with(&config(listeners, script), overlay, Shutdown::new(), options()),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(outcome.listener_failed);
    assert_eq!(outcome.child, ExitResult::Exited(0));
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_missing_command_is_an_error() {
    let mut config = config(ListenerSettings::default(), "true");
    config.command = vec!["definitely-not-a-real-binary-ts-plug".to_string()];
    let overlay = Arc::new(LoopbackOverlay::new(None));

    let result = plug::run_with(&config, overlay, Shutdown::new(), options()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_signal_during_bring_up_unwinds() {
    let listeners = ListenerSettings {
        http: Some(mapping("80:8080")),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(None).with_bring_up(BringUp::Hang));
    let shutdown = Shutdown::new();

    let run = {
        let overlay = overlay.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            plug::run_with(&config(listeners, "exec sleep 30"), overlay, shutdown, options()).await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!run.is_finished());
    shutdown.trigger(ShutdownReason::Signal("SIGINT"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("bring-up did not unwind")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.reason, Some(ShutdownReason::Signal("SIGINT")));
    assert_eq!(outcome.child, ExitResult::Signaled(15));
    assert!(!outcome.listener_failed);
}

#[tokio::test]
async fn test_bring_up_failure_tears_down_child() {
    let listeners = ListenerSettings {
        http: Some(mapping("80:8080")),
        ..Default::default()
    };
    let overlay = Arc::new(LoopbackOverlay::new(None).with_bring_up(BringUp::Fail));
    let shutdown = Shutdown::new();

    // The child would sleep for 30s; returning early means it was terminated.
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        plug::run_with(&config(listeners, "exec sleep 30"), overlay, shutdown.clone(), options()),
    )
    .await
    .expect("bring-up failure did not stop the child");

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("Failed to bring up overlay"), "{err:#}");
    assert!(matches!(
        shutdown.reason(),
        Some(ShutdownReason::BringUpFailed(_))
    ));
    assert!(shutdown.has_failure());
}
