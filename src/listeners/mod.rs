//! Protocol listeners on the overlay network.
//!
//! Each enabled protocol runs as an independent task. A listener that fails
//! to bind or whose accept loop aborts logs the error and fires the shared
//! shutdown; its siblings keep serving until that cancellation reaches them.
//!
//! | Listener | Socket                        | Upstream                  |
//! |----------|-------------------------------|---------------------------|
//! | http     | overlay TCP `in`              | `http://localhost:out`    |
//! | https    | overlay TLS `in`              | `http://localhost:out`    |
//! | public   | public TLS 443                | `http://localhost:out`    |
//! | dns      | UDP `in` on first overlay IP  | UDP `127.0.0.1:out`       |

pub mod dns;
mod error;
pub mod http;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub use dns::DnsForwarder;
pub use error::ListenerError;

use crate::config::{ListenerSettings, PortMapping};
use crate::lifecycle::{Shutdown, ShutdownReason};
use crate::overlay::{IdentityClient, Overlay, SelfStatus};
use crate::proxy::ProxyTransport;

/// Port used by public ingress regardless of the HTTPS mapping.
pub const PUBLIC_INGRESS_PORT: u16 = 443;

/// The protocols a plug can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Plain HTTP on the overlay.
    Http,
    /// HTTPS with the node certificate, overlay only.
    Https,
    /// HTTPS reachable from the internet.
    PublicIngress,
    /// DNS over UDP.
    Dns,
}

impl ListenerKind {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Http => "http",
            ListenerKind::Https => "https",
            ListenerKind::PublicIngress => "public",
            ListenerKind::Dns => "dns",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listener to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    /// Protocol.
    pub kind: ListenerKind,
    /// Inbound and upstream ports.
    pub mapping: PortMapping,
}

impl ListenerSpec {
    /// Port bound on the overlay side.
    pub fn inbound_port(&self) -> u16 {
        match self.kind {
            ListenerKind::PublicIngress => PUBLIC_INGRESS_PORT,
            _ => self.mapping.inbound(),
        }
    }
}

/// Translate listener settings into the listeners to start.
///
/// The public toggle turns the HTTPS listener into public ingress.
pub fn plan(settings: &ListenerSettings) -> Vec<ListenerSpec> {
    let mut specs = Vec::new();

    if let Some(mapping) = settings.http {
        specs.push(ListenerSpec {
            kind: ListenerKind::Http,
            mapping,
        });
    }

    if let Some(mapping) = settings.https {
        let kind = if settings.public {
            if mapping.inbound() != PUBLIC_INGRESS_PORT {
                warn!(
                    "Public ingress always uses port {}, ignoring inbound port {}",
                    PUBLIC_INGRESS_PORT,
                    mapping.inbound()
                );
            }
            ListenerKind::PublicIngress
        } else {
            ListenerKind::Https
        };
        specs.push(ListenerSpec { kind, mapping });
    }

    if let Some(mapping) = settings.dns {
        specs.push(ListenerSpec {
            kind: ListenerKind::Dns,
            mapping,
        });
    }

    specs
}

/// Everything a listener needs once the overlay is up.
#[derive(Clone)]
pub struct ListenerContext {
    /// Overlay provider.
    pub overlay: Arc<dyn Overlay>,
    /// This node's status from bring-up.
    pub status: SelfStatus,
    /// Shared who-is client.
    pub identity: Arc<dyn IdentityClient>,
    /// Deadlines for proxied HTTP requests.
    pub transport: ProxyTransport,
    /// Idle wake-up interval of the DNS receive loop.
    pub dns_poll_interval: Duration,
}

impl ListenerContext {
    /// Context with default proxy and DNS timing.
    pub fn new(
        overlay: Arc<dyn Overlay>,
        status: SelfStatus,
        identity: Arc<dyn IdentityClient>,
    ) -> Self {
        Self {
            overlay,
            status,
            identity,
            transport: ProxyTransport::default(),
            dns_poll_interval: dns::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Running listeners.
pub struct ListenerSet {
    tasks: Vec<(ListenerKind, JoinHandle<()>)>,
}

impl ListenerSet {
    /// Start every listener in `specs` concurrently.
    ///
    /// A fatal listener error triggers `shutdown`.
    pub fn start(specs: Vec<ListenerSpec>, ctx: ListenerContext, shutdown: &Shutdown) -> Self {
        let tasks = specs
            .into_iter()
            .map(|spec| {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = run_listener(spec, ctx, shutdown.token()).await {
                        error!("{} listener failed: {}", spec.kind, e);
                        shutdown.trigger(ShutdownReason::ListenerFailed {
                            listener: spec.kind.to_string(),
                            message: e.to_string(),
                        });
                    }
                });
                (spec.kind, task)
            })
            .collect();

        Self { tasks }
    }

    /// Number of listeners started.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no listener was started.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every listener to stop, aborting stragglers after `grace`.
    pub async fn join(self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        for (kind, mut task) in self.tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("{} listener did not stop within {:?}, aborting", kind, grace);
                task.abort();
            }
        }
    }
}

async fn run_listener(
    spec: ListenerSpec,
    ctx: ListenerContext,
    cancel: CancellationToken,
) -> Result<(), ListenerError> {
    match spec.kind {
        ListenerKind::Dns => dns::run(spec, ctx, cancel).await,
        ListenerKind::Http | ListenerKind::Https | ListenerKind::PublicIngress => {
            http::run(spec, ctx, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(inbound: u16, outbound: u16) -> PortMapping {
        PortMapping::parse(&format!("{inbound}:{outbound}"), (0, 0)).unwrap()
    }

    #[test]
    fn test_plan_all_listeners() {
        let settings = ListenerSettings {
            http: Some(mapping(80, 3000)),
            https: Some(mapping(443, 3000)),
            dns: Some(mapping(53, 5353)),
            public: false,
        };

        let kinds: Vec<_> = plan(&settings).iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![ListenerKind::Http, ListenerKind::Https, ListenerKind::Dns]
        );
    }

    #[test]
    fn test_public_replaces_https() {
        let settings = ListenerSettings {
            https: Some(mapping(8443, 3000)),
            public: true,
            ..Default::default()
        };

        let specs = plan(&settings);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind, ListenerKind::PublicIngress);
        assert_eq!(specs[0].inbound_port(), PUBLIC_INGRESS_PORT);
        assert_eq!(specs[0].mapping.outbound(), 3000);
    }

    #[test]
    fn test_public_without_https_is_ignored() {
        let settings = ListenerSettings {
            http: Some(mapping(80, 8080)),
            public: true,
            ..Default::default()
        };

        let specs = plan(&settings);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind, ListenerKind::Http);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ListenerKind::PublicIngress.to_string(), "public");
        assert_eq!(ListenerKind::Dns.as_str(), "dns");
    }
}
