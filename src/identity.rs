//! Caller identity for proxied HTTP requests.
//!
//! Every request forwarded to the child carries the three `Tailscale-User-*`
//! headers. They are always overwritten, never appended, so a caller cannot
//! smuggle its own values through. Lookups that fail, find nothing, or hit a
//! tagged device produce empty values.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::HeaderMap;
use hyper::header::{HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::overlay::{Identity, IdentityClient};

/// Login name of the caller.
pub const USER_LOGIN_HEADER: HeaderName = HeaderName::from_static("tailscale-user-login");

/// Display name of the caller.
pub const USER_NAME_HEADER: HeaderName = HeaderName::from_static("tailscale-user-name");

/// Profile picture URL of the caller.
pub const USER_PROFILE_PIC_HEADER: HeaderName =
    HeaderName::from_static("tailscale-user-profile-pic");

/// Login name the directory reports for nodes owned by tags rather than users.
pub const TAGGED_DEVICES: &str = "tagged-devices";

/// Identity attached to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayIdentity {
    /// Login, empty when anonymous.
    pub login_name: String,
    /// Display name, empty when anonymous.
    pub display_name: String,
    /// Avatar URL, empty when anonymous or unset.
    pub profile_picture_url: String,
    /// The caller is a tagged device.
    pub is_tagged: bool,
}

impl OverlayIdentity {
    /// Interpret a directory lookup.
    pub fn from_lookup(found: Option<Identity>) -> Self {
        let Some(profile) = found.and_then(|identity| identity.user_profile) else {
            return Self::default();
        };

        if profile.login_name == TAGGED_DEVICES {
            return Self {
                is_tagged: true,
                ..Self::default()
            };
        }

        Self {
            login_name: profile.login_name,
            display_name: profile.display_name,
            profile_picture_url: profile.profile_pic_url,
            is_tagged: false,
        }
    }

    /// True when no user is attached.
    pub fn is_anonymous(&self) -> bool {
        self.login_name.is_empty()
    }
}

/// Resolves callers without ever failing.
#[derive(Clone)]
pub struct IdentityResolver {
    client: Arc<dyn IdentityClient>,
    cancel: CancellationToken,
}

impl IdentityResolver {
    /// Resolver using `client`; lookups abort when `cancel` fires.
    pub fn new(client: Arc<dyn IdentityClient>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Identify the caller at `remote`. Errors yield an anonymous identity.
    pub async fn resolve(&self, remote: SocketAddr) -> OverlayIdentity {
        match self.client.who_is(&self.cancel, remote).await {
            Ok(found) => {
                let identity = OverlayIdentity::from_lookup(found);
                debug!(
                    login = %identity.login_name,
                    tagged = identity.is_tagged,
                    "Resolved caller {}",
                    remote
                );
                identity
            }
            Err(e) => {
                warn!("Identity lookup for {} failed: {}", remote, e);
                OverlayIdentity::default()
            }
        }
    }
}

/// Overwrite the identity headers, setting all three even when empty.
pub fn apply_identity_headers(headers: &mut HeaderMap, identity: &OverlayIdentity) {
    headers.insert(USER_LOGIN_HEADER, header_value(&identity.login_name));
    headers.insert(USER_NAME_HEADER, header_value(&identity.display_name));
    headers.insert(
        USER_PROFILE_PIC_HEADER,
        header_value(&identity.profile_picture_url),
    );
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_bytes(value.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}
