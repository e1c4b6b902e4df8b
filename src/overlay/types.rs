//! Data returned by the overlay provider.

use std::net::IpAddr;

use serde::Deserialize;

/// This node's view of itself once it has joined the network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelfStatus {
    /// Fully qualified DNS name, usually with a trailing dot.
    pub dns_name: String,
    /// Overlay addresses assigned to this node.
    pub addresses: Vec<IpAddr>,
}

impl SelfStatus {
    /// DNS name without the trailing dot.
    pub fn host_name(&self) -> &str {
        self.dns_name.trim_end_matches('.')
    }

    /// First overlay address, used for packet listeners.
    pub fn first_address(&self) -> Option<IpAddr> {
        self.addresses.first().copied()
    }
}

/// A user known to the overlay's membership directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UserProfile {
    /// Directory id.
    #[serde(rename = "ID", default)]
    pub id: i64,
    /// Login, e.g. `alice@example.com`.
    #[serde(rename = "LoginName", default)]
    pub login_name: String,
    /// Human-readable name.
    #[serde(rename = "DisplayName", default)]
    pub display_name: String,
    /// Avatar URL, possibly empty.
    #[serde(rename = "ProfilePicURL", default)]
    pub profile_pic_url: String,
}

/// Result of a who-is lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    /// Name of the calling node.
    pub node_name: String,
    /// Owner of the calling node, if any.
    pub user_profile: Option<UserProfile>,
}
