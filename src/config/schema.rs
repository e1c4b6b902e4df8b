//! Configuration file schema.
//!
//! Every field is optional so that files can be layered: later files only
//! override the values they actually set.
//!
//! ```toml
//! [general]
//! hostname = "billing"
//! state_dir = "/var/lib/ts-plug"
//! log_level = "debug"
//!
//! [overlay]
//! socket = "/var/run/tailscale/tailscaled.sock"
//! debug = false
//!
//! [listeners]
//! http = "80:3000"
//! dns = "53:5353"
//! public = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Overlay provider settings.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Listener settings.
    #[serde(default)]
    pub listeners: ListenersConfig,
}

impl FileConfig {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: FileConfig) {
        self.general.merge(other.general);
        self.overlay.merge(other.overlay);
        self.listeners.merge(other.listeners);
    }
}

/// Node identity and logging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Hostname on the overlay network.
    pub hostname: Option<String>,
    /// Directory holding overlay state.
    pub state_dir: Option<PathBuf>,
    /// Log level: debug, info, warn, error.
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        merge_opt(&mut self.hostname, other.hostname);
        merge_opt(&mut self.state_dir, other.state_dir);
        merge_opt(&mut self.log_level, other.log_level);
    }
}

/// Overlay provider settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    /// Path to the overlay daemon's local API socket.
    pub socket: Option<PathBuf>,
    /// Verbose overlay logging.
    pub debug: Option<bool>,
}

impl OverlayConfig {
    fn merge(&mut self, other: OverlayConfig) {
        merge_opt(&mut self.socket, other.socket);
        merge_opt(&mut self.debug, other.debug);
    }
}

/// Listener enablement. A present mapping string enables that listener;
/// an empty string enables it with its default ports.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenersConfig {
    /// HTTP port mapping.
    pub http: Option<String>,
    /// HTTPS port mapping.
    pub https: Option<String>,
    /// DNS port mapping.
    pub dns: Option<String>,
    /// Serve HTTPS through public ingress instead of overlay-only TLS.
    pub public: Option<bool>,
}

impl ListenersConfig {
    fn merge(&mut self, other: ListenersConfig) {
        merge_opt(&mut self.http, other.http);
        merge_opt(&mut self.https, other.https);
        merge_opt(&mut self.dns, other.dns);
        merge_opt(&mut self.public, other.public);
    }
}

fn merge_opt<T>(slot: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *slot = other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config: FileConfig = toml::from_str(
            r#"
            [general]
            hostname = "billing"
            log_level = "debug"

            [overlay]
            debug = true

            [listeners]
            http = "80:3000"
            public = true
            "#,
        )
        .unwrap();

        assert_eq!(config.general.hostname.as_deref(), Some("billing"));
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.overlay.debug, Some(true));
        assert_eq!(config.listeners.http.as_deref(), Some("80:3000"));
        assert_eq!(config.listeners.https, None);
        assert_eq!(config.listeners.public, Some(true));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[general]\nverbose = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base: FileConfig = toml::from_str(
            r#"
            [general]
            hostname = "base"
            log_level = "warn"
            "#,
        )
        .unwrap();
        let overlay: FileConfig = toml::from_str(
            r#"
            [general]
            hostname = "override"
            [listeners]
            dns = ""
            "#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.general.hostname.as_deref(), Some("override"));
        assert_eq!(base.general.log_level.as_deref(), Some("warn"));
        assert_eq!(base.listeners.dns.as_deref(), Some(""));
    }
}
