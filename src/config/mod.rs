//! Configuration system for ts-plug.
//!
//! Configuration is layered: built-in defaults, then the user config file
//! (`~/.config/ts-plug/config.toml`), then an optional `--config` file, then
//! CLI flags. The result is a single immutable [`PlugConfig`].
//!
//! # Merge Behavior
//!
//! - **Scalars** set in a later layer override earlier ones
//! - **Listener mappings** present in any layer enable that listener; the
//!   highest layer's mapping string wins

mod error;
mod loader;
pub mod port_map;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use port_map::{PortMapError, PortMapping};
pub use schema::{FileConfig, GeneralConfig, ListenersConfig, OverlayConfig};
pub use settings::{
    DEFAULT_HOSTNAME, DEFAULT_OVERLAY_SOCKET, DEFAULT_STATE_DIR, DEFAULT_UNPLUG_HOSTNAME,
    DEFAULT_WEB_HOSTNAME,
    DNS_DEFAULT_PORTS, HTTPS_DEFAULT_PORTS, HTTP_DEFAULT_PORTS, ListenerSettings, LogLevel,
    OverlaySettings, PlugConfig, UnplugConfig, resolve_overlay,
};
