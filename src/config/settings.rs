//! The resolved, immutable runtime configuration.
//!
//! [`PlugConfig`] is built once at startup from the CLI and the merged
//! configuration files, then passed explicitly to the supervisor. Nothing
//! mutates it afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use super::error::ConfigError;
use super::port_map::PortMapping;
use super::schema::FileConfig;
use crate::cli::{Cli, CommonArgs, WebCli};

/// Hostname used by the multi-protocol program.
pub const DEFAULT_HOSTNAME: &str = "tsmultiplug";

/// Hostname used by the single-protocol program.
pub const DEFAULT_WEB_HOSTNAME: &str = "tsplug";

/// Hostname used by the reverse-direction mode.
pub const DEFAULT_UNPLUG_HOSTNAME: &str = "tsunplug";

/// Default overlay state directory.
pub const DEFAULT_STATE_DIR: &str = ".data";

/// Default path of the overlay daemon's local API socket.
pub const DEFAULT_OVERLAY_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

/// Default HTTP mapping.
pub const HTTP_DEFAULT_PORTS: (u16, u16) = (80, 8080);

/// Default HTTPS mapping.
pub const HTTPS_DEFAULT_PORTS: (u16, u16) = (443, 8080);

/// Default DNS mapping.
pub const DNS_DEFAULT_PORTS: (u16, u16) = (53, 53);

/// Log verbosity accepted by `--log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Everything including per-request chatter.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Resolve the level from CLI and file values, CLI first.
    pub fn resolve(cli: Option<&str>, file: Option<&str>) -> Result<Self, ConfigError> {
        cli.or(file).map_or(Ok(LogLevel::default()), str::parse)
    }

    /// `EnvFilter` directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// How to reach the overlay provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySettings {
    /// Local API socket of the overlay daemon.
    pub socket: PathBuf,
    /// Verbose overlay logging regardless of the base log level.
    pub debug: bool,
}

/// Which listeners run and on which ports. `None` means disabled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListenerSettings {
    /// Plain HTTP on the overlay.
    pub http: Option<PortMapping>,
    /// HTTPS, either overlay-only TLS or public ingress.
    pub https: Option<PortMapping>,
    /// DNS-over-UDP forwarding.
    pub dns: Option<PortMapping>,
    /// Serve HTTPS through public ingress.
    pub public: bool,
}

impl ListenerSettings {
    /// True when no listener is enabled.
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.dns.is_none()
    }
}

/// Complete configuration for one supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugConfig {
    /// Hostname on the overlay network.
    pub hostname: String,
    /// Overlay state directory.
    pub state_dir: PathBuf,
    /// Log level.
    pub log_level: LogLevel,
    /// Overlay provider settings.
    pub overlay: OverlaySettings,
    /// Enabled listeners.
    pub listeners: ListenerSettings,
    /// Command and arguments to supervise.
    pub command: Vec<String>,
}

impl PlugConfig {
    /// Resolve the multi-protocol configuration.
    ///
    /// A listener is enabled by its boolean flag, its port flag, or its entry
    /// in the config file. When none is enabled HTTPS is used.
    pub fn from_cli(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let mut base = Self::resolve_common(&cli.common, &file, DEFAULT_HOSTNAME)?;

        let mut listeners = ListenerSettings {
            http: listener_mapping(
                "http",
                cli.http,
                cli.http_port.as_deref(),
                file.listeners.http.as_deref(),
                HTTP_DEFAULT_PORTS,
            )?,
            https: listener_mapping(
                "https",
                cli.https,
                cli.https_port.as_deref(),
                file.listeners.https.as_deref(),
                HTTPS_DEFAULT_PORTS,
            )?,
            dns: listener_mapping(
                "dns",
                cli.dns,
                cli.dns_port.as_deref(),
                file.listeners.dns.as_deref(),
                DNS_DEFAULT_PORTS,
            )?,
            public: cli.public || file.listeners.public.unwrap_or(false),
        };

        if listeners.is_empty() {
            info!("no listeners enabled, using HTTPS by default");
            listeners.https = Some(PortMapping::with_default(
                HTTPS_DEFAULT_PORTS.0,
                HTTPS_DEFAULT_PORTS.1,
            ));
        }

        base.listeners = listeners;
        base.command = require_command(&cli.command)?;
        Ok(base)
    }

    /// Resolve the single-protocol configuration: HTTPS on 443 to `--port`.
    pub fn from_web_cli(cli: &WebCli, file: FileConfig) -> Result<Self, ConfigError> {
        let mut base = Self::resolve_common(&cli.common, &file, DEFAULT_WEB_HOSTNAME)?;

        let https = PortMapping::parse(&format!("{}:{}", HTTPS_DEFAULT_PORTS.0, cli.port), HTTPS_DEFAULT_PORTS)
            .map_err(|source| ConfigError::InvalidPortMapping {
                listener: "https",
                source,
            })?;

        base.listeners = ListenerSettings {
            https: Some(https),
            public: cli.funnel || file.listeners.public.unwrap_or(false),
            ..Default::default()
        };
        base.command = require_command(&cli.command)?;
        Ok(base)
    }

    fn resolve_common(
        common: &CommonArgs,
        file: &FileConfig,
        default_hostname: &str,
    ) -> Result<Self, ConfigError> {
        let log_level =
            LogLevel::resolve(common.log_level.as_deref(), file.general.log_level.as_deref())?;

        Ok(Self {
            hostname: common
                .hostname
                .clone()
                .or_else(|| file.general.hostname.clone())
                .unwrap_or_else(|| default_hostname.to_string()),
            state_dir: common
                .dir
                .clone()
                .or_else(|| file.general.state_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            log_level,
            overlay: resolve_overlay(common, file),
            listeners: ListenerSettings::default(),
            command: Vec::new(),
        })
    }
}

/// Configuration for the reverse-direction mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnplugConfig {
    /// Hostname on the overlay network.
    pub hostname: String,
    /// Overlay state directory.
    pub state_dir: PathBuf,
    /// Log level.
    pub log_level: LogLevel,
    /// Overlay provider settings.
    pub overlay: OverlaySettings,
    /// Port to listen on at 127.0.0.1.
    pub local_port: u16,
    /// Overlay address of the remote service.
    pub remote_addr: String,
}

impl UnplugConfig {
    /// Resolve from shared flags and the subcommand's arguments.
    pub fn from_cli(
        common: &CommonArgs,
        local_port: u16,
        remote_addr: &str,
        file: FileConfig,
    ) -> Result<Self, ConfigError> {
        let base = PlugConfig::resolve_common(common, &file, DEFAULT_UNPLUG_HOSTNAME)?;
        Ok(Self {
            hostname: base.hostname,
            state_dir: base.state_dir,
            log_level: base.log_level,
            overlay: base.overlay,
            local_port,
            remote_addr: remote_addr.to_string(),
        })
    }
}

/// Resolve overlay settings shared by every program variant.
pub fn resolve_overlay(common: &CommonArgs, file: &FileConfig) -> OverlaySettings {
    OverlaySettings {
        socket: common
            .socket
            .clone()
            .or_else(|| file.overlay.socket.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OVERLAY_SOCKET)),
        debug: common.debug_overlay || file.overlay.debug.unwrap_or(false),
    }
}

fn listener_mapping(
    listener: &'static str,
    enabled: bool,
    cli_value: Option<&str>,
    file_value: Option<&str>,
    default: (u16, u16),
) -> Result<Option<PortMapping>, ConfigError> {
    if !enabled && cli_value.is_none() && file_value.is_none() {
        return Ok(None);
    }

    let mut mapping = PortMapping::with_default(default.0, default.1);
    for value in [file_value, cli_value].into_iter().flatten() {
        mapping
            .set(value)
            .map_err(|source| ConfigError::InvalidPortMapping { listener, source })?;
    }
    Ok(Some(mapping))
}

fn require_command(command: &[String]) -> Result<Vec<String>, ConfigError> {
    if command.is_empty() {
        return Err(ConfigError::NoCommand);
    }
    Ok(command.to_vec())
}
