//! Command-line interface definitions for ts-plug.
//!
//! Uses clap's derive API for type-safe argument parsing. Two front ends share
//! [`CommonArgs`]: the multi-protocol `ts-plug` and the single-protocol
//! `ts-plug-web`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Options shared by every program variant.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Hostname on the overlay network.
    ///
    /// With a host tailscaled this renames the host's own node, since the
    /// daemon owns a single node.
    #[arg(long = "hostname", visible_alias = "hn", value_name = "NAME", global = true)]
    pub hostname: Option<String>,

    /// Directory for overlay state.
    #[arg(long = "dir", value_name = "DIR", global = true)]
    pub dir: Option<PathBuf>,

    /// Log level: debug, info, warn, error.
    #[arg(long = "log", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of the user config, giving it the
    /// highest priority except for CLI flags.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Local API socket of the overlay daemon.
    #[arg(long = "socket", value_name = "PATH", global = true)]
    pub socket: Option<PathBuf>,

    /// Verbose logging from the overlay provider.
    #[arg(long = "debug-overlay", visible_alias = "debug-tsnet", global = true)]
    pub debug_overlay: bool,
}

/// Expose a local process on a tailnet.
///
/// ts-plug starts COMMAND, joins the overlay network as its own node, and
/// forwards HTTP, HTTPS and DNS traffic from the overlay to the process on
/// localhost. HTTP requests carry the caller's overlay identity in
/// `Tailscale-User-*` headers.
#[derive(Parser, Debug)]
#[command(name = "ts-plug")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to supervise COMMAND).
    #[command(subcommand)]
    pub subcommand: Option<Commands>,

    /// Options shared with the other program variants.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Enable the HTTP listener (default 80:8080).
    #[arg(long = "http")]
    pub http: bool,

    /// HTTP port mapping; also enables the HTTP listener.
    #[arg(long = "http-port", value_name = "PORT|IN:OUT")]
    pub http_port: Option<String>,

    /// Enable the HTTPS listener (default 443:8080).
    #[arg(long = "https")]
    pub https: bool,

    /// HTTPS port mapping; also enables the HTTPS listener.
    #[arg(long = "https-port", value_name = "PORT|IN:OUT")]
    pub https_port: Option<String>,

    /// Enable the DNS listener (default 53:53).
    #[arg(long = "dns")]
    pub dns: bool,

    /// DNS port mapping; also enables the DNS listener.
    #[arg(long = "dns-port", value_name = "PORT|IN:OUT")]
    pub dns_port: Option<String>,

    /// Serve HTTPS publicly through the overlay's ingress.
    #[arg(long = "public", visible_alias = "funnel")]
    pub public: bool,

    /// Command to supervise, with its arguments.
    ///
    /// Everything after the first positional argument (or after `--`) is
    /// passed to the command unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Subcommands for ts-plug.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Expose a service from the overlay network on localhost.
    ///
    /// The reverse direction: listens on 127.0.0.1:PORT and forwards every
    /// request to REMOTE_ADDR over the overlay.
    Unplug {
        /// Local port to listen on.
        #[arg(short = 'p', long = "port", default_value_t = 80)]
        port: u16,

        /// Overlay address of the remote service (`host` or `host:port`).
        remote_addr: String,
    },
}

/// Serve a single web application on a tailnet over HTTPS.
#[derive(Parser, Debug)]
#[command(name = "ts-plug-web")]
#[command(author, version, about, long_about = None)]
pub struct WebCli {
    /// Options shared with the other program variants.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Local port the application listens on.
    #[arg(long = "port", default_value_t = 8080)]
    pub port: u16,

    /// Serve publicly through the overlay's ingress.
    #[arg(long = "funnel", visible_alias = "public")]
    pub funnel: bool,

    /// Command to supervise, with its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}
