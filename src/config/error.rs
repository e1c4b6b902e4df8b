//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use super::port_map::PortMapError;

/// Errors that can occur while loading or resolving configuration.
///
/// All of these are fatal and are reported before any resource is acquired.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// The log level is not one of debug, info, warn, error.
    #[error("unknown log level '{0}' (expected debug | info | warn | error)")]
    InvalidLogLevel(String),

    /// A port mapping flag or setting could not be parsed.
    #[error("Invalid {listener} port mapping: {source}")]
    InvalidPortMapping {
        /// Listener the mapping belongs to.
        listener: &'static str,
        /// The parse failure.
        #[source]
        source: PortMapError,
    },

    /// No command was given to supervise.
    #[error("no command to run")]
    NoCommand,
}
