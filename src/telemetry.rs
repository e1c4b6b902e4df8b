//! Tracing setup.
//!
//! All diagnostics go to stderr through `tracing`. The supervised process's
//! output is re-emitted under the [`CHILD_TARGET`] target, and overlay
//! provider chatter lives under [`OVERLAY_TARGET`] so it can be enabled on its
//! own with `--debug-overlay`.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::CommonArgs;
use crate::config::{FileConfig, LogLevel};

/// Target for lines relayed from the supervised process.
pub const CHILD_TARGET: &str = "child";

/// Target prefix of the overlay provider.
pub const OVERLAY_TARGET: &str = "ts_plug::overlay";

/// Build the filter for a log level.
///
/// `RUST_LOG` directives, when present, are appended and therefore win.
pub fn filter_for(level: LogLevel, debug_overlay: bool) -> EnvFilter {
    let mut directives = level.as_directive().to_string();
    if debug_overlay {
        directives.push_str(&format!(",{OVERLAY_TARGET}=debug"));
    }
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV)
        && !env.trim().is_empty()
    {
        directives.push(',');
        directives.push_str(&env);
    }
    EnvFilter::new(directives)
}

/// Initialize the global tracing subscriber writing to stderr.
pub fn init_tracing(level: LogLevel, debug_overlay: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter_for(level, debug_overlay))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Initialize tracing from command-line flags and the config file, if loaded.
///
/// An unparsable level falls back to the default here; configuration
/// resolution reports it properly afterwards.
pub fn init_from_args(common: &CommonArgs, file: Option<&FileConfig>) {
    let file_level = file.and_then(|f| f.general.log_level.as_deref());
    let level = LogLevel::resolve(common.log_level.as_deref(), file_level).unwrap_or_default();
    let debug_overlay =
        common.debug_overlay || file.and_then(|f| f.overlay.debug).unwrap_or(false);

    if let Err(e) = init_tracing(level, debug_overlay) {
        eprintln!("{e:#}");
    }
}

/// Report a fatal error through tracing, or stderr if tracing is not set up.
pub fn report_error(err: &anyhow::Error) {
    if tracing::dispatcher::has_been_set() {
        tracing::error!("{err:#}");
    } else {
        eprintln!("Error: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_includes_overlay_directive() {
        let filter = filter_for(LogLevel::Warn, true).to_string();
        assert!(filter.contains("ts_plug::overlay=debug"), "{filter}");
        assert!(filter.contains("warn"), "{filter}");
    }

    #[test]
    fn test_filter_without_overlay_debug() {
        let filter = filter_for(LogLevel::Info, false).to_string();
        assert!(!filter.contains("ts_plug::overlay"), "{filter}");
    }
}
