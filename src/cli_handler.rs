//! Subcommand handling for ts-plug.

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{Commands, CommonArgs};
use crate::config::{FileConfig, UnplugConfig};
use crate::orchestrator::{build_runtime, overlay_for};
use crate::unplug;

/// Run a subcommand and return the process exit code.
pub fn handle_command(command: Commands, common: &CommonArgs, file: FileConfig) -> Result<i32> {
    match command {
        Commands::Unplug { port, remote_addr } => {
            let config = UnplugConfig::from_cli(common, port, &remote_addr, file)
                .context("Invalid configuration")?;
            run_unplug(&config)
        }
    }
}

fn run_unplug(config: &UnplugConfig) -> Result<i32> {
    info!(
        "Unplugging {} to 127.0.0.1:{} as {}",
        config.remote_addr, config.local_port, config.hostname
    );

    let rt = build_runtime()?;
    let overlay = overlay_for(&config.overlay);
    rt.block_on(unplug::run(config, overlay))?;
    Ok(0)
}
