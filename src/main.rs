//! ts-plug: expose a local process on an overlay network.
//!
//! Parses the command line, loads layered configuration, sets up logging and
//! hands off to the orchestrator. The process exits with the supervised
//! command's exit code.

use anyhow::{Context, Result};
use clap::Parser;
use ts_plug::{
    cli::Cli,
    cli_handler::handle_command,
    config::{ConfigLoader, PlugConfig},
    orchestrator, telemetry,
};

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            telemetry::report_error(&e);
            1
        }
    };

    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let file = ConfigLoader::new().load(cli.common.config.as_deref());
    telemetry::init_from_args(&cli.common, file.as_ref().ok());
    let file = file.context("Failed to load configuration")?;

    if let Some(command) = cli.subcommand.clone() {
        return handle_command(command, &cli.common, file);
    }

    let config = PlugConfig::from_cli(&cli, file).context("Invalid configuration")?;
    orchestrator::run_plug(&config)
}
