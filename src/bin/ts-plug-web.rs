//! ts-plug-web: serve a single web application on an overlay network over
//! HTTPS, optionally through public ingress.

use anyhow::{Context, Result};
use clap::Parser;
use ts_plug::{
    cli::WebCli,
    config::{ConfigLoader, PlugConfig},
    orchestrator, telemetry,
};

fn main() {
    let cli = WebCli::parse();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            telemetry::report_error(&e);
            1
        }
    };

    std::process::exit(code);
}

fn run(cli: &WebCli) -> Result<i32> {
    let file = ConfigLoader::new().load(cli.common.config.as_deref());
    telemetry::init_from_args(&cli.common, file.as_ref().ok());
    let file = file.context("Failed to load configuration")?;

    let config = PlugConfig::from_web_cli(cli, file).context("Invalid configuration")?;
    orchestrator::run_plug(&config)
}
