use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use tailcast_daemon::cli::DaemonCli;
use tailcast_daemon::exit::exit_code;
use tailcast_daemon::logging;
use tailcast_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            // logging may not be initialized yet (config errors), so always print too
            tracing::error!(
                error = %format!("{e:#}"),
                exit_code = code,
                "tailcast-daemon exiting with error"
            );
            eprintln!("tailcast-daemon: {e:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: DaemonCli) -> Result<()> {
    let config = cli
        .load_config()
        .await
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "tailcast-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    orchestrator.run().await
}
