use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser};
use hive::{Hive, RunOptions, INSPECT_COMMAND};
use hive_bootstrap::{AppConfig, CliArgs};
use std::path::PathBuf;

mod events;
mod jobs;
mod metrics;
mod registered_cells;
mod server;

/// Hive example - an HTTP server assembled from cells
#[derive(Parser)]
#[command(name = "hive-example")]
#[command(about = "Hive example - an HTTP server assembled from cells")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Cells are declared before parsing so their flags can be registered.
    let hive = Hive::new(registered_cells::cells())?;
    let cmd = hive
        .register_flags(Cli::command())
        .subcommand(Hive::command());
    let matches = cmd.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    hive_bootstrap::logging::init_logging(&logging_config, &config.log_base_dir());

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let mut hive = hive.with_config_values(config.cells.clone());
    hive.bind_flags(&matches)?;

    if matches.subcommand_name() == Some(INSPECT_COMMAND) {
        hive.print_objects(&mut std::io::stdout().lock())?;
        return Ok(());
    }

    tracing::info!("Hive example starting");
    if let Err(e) = hive.run(RunOptions::default()).await {
        let e = anyhow::Error::from(e);
        tracing::error!(error = %error_chain(&e), "Hive example terminated with error");
        return Err(e);
    }
    tracing::info!("Hive example stopped");
    Ok(())
}

/// The error with every cause, `outer: inner: ...`.
fn error_chain(e: &anyhow::Error) -> String {
    format!("{e:#}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_error_keeps_the_cause() {
        let e = anyhow::Error::from(hive::HiveError::StartFailed {
            hook: "server".into(),
            source: anyhow::anyhow!("address in use"),
        });
        assert_eq!(error_chain(&e), "start hook server failed: address in use");
    }
}
