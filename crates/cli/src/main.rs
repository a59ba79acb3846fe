//! Kafka Streams standalone application
//!
//! Starts the interactive console by default, or runs headless with `--cli`.

use clap::{CommandFactory, Parser};
use colored::Colorize;
use kstreams_cli::{headless, interactive, Cli, CliError, CliResult};
use pipeline::PipelineSettings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if matches!(e, CliError::MissingBootstrapServers) {
                eprintln!("{}", Cli::command().render_help());
            }
            1
        }
    };
    // Exit directly so a pending console read cannot hold the runtime open.
    std::process::exit(code);
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = cli.load_config()?;
    let settings = PipelineSettings::default();

    if cli.cli {
        headless::run_cli_mode(config, settings).await
    } else {
        interactive::run_interactive_mode(config, settings).await
    }
}

/// Initialize tracing/logging
///
/// Status lines already reach the console through the sink, so their
/// tracing mirror is filtered out here.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "kstreams_cli=debug,pipeline=debug,kstreams_config=debug,kstreams::status=off,info"
    } else {
        "warn,kstreams::status=off"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
