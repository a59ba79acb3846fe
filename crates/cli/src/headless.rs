//! CLI mode: run the pipeline until Ctrl-C or until it stops by itself

use colored::Colorize;
use kstreams_config::StoredConfig;
use pipeline::{ConsoleSink, KafkaConnector, Orchestrator, PipelineError, PipelineSettings};
use std::sync::Arc;
use tracing::debug;

use crate::{CliError, CliResult};

/// Build an orchestrator that talks to Kafka and logs to stdout
pub fn console_orchestrator(settings: PipelineSettings) -> Orchestrator {
    let connector = KafkaConnector::new(
        settings.engine.request_timeout,
        settings.engine.replace_backoff,
    );
    Orchestrator::new(Arc::new(connector), Arc::new(ConsoleSink)).with_settings(settings)
}

/// Run headless with `config`
///
/// Only a missing bootstrap address or an invalid configuration is an
/// error; a start failure has already been reported through the console
/// sink and ends the run normally.
pub async fn run_cli_mode(config: StoredConfig, settings: PipelineSettings) -> CliResult<()> {
    let config = config.to_pipeline_config();
    if config.bootstrap_servers().is_empty() {
        return Err(CliError::MissingBootstrapServers);
    }

    println!("{}", "Starting Kafka Streams Application in CLI mode".bold());
    println!("Bootstrap Servers: {}", config.bootstrap_servers());
    println!("Input Topic: {}", config.input_topic());
    println!("Output Topic: {}", config.output_topic());

    let orchestrator = console_orchestrator(settings);
    match orchestrator.start(config).await {
        Ok(()) => {}
        Err(e @ PipelineError::InvalidConfig(_)) => return Err(e.into()),
        Err(e) => {
            debug!("Start failed: {}", e);
            return Ok(());
        }
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                debug!("Failed to listen for Ctrl-C: {}", e);
            }
            println!("{}", "Shutting down...".yellow());
            orchestrator.stop().await;
        }
        _ = orchestrator.wait_until_stopped() => {
            debug!("Pipeline stopped by itself");
        }
    }

    Ok(())
}
