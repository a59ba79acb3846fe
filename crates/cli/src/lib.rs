//! Kafka Streams standalone front end
//!
//! Two ways to drive the uppercase pipeline: a headless CLI mode that runs
//! until Ctrl-C, and an interactive console that edits the configuration
//! form and starts or stops the pipeline on command.

pub mod headless;
pub mod interactive;

use clap::Parser;
use kstreams_config::{ConfigError, ConfigLoader, PartialConfig, StoredConfig};
use pipeline::PipelineError;
use std::path::PathBuf;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("--bootstrap-servers is required")]
    MissingBootstrapServers,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "kstreams-standalone",
    version,
    about = "Kafka Streams Standalone Application",
    long_about = "Kafka Streams Standalone Application\n\n\
                  Runs a transform that upper-cases every record from the input topic\n\
                  into the output topic, together with a synthetic producer and a\n\
                  verification consumer.",
    after_help = "Usage:\n  \
                  Interactive mode (default): kstreams-standalone\n  \
                  CLI mode:                   kstreams-standalone --cli [options]\n\n\
                  Environment variables KSTREAMS_BOOTSTRAP_SERVERS, KSTREAMS_USERNAME,\n\
                  KSTREAMS_PASSWORD, KSTREAMS_INPUT_TOPIC and KSTREAMS_OUTPUT_TOPIC\n\
                  apply when the matching flag is absent."
)]
pub struct Cli {
    /// Run headless until interrupted
    #[arg(long, help = "Run in CLI mode instead of the interactive console")]
    pub cli: bool,

    #[arg(
        long,
        value_name = "SERVERS",
        help = "Kafka bootstrap servers (required in CLI mode)"
    )]
    pub bootstrap_servers: Option<String>,

    #[arg(long, help = "SASL username (optional)")]
    pub username: Option<String>,

    #[arg(long, help = "SASL password (optional)")]
    pub password: Option<String>,

    #[arg(
        long,
        value_name = "TOPIC",
        help = "Input topic (default: kstreams-topic3)"
    )]
    pub input_topic: Option<String>,

    #[arg(
        long,
        value_name = "TOPIC",
        help = "Output topic (default: kstreams-topic4)"
    )]
    pub output_topic: Option<String>,

    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Load settings from a property file"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Cli {
    /// Values given explicitly on the command line
    pub fn overrides(&self) -> PartialConfig {
        PartialConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            input_topic: self.input_topic.clone(),
            output_topic: self.output_topic.clone(),
        }
    }

    /// Resolve defaults, the optional property file, the environment and the flags
    pub fn load_config(&self) -> CliResult<StoredConfig> {
        let mut loader = ConfigLoader::new().with_env();
        if let Some(path) = &self.config {
            loader = loader.with_file(path);
        }
        Ok(loader.with_overrides(self.overrides()).load()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_cli_flags() {
        let cli = Cli::try_parse_from([
            "kstreams-standalone",
            "--cli",
            "--bootstrap-servers=broker:9092",
            "--username=alice",
            "--password=secret",
            "--input-topic=in",
            "--output-topic=out",
        ])
        .unwrap();

        assert!(cli.cli);
        assert!(!cli.verbose);
        let overrides = cli.overrides();
        assert_eq!(overrides.bootstrap_servers.as_deref(), Some("broker:9092"));
        assert_eq!(overrides.username.as_deref(), Some("alice"));
        assert_eq!(overrides.input_topic.as_deref(), Some("in"));
        assert_eq!(overrides.output_topic.as_deref(), Some("out"));
    }

    #[test]
    fn test_no_flags_means_interactive() {
        let cli = Cli::try_parse_from(["kstreams-standalone"]).unwrap();
        assert!(!cli.cli);
        assert_eq!(cli.overrides(), PartialConfig::default());
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = Cli::try_parse_from(["kstreams-standalone", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["kstreams-standalone", "--gui-mode"]).is_err());
    }

    #[test]
    fn test_flags_override_property_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bootstrap.servers=file:9092").unwrap();
        writeln!(file, "input.topic=from-file").unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            input_topic: Some("from-flag".to_string()),
            ..Default::default()
        };
        let config = cli.load_config().unwrap();

        assert_eq!(config.bootstrap_servers, "file:9092");
        assert_eq!(config.input_topic, "from-flag");
        assert_eq!(config.output_topic, "kstreams-topic4");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/kafka-config.properties")),
            ..Default::default()
        };
        assert!(matches!(
            cli.load_config(),
            Err(CliError::Config(ConfigError::Io { .. }))
        ));
    }

    #[test]
    fn test_missing_bootstrap_message() {
        assert_eq!(
            CliError::MissingBootstrapServers.to_string(),
            "--bootstrap-servers is required"
        );
    }
}
