//! Interactive console mode
//!
//! A line-oriented stand-in for a configuration form: the user edits the
//! fields with `set`, persists them with `save`/`load`, and drives the
//! pipeline with `start`/`stop` while status lines stream to the console.

use colored::Colorize;
use kstreams_config::{StoredConfig, DEFAULT_CONFIG_FILE};
use pipeline::{
    ConsoleSink, LogSink, Orchestrator, PipelineError, PipelineLog, PipelineSettings,
};
use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::headless::console_orchestrator;
use crate::CliResult;

/// Bootstrap address pre-filled in an empty form
pub const DEFAULT_FORM_BOOTSTRAP: &str = "localhost:9092";

const HELP: &str = "\
Commands:
  show                     Show the current configuration
  set <field> [value]      Edit a field (bootstrap-servers, username, password,
                           input-topic, output-topic); no value clears it
  start                    Start the pipeline with the current configuration
  stop                     Stop the running pipeline
  status                   Show the pipeline state
  save [path]              Save the configuration (default: kafka-config.properties)
  load [path]              Load a configuration (default: kafka-config.properties)
  help                     Show this help
  quit                     Stop the pipeline and exit";

/// An editable form field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BootstrapServers,
    Username,
    Password,
    InputTopic,
    OutputTopic,
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bootstrap-servers" | "bootstrap.servers" | "bootstrap" => Ok(Self::BootstrapServers),
            "username" | "user" => Ok(Self::Username),
            "password" => Ok(Self::Password),
            "input-topic" | "input.topic" | "input" => Ok(Self::InputTopic),
            "output-topic" | "output.topic" | "output" => Ok(Self::OutputTopic),
            other => Err(format!("Unknown field: {}", other)),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BootstrapServers => "Bootstrap Servers",
            Self::Username => "Username",
            Self::Password => "Password",
            Self::InputTopic => "Input Topic",
            Self::OutputTopic => "Output Topic",
        };
        f.write_str(name)
    }
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show,
    Set { field: Field, value: String },
    Start,
    Stop,
    Status,
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Help,
    Quit,
}

/// Parse one input line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let path = || (!rest.is_empty()).then(|| PathBuf::from(rest));

    let command = match word.to_ascii_lowercase().as_str() {
        "show" | "config" => Command::Show,
        "set" => {
            if rest.is_empty() {
                return Err("Usage: set <field> [value]".to_string());
            }
            let (field, value) = match rest.split_once(char::is_whitespace) {
                Some((field, value)) => (field, value.trim()),
                None => (rest, ""),
            };
            Command::Set {
                field: field.parse()?,
                value: value.to_string(),
            }
        }
        "start" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "save" => Command::Save(path()),
        "load" => Command::Load(path()),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command: {} (type 'help')", other)),
    };
    Ok(Some(command))
}

/// The configuration form behind the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleForm {
    values: StoredConfig,
}

impl ConsoleForm {
    /// Start from `initial`, pre-filling an empty bootstrap address
    pub fn new(mut initial: StoredConfig) -> Self {
        if initial.bootstrap_servers.trim().is_empty() {
            initial.bootstrap_servers = DEFAULT_FORM_BOOTSTRAP.to_string();
        }
        Self { values: initial }
    }

    pub fn values(&self) -> &StoredConfig {
        &self.values
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::BootstrapServers => self.values.bootstrap_servers = value,
            Field::Username => self.values.username = value,
            Field::Password => self.values.password = value,
            Field::InputTopic => self.values.input_topic = value,
            Field::OutputTopic => self.values.output_topic = value,
        }
    }

    /// Replace every field, as loading a file does
    pub fn replace(&mut self, values: StoredConfig) {
        self.values = values;
    }
}

impl fmt::Display for ConsoleForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.values;
        let password = if v.password.is_empty() { "" } else { "********" };
        writeln!(f, "  {:<18} {}", "Bootstrap Servers:", v.bootstrap_servers)?;
        writeln!(f, "  {:<18} {}", "Username:", v.username)?;
        writeln!(f, "  {:<18} {}", "Password:", password)?;
        writeln!(f, "  {:<18} {}", "Input Topic:", v.input_topic)?;
        write!(f, "  {:<18} {}", "Output Topic:", v.output_topic)
    }
}

/// Console state: the form, the orchestrator and the status log
pub struct ConsoleSession {
    form: ConsoleForm,
    orchestrator: Orchestrator,
    log: PipelineLog,
}

impl ConsoleSession {
    pub fn new(form: ConsoleForm, orchestrator: Orchestrator, sink: Arc<dyn LogSink>) -> Self {
        Self {
            form,
            orchestrator,
            log: PipelineLog::new(sink),
        }
    }

    pub fn form(&self) -> &ConsoleForm {
        &self.form
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn greet(&self) {
        self.log.info("Kafka Streams Application Ready");
        self.log
            .info("Enter your configuration and type 'start' to begin");
    }

    /// Execute one command; returns `false` once the session should end
    pub async fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Show => println!("{}", self.form),
            Command::Set { field, value } => {
                if !self.orchestrator.state().can_start() {
                    alert("Stop the pipeline before editing the configuration");
                } else {
                    self.form.set(field, value);
                    println!("{} {}", "Updated".green(), field);
                }
            }
            Command::Start => self.start().await,
            Command::Stop => self.orchestrator.stop().await,
            Command::Status => {
                println!("Pipeline: {}", self.orchestrator.state().to_string().bold());
                println!("{}", self.form);
            }
            Command::Save(path) => self.save(path.unwrap_or_else(default_path)),
            Command::Load(path) => self.load(path.unwrap_or_else(default_path)),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    /// Stop whatever is still running
    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
    }

    async fn start(&mut self) {
        if self.form.values().bootstrap_servers.trim().is_empty() {
            alert("Bootstrap Servers is required!");
            return;
        }

        let config = self.form.values().to_pipeline_config();
        match self.orchestrator.start(config).await {
            Ok(()) => {}
            Err(PipelineError::AlreadyRunning(state)) => {
                alert(&format!("The pipeline is already {}", state));
            }
            Err(PipelineError::InvalidConfig(e)) => alert(&e.to_string()),
            // Already reported through the status log.
            Err(e) => debug!("Start failed: {}", e),
        }
    }

    fn save(&self, path: PathBuf) {
        match self.form.values().save(&path) {
            Ok(()) => self
                .log
                .info(format!("Configuration saved to {}", path.display())),
            Err(e) => alert(&format!("Error saving configuration: {}", e)),
        }
    }

    fn load(&mut self, path: PathBuf) {
        if !self.orchestrator.state().can_start() {
            alert("Stop the pipeline before loading a configuration");
            return;
        }
        match StoredConfig::load(&path) {
            Ok(values) => {
                self.form.replace(values);
                self.log
                    .info(format!("Configuration loaded from {}", path.display()));
            }
            Err(e) => alert(&format!("Error loading configuration: {}", e)),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

fn alert(message: &str) {
    eprintln!("{} {}", "!".yellow().bold(), message);
}

fn prompt() {
    print!("{} ", "kstreams>".cyan().bold());
    let _ = std::io::stdout().flush();
}

/// Run the console until `quit`, end of input or Ctrl-C
pub async fn run_interactive_mode(initial: StoredConfig, settings: PipelineSettings) -> CliResult<()> {
    let sink: Arc<dyn LogSink> = Arc::new(ConsoleSink);
    let mut session = ConsoleSession::new(
        ConsoleForm::new(initial),
        console_orchestrator(settings),
        sink,
    );

    session.greet();
    println!("{}", session.form());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Ok(Some(command)) => {
                if !session.execute(command).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => alert(&message),
        }
    }

    println!();
    session.shutdown().await;
    Ok(())
}
