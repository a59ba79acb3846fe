//! Configuration management for the streaming pipeline
//!
//! A [`PipelineConfig`] is the immutable snapshot handed to the orchestrator
//! for one run. It is usually produced by a [`ConfigLoader`], which layers
//! built-in defaults, a persisted property file, `KSTREAMS_`-prefixed
//! environment variables and explicit overrides (CLI flags, form fields).

pub mod properties;

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default input topic when none is configured
pub const DEFAULT_INPUT_TOPIC: &str = "kstreams-topic3";

/// Default output topic when none is configured
pub const DEFAULT_OUTPUT_TOPIC: &str = "kstreams-topic4";

/// Default file name used when saving configuration
pub const DEFAULT_CONFIG_FILE: &str = "kafka-config.properties";

/// Header comment written at the top of saved property files
pub const CONFIG_FILE_HEADER: &str = "Kafka Streams Configuration";

const KEY_BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_INPUT_TOPIC: &str = "input.topic";
const KEY_OUTPUT_TOPIC: &str = "output.topic";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to access configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// SASL credentials. Only ever constructed with both parts present.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Build credentials from optional parts.
    ///
    /// Returns `None` unless both username and password are non-empty;
    /// a partial pair is treated as no credentials at all.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some(Self {
                username: user.to_string(),
                password: pass.to_string(),
            }),
            _ => None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable configuration for a single pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    bootstrap_servers: String,
    credentials: Option<Credentials>,
    input_topic: String,
    output_topic: String,
}

impl PipelineConfig {
    /// Create a configuration with the default topics and no credentials
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            credentials: None,
            input_topic: DEFAULT_INPUT_TOPIC.to_string(),
            output_topic: DEFAULT_OUTPUT_TOPIC.to_string(),
        }
    }

    /// Attach credentials; a partial pair leaves the configuration unauthenticated
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Credentials::from_parts(Some(username), Some(password));
        self
    }

    pub fn with_input_topic(mut self, topic: impl Into<String>) -> Self {
        self.input_topic = topic.into();
        self
    }

    pub fn with_output_topic(mut self, topic: impl Into<String>) -> Self {
        self.output_topic = topic.into();
        self
    }

    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bootstrap servers is required".to_string(),
            ));
        }
        if self.input_topic.trim().is_empty() || self.output_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "input and output topics are required".to_string(),
            ));
        }
        if self.input_topic == self.output_topic {
            return Err(ConfigError::InvalidConfig(format!(
                "input and output topic must differ (both are {})",
                self.input_topic
            )));
        }
        Ok(())
    }

    /// Persist this configuration as a property file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        StoredConfig::from(self).save(path)
    }
}

/// Flat, persisted form of the configuration.
///
/// Mirrors the property file and the interactive form field by field, so it
/// can hold incomplete values (empty bootstrap servers, half-filled
/// credentials) that a [`PipelineConfig`] never will.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(default)]
    pub bootstrap_servers: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_input_topic")]
    pub input_topic: String,
    #[serde(default = "default_output_topic")]
    pub output_topic: String,
}

fn default_input_topic() -> String {
    DEFAULT_INPUT_TOPIC.to_string()
}

fn default_output_topic() -> String {
    DEFAULT_OUTPUT_TOPIC.to_string()
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            username: String::new(),
            password: String::new(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
        }
    }
}

impl StoredConfig {
    /// Load a property file, falling back to the default topics for absent keys
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let overrides = PartialConfig::from_file(path.as_ref())?;
        Ok(Self::default().merged(overrides))
    }

    /// Write the property file, creating or truncating it
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let timestamp = chrono::Local::now()
            .format("%a %b %d %H:%M:%S %Z %Y")
            .to_string();

        let mut buf = Vec::new();
        properties::write(
            &mut buf,
            &[CONFIG_FILE_HEADER, &timestamp],
            [
                (KEY_BOOTSTRAP_SERVERS, self.bootstrap_servers.as_str()),
                (KEY_USERNAME, self.username.as_str()),
                (KEY_PASSWORD, self.password.as_str()),
                (KEY_INPUT_TOPIC, self.input_topic.as_str()),
                (KEY_OUTPUT_TOPIC, self.output_topic.as_str()),
            ],
        )
        .and_then(|_| fs::write(path, &buf))
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Apply every value present in `overrides`
    pub fn merged(mut self, overrides: PartialConfig) -> Self {
        if let Some(v) = overrides.bootstrap_servers {
            self.bootstrap_servers = v;
        }
        if let Some(v) = overrides.username {
            self.username = v;
        }
        if let Some(v) = overrides.password {
            self.password = v;
        }
        if let Some(v) = overrides.input_topic {
            self.input_topic = v;
        }
        if let Some(v) = overrides.output_topic {
            self.output_topic = v;
        }
        self
    }

    /// Snapshot into an immutable run configuration
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            bootstrap_servers: self.bootstrap_servers.trim().to_string(),
            credentials: Credentials::from_parts(Some(&self.username), Some(&self.password)),
            input_topic: self.input_topic.clone(),
            output_topic: self.output_topic.clone(),
        }
    }
}

impl From<&PipelineConfig> for StoredConfig {
    fn from(config: &PipelineConfig) -> Self {
        let (username, password) = config
            .credentials
            .as_ref()
            .map(|c| (c.username.clone(), c.password.clone()))
            .unwrap_or_default();

        Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            username,
            password,
            input_topic: config.input_topic.clone(),
            output_topic: config.output_topic.clone(),
        }
    }
}

/// A set of optional overrides; absent fields leave lower layers untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_servers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_topic: Option<String>,
}

impl PartialConfig {
    /// Read the keys present in a property file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut props = properties::parse(&text);

        Ok(Self {
            bootstrap_servers: props.remove(KEY_BOOTSTRAP_SERVERS),
            username: props.remove(KEY_USERNAME),
            password: props.remove(KEY_PASSWORD),
            input_topic: props.remove(KEY_INPUT_TOPIC),
            output_topic: props.remove(KEY_OUTPUT_TOPIC),
        })
    }
}

/// Layered configuration loader
///
/// Precedence, lowest to highest: defaults, property file, environment
/// (`KSTREAMS_BOOTSTRAP_SERVERS`, `KSTREAMS_INPUT_TOPIC`, ...), overrides.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    use_env: bool,
    overrides: PartialConfig,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    pub fn with_overrides(mut self, overrides: PartialConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve all layers into the flat stored form
    pub fn load(self) -> Result<StoredConfig> {
        let mut figment = Figment::from(Serialized::defaults(StoredConfig::default()));

        if let Some(path) = &self.file {
            figment = figment.merge(Serialized::defaults(PartialConfig::from_file(path)?));
        }

        if self.use_env {
            figment = figment.merge(Env::prefixed("KSTREAMS_"));
        }

        figment = figment.merge(Serialized::defaults(self.overrides));

        figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::new("localhost:9092");
        assert_eq!(config.input_topic(), "kstreams-topic3");
        assert_eq!(config.output_topic(), "kstreams-topic4");
        assert!(config.credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::new("").validate().is_err());
        assert!(PipelineConfig::new("   ").validate().is_err());
        assert!(matches!(
            PipelineConfig::new("").validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_topic_validation() {
        let base = PipelineConfig::new("localhost:9092");
        assert!(base.clone().with_input_topic("").validate().is_err());
        assert!(base.clone().with_output_topic("  ").validate().is_err());
        assert!(matches!(
            base.clone()
                .with_input_topic("t")
                .with_output_topic("t")
                .validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(base
            .with_input_topic("in")
            .with_output_topic("out")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_partial_credentials_are_absent() {
        assert!(Credentials::from_parts(Some("alice"), None).is_none());
        assert!(Credentials::from_parts(Some("alice"), Some("")).is_none());
        assert!(Credentials::from_parts(None, Some("secret")).is_none());

        let config = PipelineConfig::new("localhost:9092").with_credentials("", "secret");
        assert!(config.credentials().is_none());

        let config = PipelineConfig::new("localhost:9092").with_credentials("alice", "secret");
        let creds = config.credentials().unwrap();
        assert_eq!(creds.username(), "alice");
        assert_eq!(creds.password(), "secret");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::from_parts(Some("alice"), Some("hunter2")).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        let config = PipelineConfig::new("broker:9093")
            .with_credentials("alice", "s3cr=t")
            .with_input_topic("in")
            .with_output_topic("out");
        config.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#Kafka Streams Configuration\n"));
        assert!(text.contains("bootstrap.servers=broker\\:9093"));

        let loaded = StoredConfig::load(&path).unwrap();
        assert_eq!(loaded.to_pipeline_config(), config);
    }

    #[test]
    fn test_load_falls_back_to_default_topics() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bootstrap.servers=localhost:9092").unwrap();

        let loaded = StoredConfig::load(file.path()).unwrap();
        assert_eq!(loaded.bootstrap_servers, "localhost:9092");
        assert_eq!(loaded.input_topic, DEFAULT_INPUT_TOPIC);
        assert_eq!(loaded.output_topic, DEFAULT_OUTPUT_TOPIC);
        assert!(loaded.username.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = StoredConfig::load("/definitely/not/here.properties");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_loader_precedence() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "pipeline.properties",
                "bootstrap.servers=file:9092\ninput.topic=file-in\n",
            )?;
            jail.set_env("KSTREAMS_INPUT_TOPIC", "env-in");
            jail.set_env("KSTREAMS_OUTPUT_TOPIC", "env-out");

            let stored = ConfigLoader::new()
                .with_file("pipeline.properties")
                .with_env()
                .with_overrides(PartialConfig {
                    output_topic: Some("flag-out".to_string()),
                    ..Default::default()
                })
                .load()
                .expect("layers resolve");

            assert_eq!(stored.bootstrap_servers, "file:9092");
            assert_eq!(stored.input_topic, "env-in");
            assert_eq!(stored.output_topic, "flag-out");
            Ok(())
        });
    }

    #[test]
    fn test_loader_defaults_only() {
        let stored = ConfigLoader::new().load().unwrap();
        assert_eq!(stored, StoredConfig::default());
        assert!(stored.to_pipeline_config().validate().is_err());
    }
}
