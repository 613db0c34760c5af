//! Configuration for a `LogBook` and its backends.
//!
//! A config is usually built in code with [`make_config`] and the `with_*`
//! builders, or loaded from YAML:
//!
//! ```yaml
//! id: "0"
//! name: cifar_run
//! loggers:
//!   filesystem:
//!     logger_file_path: logs/cifar_run.jsonl
//!     logger_name: cifar_run
//!   tensorboard:
//!     logdir: logs/tb
//!     logbook_key_map:
//!       step: global_step
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::LogRecord;

pub const DEFAULT_ID: &str = "0";
pub const DEFAULT_NAME: &str = "default_logger";
pub const DEFAULT_WANDB_URL: &str = "https://api.wandb.ai";
pub const DEFAULT_MLFLOW_URI: &str = "http://localhost:5000";

/// Top-level configuration for a `LogBook`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogBookConfig {
    /// Id stamped on every record (useful when several books write
    /// side by side, e.g. one per worker process).
    #[serde(default = "default_id")]
    pub id: String,
    /// Name of this book; the filesystem logger uses it by default.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub loggers: LoggersConfig,
}

fn default_id() -> String {
    DEFAULT_ID.to_string()
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl Default for LogBookConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            name: default_name(),
            loggers: LoggersConfig::default(),
        }
    }
}

impl LogBookConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            loggers: LoggersConfig::default(),
        }
    }

    pub fn with_filesystem(mut self, config: FilesystemConfig) -> Self {
        self.loggers.filesystem = Some(config);
        self
    }

    pub fn with_tensorboard(mut self, config: TensorboardConfig) -> Self {
        self.loggers.tensorboard = Some(config);
        self
    }

    pub fn with_wandb(mut self, config: WandbConfig) -> Self {
        self.loggers.wandb = Some(config);
        self
    }

    pub fn with_mlflow(mut self, config: MlflowConfig) -> Self {
        self.loggers.mlflow = Some(config);
        self
    }

    pub fn with_mongo(mut self, config: MongoConfig) -> Self {
        self.loggers.mongo = Some(config);
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// One optional section per backend. Absent means disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensorboard: Option<TensorboardConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wandb: Option<WandbConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mlflow: Option<MlflowConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo: Option<MongoConfig>,
}

impl LoggersConfig {
    pub fn is_empty(&self) -> bool {
        self.filesystem.is_none()
            && self.tensorboard.is_none()
            && self.wandb.is_none()
            && self.mlflow.is_none()
            && self.mongo.is_none()
    }
}

/// Key remapping shared by every backend section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyOptions {
    /// Rename `source -> destination` in metric records before writing.
    #[serde(
        default,
        rename = "logbook_key_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_map: Option<BTreeMap<String, String>>,
    /// Key whose value prefixes every other key of a metric record.
    #[serde(
        default,
        rename = "logbook_key_prefix",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_prefix: Option<String>,
}

impl KeyOptions {
    pub fn map_key(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.key_map
            .get_or_insert_with(BTreeMap::new)
            .insert(from.into(), to.into());
        self
    }

    pub fn with_prefix(mut self, key: impl Into<String>) -> Self {
        self.key_prefix = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemConfig {
    /// File the JSON lines are appended to.
    pub logger_file_path: PathBuf,
    pub logger_name: String,
    /// Also emit every line through `tracing` at INFO.
    #[serde(default = "default_true")]
    pub echo: bool,
    #[serde(flatten)]
    pub keys: KeyOptions,
}

fn default_true() -> bool {
    true
}

impl FilesystemConfig {
    pub fn new(logger_file_path: impl Into<PathBuf>, logger_name: impl Into<String>) -> Self {
        Self {
            logger_file_path: logger_file_path.into(),
            logger_name: logger_name.into(),
            echo: true,
            keys: KeyOptions::default(),
        }
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_keys(mut self, keys: KeyOptions) -> Self {
        self.keys = keys;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TensorboardConfig {
    /// Directory the event files are written to. Created if missing.
    pub logdir: PathBuf,
    #[serde(flatten)]
    pub keys: KeyOptions,
}

impl TensorboardConfig {
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            logdir: logdir.into(),
            keys: KeyOptions::default(),
        }
    }

    pub fn with_keys(mut self, keys: KeyOptions) -> Self {
        self.keys = keys;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WandbConfig {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Display name of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Run id; a fresh one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Falls back to `WANDB_BASE_URL`, then the public API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Falls back to `WANDB_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Initial run config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<LogRecord>,
    #[serde(flatten)]
    pub keys: KeyOptions,
}

impl WandbConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entity: None,
            name: None,
            id: None,
            base_url: None,
            api_key: None,
            config: None,
            keys: KeyOptions::default(),
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_keys(mut self, keys: KeyOptions) -> Self {
        self.keys = keys;
        self
    }

    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("WANDB_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_WANDB_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("WANDB_API_KEY").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlflowConfig {
    pub experiment_name: String,
    /// Falls back to `MLFLOW_TRACKING_URI`, then `http://localhost:5000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(flatten)]
    pub keys: KeyOptions,
}

impl MlflowConfig {
    pub fn new(experiment_name: impl Into<String>) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            tracking_uri: None,
            artifact_location: None,
            run_name: None,
            tags: BTreeMap::new(),
            keys: KeyOptions::default(),
        }
    }

    pub fn with_tracking_uri(mut self, uri: impl Into<String>) -> Self {
        self.tracking_uri = Some(uri.into());
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    pub fn with_keys(mut self, keys: KeyOptions) -> Self {
        self.keys = keys;
        self
    }

    pub fn resolved_tracking_uri(&self) -> String {
        self.tracking_uri
            .clone()
            .or_else(|| std::env::var("MLFLOW_TRACKING_URI").ok())
            .unwrap_or_else(|| DEFAULT_MLFLOW_URI.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

/// MongoDB collection that receives config, message and metadata records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub collection: String,
    #[serde(flatten)]
    pub keys: KeyOptions,
}

impl MongoConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        db: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            db: db.into(),
            collection: collection.into(),
            keys: KeyOptions::default(),
        }
    }

    pub fn uri(&self) -> String {
        format!("mongodb://{}:{}", self.host, self.port)
    }
}

/// Build a config the short way: filesystem is enabled only when a path is
/// given, wandb only when its config is given.
pub fn make_config(
    id: &str,
    name: &str,
    logger_file_path: Option<PathBuf>,
    wandb_config: Option<WandbConfig>,
) -> LogBookConfig {
    let mut config = LogBookConfig::new(id, name);
    if let Some(path) = logger_file_path {
        config.loggers.filesystem = Some(FilesystemConfig::new(path, name));
    }
    config.loggers.wandb = wandb_config;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_config_enables_only_given_backends() {
        let config = make_config("0", "default_logger", None, None);
        assert!(config.loggers.is_empty());

        let config = make_config("1", "run", Some(PathBuf::from("logs/run.jsonl")), None);
        let fs = config.loggers.filesystem.as_ref().unwrap();
        assert_eq!(fs.logger_name, "run");
        assert!(fs.echo);
        assert!(config.loggers.wandb.is_none());
        assert_eq!(config.id, "1");
    }

    #[test]
    fn yaml_config_with_key_map() {
        let yaml = r#"
name: cifar
loggers:
  filesystem:
    logger_file_path: /tmp/cifar.jsonl
    logger_name: cifar
    echo: false
  tensorboard:
    logdir: /tmp/tb
    logbook_key_map:
      step: global_step
    logbook_key_prefix: mode
"#;
        let config = LogBookConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.id, DEFAULT_ID);
        assert_eq!(config.name, "cifar");
        assert!(!config.loggers.filesystem.as_ref().unwrap().echo);

        let tb = config.loggers.tensorboard.as_ref().unwrap();
        let map = tb.keys.key_map.as_ref().unwrap();
        assert_eq!(map.get("step").map(String::as_str), Some("global_step"));
        assert_eq!(tb.keys.key_prefix.as_deref(), Some("mode"));
    }

    #[test]
    fn explicit_endpoints_win_over_defaults() {
        let wandb = WandbConfig::new("proj").with_base_url("http://localhost:8080/");
        assert_eq!(wandb.resolved_base_url(), "http://localhost:8080");

        let mlflow = MlflowConfig::new("exp").with_tracking_uri("http://mlflow:5000/");
        assert_eq!(mlflow.resolved_tracking_uri(), "http://mlflow:5000");
    }

    #[test]
    fn mongo_section_needs_every_connection_key() {
        let yaml = "loggers:\n  mongo:\n    host: db.local\n    port: 27017\n    db: runs\n    collection: logs\n";
        let config = LogBookConfig::from_yaml_str(yaml).unwrap();
        let mongo = config.loggers.mongo.as_ref().unwrap();
        assert_eq!(mongo.uri(), "mongodb://db.local:27017");
        assert_eq!(mongo.collection, "logs");

        let missing_port = "loggers:\n  mongo:\n    host: db.local\n    db: runs\n    collection: logs\n";
        assert!(LogBookConfig::from_yaml_str(missing_port).is_err());
    }

    #[test]
    fn key_options_builder() {
        let keys = KeyOptions::default().map_key("epoch", "step").with_prefix("mode");
        assert_eq!(keys.key_map.unwrap()["epoch"], "step");
        assert_eq!(keys.key_prefix.as_deref(), Some("mode"));
    }
}
