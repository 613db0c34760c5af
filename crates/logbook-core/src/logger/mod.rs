//! Backends a `LogBook` fans records out to.
//!
//! Every backend implements [`Logger`] and owns a [`KeyFilter`] describing
//! how a record is reshaped before it reaches the backend's client.

pub mod filesystem;
mod http;
pub mod mlflow;
pub mod mongo;
pub mod tensorboard;
pub mod wandb;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::config::KeyOptions;
use crate::error::Result;
use crate::models::{LogRecord, LOGBOOK_KEYS};

pub use filesystem::FilesystemLogger;
pub use mlflow::MlflowLogger;
pub use mongo::MongoLogger;
pub use tensorboard::TensorboardLogger;
pub use wandb::WandbLogger;

/// A destination for log records.
pub trait Logger: Send {
    /// Short backend name used in errors and tracing fields.
    fn name(&self) -> &'static str;

    /// Write one record. The record carries the `logbook_*` keys.
    fn write_log(&mut self, log: &LogRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Finish the backend's run. Called once, after the last write.
    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Per-backend key reshaping.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    /// Keep only these keys. `None` keeps everything.
    pub keys_to_retain: Option<Vec<String>>,
    /// Drop these keys after retention.
    pub keys_to_skip: Option<Vec<String>>,
    pub key_map: Option<BTreeMap<String, String>>,
    pub key_prefix: Option<String>,
}

impl KeyFilter {
    pub fn new(keys: &KeyOptions) -> Self {
        Self {
            keys_to_retain: None,
            keys_to_skip: None,
            key_map: keys.key_map.clone(),
            key_prefix: keys.key_prefix.clone(),
        }
    }

    /// Filter that also drops the façade's bookkeeping keys. Remote
    /// services have no use for them.
    pub fn skipping_logbook_keys(keys: &KeyOptions) -> Self {
        let mut filter = Self::new(keys);
        filter.keys_to_skip = Some(LOGBOOK_KEYS.iter().map(|k| k.to_string()).collect());
        filter
    }

    /// Apply retention, then skipping. Missing retained keys are ignored.
    pub fn prepare_log(&self, log: &LogRecord) -> LogRecord {
        let mut processed = match &self.keys_to_retain {
            None => log.clone(),
            Some(keys) => keys
                .iter()
                .filter_map(|k| log.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        };

        if let Some(skip) = &self.keys_to_skip {
            for key in skip {
                processed.remove(key);
            }
        }
        processed
    }

    /// Rename keys per `key_map`, then run [`prepare_log`](Self::prepare_log).
    ///
    /// The prefix is not applied here: backends first pop the keys they
    /// consume (`step`, `global_step`, ...) and then call
    /// [`apply_prefix`](Self::apply_prefix) on what is left.
    pub fn prepare_metric_log(&self, log: &LogRecord) -> LogRecord {
        let mut mapped = log.clone();
        if let Some(key_map) = &self.key_map {
            for (from, to) in key_map {
                match mapped.remove(from) {
                    Some(value) => {
                        mapped.insert(to.clone(), value);
                    }
                    None => debug!(key = %from, "mapped key absent from metric log"),
                }
            }
        }
        self.prepare_log(&mapped)
    }

    /// Pop the `key_prefix` key and prefix every other key with its value as
    /// `<value>_<key>`. Bookkeeping keys keep their names.
    pub fn apply_prefix(&self, mut metric: LogRecord) -> LogRecord {
        let Some(prefix_key) = &self.key_prefix else {
            return metric;
        };
        let Some(prefix) = metric.remove(prefix_key) else {
            debug!(key = %prefix_key, "prefix key absent from metric log");
            return metric;
        };
        let prefix = value_to_plain_string(&prefix);
        metric
            .into_iter()
            .map(|(k, v)| {
                if LOGBOOK_KEYS.contains(&k.as_str()) {
                    (k, v)
                } else {
                    (format!("{prefix}_{k}"), v)
                }
            })
            .collect()
    }
}

/// Render a JSON value without quotes around strings.
pub(crate) fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
