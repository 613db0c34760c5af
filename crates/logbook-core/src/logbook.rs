//! The `LogBook` façade.
//!
//! A `LogBook` holds zero or more backends and fans every record out to
//! each of them, in order, on the calling thread.

use chrono::Local;
use serde_json::Value;
use tracing::{error, info};

use crate::config::LogBookConfig;
use crate::error::Result;
use crate::logger::{
    FilesystemLogger, Logger, MlflowLogger, MongoLogger, TensorboardLogger, WandbLogger,
};
use crate::models::{LogRecord, LogType, LOGBOOK_ID, LOGBOOK_TIMESTAMP, LOGBOOK_TYPE, TIMESTAMP_FORMAT};

pub struct LogBook {
    id: String,
    name: String,
    loggers: Vec<Box<dyn Logger>>,
}

impl LogBook {
    /// Build every backend enabled in `config`: filesystem, tensorboard,
    /// wandb, mlflow, then mongo.
    pub fn new(config: LogBookConfig) -> Result<Self> {
        let mut loggers: Vec<Box<dyn Logger>> = Vec::new();
        let backends = &config.loggers;

        if let Some(fs) = &backends.filesystem {
            loggers.push(Box::new(FilesystemLogger::new(fs)?));
        }
        if let Some(tb) = &backends.tensorboard {
            loggers.push(Box::new(TensorboardLogger::new(tb)?));
        }
        if let Some(wandb) = &backends.wandb {
            loggers.push(Box::new(WandbLogger::new(wandb)?));
        }
        if let Some(mlflow) = &backends.mlflow {
            loggers.push(Box::new(MlflowLogger::new(mlflow)?));
        }
        if let Some(mongo) = &backends.mongo {
            loggers.push(Box::new(MongoLogger::new(mongo)?));
        }

        info!(
            id = %config.id,
            name = %config.name,
            backends = ?loggers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            "LogBook initialized"
        );

        Ok(Self {
            id: config.id,
            name: config.name,
            loggers,
        })
    }

    /// Assemble a book from loggers built elsewhere.
    pub fn with_loggers(id: impl Into<String>, loggers: Vec<Box<dyn Logger>>) -> Self {
        Self {
            id: id.into(),
            name: crate::config::DEFAULT_NAME.to_string(),
            loggers,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }

    pub fn add_logger(&mut self, logger: Box<dyn Logger>) {
        self.loggers.push(logger);
    }

    /// Stamp the bookkeeping keys onto a copy of `log`.
    fn process_log(&self, log: &LogRecord, log_type: LogType) -> LogRecord {
        let mut processed = log.clone();
        processed.insert(LOGBOOK_ID.to_string(), Value::String(self.id.clone()));
        processed.insert(
            LOGBOOK_TIMESTAMP.to_string(),
            Value::String(Local::now().format(TIMESTAMP_FORMAT).to_string()),
        );
        processed.insert(
            LOGBOOK_TYPE.to_string(),
            Value::String(log_type.as_str().to_string()),
        );
        processed
    }

    /// Write a record to every backend.
    ///
    /// All backends are attempted even if one fails; the first failure is
    /// returned once the others have run.
    pub fn write_log(&mut self, log: &LogRecord, log_type: LogType) -> Result<()> {
        let processed = self.process_log(log, log_type);
        self.for_each_logger(|logger| logger.write_log(&processed))
    }

    pub fn write_config_log(&mut self, config: &LogRecord) -> Result<()> {
        self.write_log(config, LogType::Config)
    }

    pub fn write_metric_log(&mut self, metric: &LogRecord) -> Result<()> {
        self.write_log(metric, LogType::Metric)
    }

    pub fn write_metadata_log(&mut self, metadata: &LogRecord) -> Result<()> {
        self.write_log(metadata, LogType::Metadata)
    }

    /// Write a plain message as `{"message": ...}`.
    pub fn write_message(&mut self, message: &str) -> Result<()> {
        let mut log = LogRecord::new();
        log.insert("message".to_string(), Value::String(message.to_string()));
        self.write_log(&log, LogType::Message)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.for_each_logger(|logger| logger.flush())
    }

    /// Close every backend, finishing remote runs.
    pub fn close(mut self) -> Result<()> {
        self.for_each_logger(|logger| logger.close())
    }

    fn for_each_logger<F>(&mut self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut dyn Logger) -> Result<()>,
    {
        let mut first_error = None;
        for logger in self.loggers.iter_mut() {
            if let Err(e) = op(logger.as_mut()) {
                error!(backend = logger.name(), "logger failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
