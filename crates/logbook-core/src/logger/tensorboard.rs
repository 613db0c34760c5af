//! TensorBoard backend: scalar event files via `tensorboard-rs`.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::{debug, info};

use crate::config::TensorboardConfig;
use crate::error::{LogBookError, Result};
use crate::logger::{value_to_plain_string, KeyFilter, Logger};
use crate::models::{json_as_f64, LogRecord, LogType};

pub struct TensorboardLogger {
    logdir: PathBuf,
    filter: KeyFilter,
    writer: SummaryWriter,
}

impl TensorboardLogger {
    pub fn new(config: &TensorboardConfig) -> Result<Self> {
        fs::create_dir_all(&config.logdir)?;
        let writer = SummaryWriter::new(&config.logdir);
        info!(logdir = %config.logdir.display(), "tensorboard logger ready");
        Ok(Self {
            logdir: config.logdir.clone(),
            filter: KeyFilter::skipping_logbook_keys(&config.keys),
            writer,
        })
    }

    pub fn logdir(&self) -> &std::path::Path {
        &self.logdir
    }

    /// Step and `(tag, value)` pairs a metric record turns into. Control
    /// keys are popped before the prefix is applied.
    fn metric_scalars(&self, log: &LogRecord) -> Result<(usize, Vec<(String, f64)>)> {
        let mut metric = self.filter.prepare_metric_log(log);

        let step = take_step(&mut metric, "global_step")?;
        if metric.remove("walltime").is_some() {
            debug!("tensorboard writer records its own wall time; 'walltime' ignored");
        }
        let main_tag = metric
            .remove("tag")
            .or_else(|| metric.remove("main_tag"))
            .map(|t| format!("{}/", value_to_plain_string(&t)))
            .unwrap_or_default();

        let scalars = self
            .filter
            .apply_prefix(metric)
            .into_iter()
            .filter_map(|(key, value)| {
                let tag = format!("{main_tag}{key}");
                match json_as_f64(&value) {
                    Some(v) => Some((tag, v)),
                    None => {
                        debug!(tag = %tag, "non-numeric value skipped by tensorboard");
                        None
                    }
                }
            })
            .collect();
        Ok((step, scalars))
    }

    fn write_metric(&mut self, log: &LogRecord) -> Result<()> {
        let (step, scalars) = self.metric_scalars(log)?;
        for (tag, value) in scalars {
            self.writer.add_scalar(&tag, value as f32, step);
        }
        Ok(())
    }

    /// Hyperparameters are written as scalars under `hparams/`.
    fn write_config(&mut self, log: &LogRecord) -> Result<()> {
        let mut config = log.clone();
        config.remove("name");
        let step = take_step(&mut config, "global_step")?;

        let metric_dict = match config.remove("metric_dict") {
            Some(Value::Object(m)) => self.filter.prepare_metric_log(&m),
            Some(other) => {
                return Err(LogBookError::InvalidValue {
                    key: "metric_dict".to_string(),
                    reason: format!("expected an object, got {other}"),
                })
            }
            None => LogRecord::new(),
        };

        let config = self.filter.prepare_log(&config);
        for (key, value) in &config {
            self.add_scalar(&format!("hparams/{key}"), value, step);
        }
        for (key, value) in &metric_dict {
            self.add_scalar(&format!("hparams/metric/{key}"), value, step);
        }
        Ok(())
    }

    fn add_scalar(&mut self, tag: &str, value: &Value, step: usize) {
        match json_as_f64(value) {
            Some(v) => self.writer.add_scalar(tag, v as f32, step),
            None => debug!(tag, "non-numeric value skipped by tensorboard"),
        }
    }
}

/// Pop a step value. Absent means step 0; anything but a non-negative
/// integer is rejected.
fn take_step(log: &mut LogRecord, key: &str) -> Result<usize> {
    match log.remove(key) {
        None => Ok(0),
        Some(v) => v
            .as_u64()
            .map(|s| s as usize)
            .ok_or_else(|| LogBookError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a non-negative integer, got {v}"),
            }),
    }
}

impl Logger for TensorboardLogger {
    fn name(&self) -> &'static str {
        "tensorboard"
    }

    fn write_log(&mut self, log: &LogRecord) -> Result<()> {
        match LogType::of(log) {
            Some(LogType::Metric) => self.write_metric(log),
            Some(LogType::Config) => self.write_config(log),
            // messages and metadata have no tensorboard form
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush();
        Ok(())
    }
}
