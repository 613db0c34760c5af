//! MLflow backend over the tracking server's REST API.

use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::MlflowConfig;
use crate::error::{LogBookError, Result};
use crate::logger::{http, value_to_plain_string, KeyFilter, Logger};
use crate::models::{json_as_f64, LogRecord, LogType};

const BACKEND: &str = "mlflow";
const API: &str = "api/2.0/mlflow";

/// Per-request limits of `runs/log-batch`.
const MAX_METRICS_PER_BATCH: usize = 1000;
const MAX_PARAMS_PER_BATCH: usize = 100;

pub struct MlflowLogger {
    client: Client,
    tracking_uri: String,
    experiment_id: String,
    run_id: String,
    filter: KeyFilter,
}

impl MlflowLogger {
    /// Create (or reuse) the experiment and start a run in it.
    pub fn new(config: &MlflowConfig) -> Result<Self> {
        let client = http::client()?;
        let tracking_uri = config.resolved_tracking_uri();

        let experiment_id = create_or_get_experiment(&client, &tracking_uri, config)?;

        let tags: Vec<Value> = config
            .tags
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": Utc::now().timestamp_millis(),
            "tags": tags,
        });
        if let Some(run_name) = &config.run_name {
            body["run_name"] = json!(run_name);
        }
        let response = client
            .post(endpoint(&tracking_uri, "runs/create"))
            .json(&body)
            .send()?;
        let created: Value = http::check(BACKEND, response)?.json()?;
        let run_id = created
            .pointer("/run/info/run_id")
            .and_then(Value::as_str)
            .ok_or_else(|| LogBookError::Backend {
                backend: BACKEND,
                message: "runs/create returned no run_id".to_string(),
            })?
            .to_string();

        info!(
            experiment = %config.experiment_name,
            experiment_id = %experiment_id,
            run_id = %run_id,
            "mlflow run started"
        );

        Ok(Self {
            client,
            tracking_uri,
            experiment_id,
            run_id,
            filter: KeyFilter::skipping_logbook_keys(&config.keys),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    fn post(&self, path: &str, body: &Value) -> Result<()> {
        let response = self
            .client
            .post(endpoint(&self.tracking_uri, path))
            .json(body)
            .send()?;
        http::check(BACKEND, response)?;
        Ok(())
    }

    fn write_metric(&mut self, log: &LogRecord) -> Result<()> {
        let mut metric = self.filter.prepare_metric_log(log);
        let step = metric.remove("step").ok_or_else(|| LogBookError::MissingKey {
            backend: BACKEND,
            key: "step".to_string(),
        })?;
        let metric = self.filter.apply_prefix(metric);
        let step = step.as_i64().ok_or_else(|| LogBookError::InvalidValue {
            key: "step".to_string(),
            reason: format!("expected an integer, got {step}"),
        })?;

        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<Value> = metric
            .iter()
            .filter_map(|(key, value)| match json_as_f64(value) {
                Some(v) => Some(json!({ "key": key, "value": v, "timestamp": timestamp, "step": step })),
                None => {
                    debug!(key = %key, "non-numeric value skipped by mlflow");
                    None
                }
            })
            .collect();
        for batch in metrics.chunks(MAX_METRICS_PER_BATCH) {
            self.post("runs/log-batch", &json!({ "run_id": self.run_id, "metrics": batch }))?;
        }
        Ok(())
    }

    fn write_config(&mut self, log: &LogRecord) -> Result<()> {
        let config = self.filter.prepare_log(log);
        let params: Vec<Value> = config
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": value_to_plain_string(v) }))
            .collect();
        for batch in params.chunks(MAX_PARAMS_PER_BATCH) {
            self.post("runs/log-batch", &json!({ "run_id": self.run_id, "params": batch }))?;
        }
        Ok(())
    }
}

fn endpoint(tracking_uri: &str, path: &str) -> String {
    format!("{tracking_uri}/{API}/{path}")
}

fn create_or_get_experiment(client: &Client, tracking_uri: &str, config: &MlflowConfig) -> Result<String> {
    let mut body = json!({ "name": config.experiment_name });
    if let Some(location) = &config.artifact_location {
        body["artifact_location"] = json!(location);
    }
    let response = client
        .post(endpoint(tracking_uri, "experiments/create"))
        .json(&body)
        .send()?;

    if response.status().is_success() {
        let created: Value = response.json()?;
        return experiment_id_at(&created, "/experiment_id");
    }

    let status = response.status();
    let error: Value = response.json().unwrap_or(Value::Null);
    if error.get("error_code").and_then(Value::as_str) != Some("RESOURCE_ALREADY_EXISTS") {
        return Err(LogBookError::Backend {
            backend: BACKEND,
            message: format!("HTTP {status}: {error}"),
        });
    }

    debug!(experiment = %config.experiment_name, "experiment exists, reusing it");
    let response = client
        .get(endpoint(tracking_uri, "experiments/get-by-name"))
        .query(&[("experiment_name", config.experiment_name.as_str())])
        .send()?;
    let found: Value = http::check(BACKEND, response)?.json()?;
    experiment_id_at(&found, "/experiment/experiment_id")
}

fn experiment_id_at(body: &Value, pointer: &str) -> Result<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LogBookError::Backend {
            backend: BACKEND,
            message: format!("response has no experiment id: {body}"),
        })
}

impl Logger for MlflowLogger {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn write_log(&mut self, log: &LogRecord) -> Result<()> {
        match LogType::of(log) {
            Some(LogType::Metric) => self.write_metric(log),
            Some(LogType::Config) => self.write_config(log),
            other => {
                debug!(log_type = ?other, "record type not supported by mlflow");
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let body = json!({
            "run_id": self.run_id,
            "status": "FINISHED",
            "end_time": Utc::now().timestamp_millis(),
        });
        self.post("runs/update", &body)
    }
}
