//! Weights & Biases backend.
//!
//! Runs are created through the GraphQL `upsertBucket` mutation and metrics
//! are streamed as history lines to the run's file-stream endpoint.

use std::time::Instant;

use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::WandbConfig;
use crate::error::{LogBookError, Result};
use crate::logger::{http, KeyFilter, Logger};
use crate::models::{LogRecord, LogType};

const BACKEND: &str = "wandb";
const HISTORY_FILE: &str = "wandb-history.jsonl";

const VIEWER_QUERY: &str = "query Viewer { viewer { entity } }";

const UPSERT_BUCKET: &str = "mutation UpsertBucket($id: String, $name: String, \
    $project: String, $entity: String, $displayName: String, $config: JSONString) { \
    upsertBucket(input: {id: $id, name: $name, modelName: $project, entityName: $entity, \
    displayName: $displayName, config: $config}) { bucket { id name displayName } } }";

pub struct WandbLogger {
    client: Client,
    base_url: String,
    api_key: String,
    entity: String,
    project: String,
    display_name: Option<String>,
    /// Server-side id of the run (bucket), used for later upserts.
    bucket_id: Option<String>,
    run_name: String,
    run_config: LogRecord,
    filter: KeyFilter,
    history_offset: u64,
    started: Instant,
}

impl WandbLogger {
    pub fn new(config: &WandbConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            LogBookError::Config("wandb api key missing (set api_key or WANDB_API_KEY)".to_string())
        })?;

        let run_name = config.id.clone().unwrap_or_else(generate_run_id);

        let mut logger = Self {
            client: http::client()?,
            base_url: config.resolved_base_url(),
            api_key,
            entity: String::new(),
            project: config.project.clone(),
            display_name: config.name.clone(),
            bucket_id: None,
            run_name,
            run_config: config.config.clone().unwrap_or_default(),
            filter: KeyFilter::skipping_logbook_keys(&config.keys),
            history_offset: 0,
            started: Instant::now(),
        };

        logger.entity = match &config.entity {
            Some(entity) => entity.clone(),
            None => logger.default_entity()?,
        };
        logger.upsert_run()?;

        info!(
            entity = %logger.entity,
            project = %logger.project,
            run = %logger.run_name,
            "wandb run started"
        );
        Ok(logger)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()?;
        let body: Value = http::check(BACKEND, response)?.json()?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(LogBookError::Backend {
                backend: BACKEND,
                message: errors.to_string(),
            });
        }
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    fn default_entity(&self) -> Result<String> {
        let data = self.graphql(VIEWER_QUERY, json!({}))?;
        data.pointer("/viewer/entity")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LogBookError::Backend {
                backend: BACKEND,
                message: "no default entity for this api key".to_string(),
            })
    }

    fn upsert_run(&mut self) -> Result<()> {
        // wandb stores each config entry as {"value": .., "desc": ..}
        let config: serde_json::Map<String, Value> = self
            .run_config
            .iter()
            .map(|(k, v)| (k.clone(), json!({ "value": v, "desc": null })))
            .collect();

        let data = self.graphql(
            UPSERT_BUCKET,
            json!({
                "id": self.bucket_id,
                "name": self.run_name,
                "project": self.project,
                "entity": self.entity,
                "displayName": self.display_name,
                "config": serde_json::to_string(&config)?,
            }),
        )?;

        let bucket = data.pointer("/upsertBucket/bucket").ok_or_else(|| LogBookError::Backend {
            backend: BACKEND,
            message: "upsertBucket returned no bucket".to_string(),
        })?;
        if let Some(id) = bucket.get("id").and_then(Value::as_str) {
            self.bucket_id = Some(id.to_string());
        }
        if let Some(name) = bucket.get("name").and_then(Value::as_str) {
            self.run_name = name.to_string();
        }
        Ok(())
    }

    fn file_stream(&self, payload: Value) -> Result<()> {
        let url = format!(
            "{}/files/{}/{}/{}/file_stream",
            self.base_url, self.entity, self.project, self.run_name
        );
        let response = self
            .client
            .post(url)
            .basic_auth("api", Some(&self.api_key))
            .json(&payload)
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
        let mut metric = self.filter.apply_prefix(metric);

        metric.insert("_step".to_string(), step);
        metric.insert(
            "_runtime".to_string(),
            json!(self.started.elapsed().as_secs_f64()),
        );
        metric.insert(
            "_timestamp".to_string(),
            json!(Utc::now().timestamp_millis() as f64 / 1000.0),
        );

        let line = serde_json::to_string(&metric)?;
        let mut files = serde_json::Map::new();
        files.insert(
            HISTORY_FILE.to_string(),
            json!({ "offset": self.history_offset, "content": [line] }),
        );
        self.file_stream(json!({ "files": files }))?;
        self.history_offset += 1;
        Ok(())
    }

    fn write_config(&mut self, log: &LogRecord) -> Result<()> {
        let config = self.filter.prepare_log(log);
        self.run_config.extend(config);
        self.upsert_run()
    }
}

/// Eight lowercase alphanumerics, the shape wandb itself generates.
fn generate_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl Logger for WandbLogger {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn write_log(&mut self, log: &LogRecord) -> Result<()> {
        match LogType::of(log) {
            Some(LogType::Metric) => self.write_metric(log),
            Some(LogType::Config) => self.write_config(log),
            other => {
                debug!(log_type = ?other, "record type not supported by wandb");
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.file_stream(json!({ "complete": true, "exitcode": 0 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyOptions;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(value: Value) -> LogRecord {
        value.as_object().cloned().unwrap()
    }

    async fn mount_upsert(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("UpsertBucket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"upsertBucket": {"bucket": {"id": "QnVja2V0OjE=", "name": "run1"}}}
            })))
            .mount(server)
            .await;
    }

    fn test_config(uri: String) -> WandbConfig {
        let mut config = WandbConfig::new("proj")
            .with_entity("team")
            .with_api_key("test-key")
            .with_base_url(uri);
        config.id = Some("run1".to_string());
        config
    }

    #[test]
    fn generated_run_ids_are_short() {
        let id = generate_run_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metric_is_streamed_without_logbook_keys() {
        let server = MockServer::start().await;
        mount_upsert(&server).await;
        Mock::given(method("POST"))
            .and(path("/files/team/proj/run1/file_stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exitcode": null})))
            .expect(2)
            .mount(&server)
            .await;

        let config = test_config(server.uri());
        tokio::task::spawn_blocking(move || {
            let mut logger = WandbLogger::new(&config).unwrap();
            logger
                .write_log(&record(json!({
                    "loss": 0.25,
                    "step": 3,
                    "logbook_id": "0",
                    "logbook_type": "metric",
                    "logbook_timestamp": "now",
                })))
                .unwrap();
            logger.close().unwrap();
        })
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let stream: Vec<Value> = requests
            .iter()
            .filter(|r| r.url.path().ends_with("file_stream"))
            .map(|r| r.body_json().unwrap())
            .collect();

        let content = stream[0]["files"][HISTORY_FILE]["content"][0].as_str().unwrap();
        let line: Value = serde_json::from_str(content).unwrap();
        assert_eq!(line["loss"], json!(0.25));
        assert_eq!(line["_step"], json!(3));
        assert!(line.get("logbook_id").is_none());
        assert!(line.get("step").is_none());
        assert_eq!(stream[1]["complete"], json!(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prefix_keeps_the_step() {
        let server = MockServer::start().await;
        mount_upsert(&server).await;
        Mock::given(method("POST"))
            .and(path("/files/team/proj/run1/file_stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exitcode": null})))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(server.uri())
            .with_keys(KeyOptions::default().map_key("epoch", "step").with_prefix("mode"));
        tokio::task::spawn_blocking(move || {
            let mut logger = WandbLogger::new(&config).unwrap();
            logger
                .write_log(&record(json!({
                    "epoch": 4,
                    "acc": 0.5,
                    "mode": "eval",
                    "logbook_type": "metric",
                })))
                .unwrap();
        })
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let stream: Value = requests
            .iter()
            .find(|r| r.url.path().ends_with("file_stream"))
            .unwrap()
            .body_json()
            .unwrap();
        let content = stream["files"][HISTORY_FILE]["content"][0].as_str().unwrap();
        let line: Value = serde_json::from_str(content).unwrap();
        assert_eq!(line["_step"], json!(4));
        assert_eq!(line["eval_acc"], json!(0.5));
        assert!(line.get("mode").is_none());
        assert!(line.get("eval_step").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metric_without_step_is_rejected() {
        let server = MockServer::start().await;
        mount_upsert(&server).await;

        let config = test_config(server.uri());
        let err = tokio::task::spawn_blocking(move || {
            let mut logger = WandbLogger::new(&config).unwrap();
            logger
                .write_log(&record(json!({"loss": 0.25, "logbook_type": "metric"})))
                .unwrap_err()
        })
        .await
        .unwrap();
        assert!(matches!(err, LogBookError::MissingKey { key, .. } if key == "step"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn config_is_merged_into_run_config() {
        let server = MockServer::start().await;
        mount_upsert(&server).await;

        let config = test_config(server.uri());
        tokio::task::spawn_blocking(move || {
            let mut logger = WandbLogger::new(&config).unwrap();
            logger
                .write_log(&record(json!({"lr": 0.01, "logbook_type": "config"})))
                .unwrap();
        })
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let last: Value = requests.last().unwrap().body_json().unwrap();
        let config: Value =
            serde_json::from_str(last["variables"]["config"].as_str().unwrap()).unwrap();
        assert_eq!(config["lr"]["value"], json!(0.01));
        assert!(config.get("logbook_type").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entity_is_looked_up_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("Viewer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"viewer": {"entity": "someone"}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_upsert(&server).await;

        let mut config = test_config(server.uri());
        config.entity = None;
        let entity = tokio::task::spawn_blocking(move || WandbLogger::new(&config).unwrap().entity)
            .await
            .unwrap();
        assert_eq!(entity, "someone");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn graphql_errors_surface_as_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"message": "permission denied"}]
            })))
            .mount(&server)
            .await;

        let config = test_config(server.uri());
        let err = tokio::task::spawn_blocking(move || WandbLogger::new(&config).err())
            .await
            .unwrap();
        match err {
            Some(LogBookError::Backend { backend, message }) => {
                assert_eq!(backend, "wandb");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
