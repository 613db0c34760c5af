//! Parse a whole experiment (configs, metrics and everything else) from
//! its logs, and work with collections of experiments.

use std::collections::BTreeMap;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::models::{LogRecord, LOGBOOK_TYPE};
use crate::parser::config::parse_config_line;
use crate::parser::metric::{group_all, keep_all, metrics_to_batches, parse_metric_line};
use crate::parser::{for_each_line, parse_json, ParseLineFn};

/// Data of one experiment.
#[derive(Debug, Clone, Default)]
pub struct Experiment {
    pub configs: Vec<LogRecord>,
    /// Metric batches by group name (`"all"` unless grouped otherwise).
    pub metrics: BTreeMap<String, RecordBatch>,
    /// Every other record, grouped by its `logbook_type`.
    pub info: BTreeMap<String, Vec<LogRecord>>,
}

impl Experiment {
    /// The most recent config record, if any.
    pub fn config(&self) -> Option<&LogRecord> {
        self.configs.last()
    }
}

/// Tries each line parser in turn; the first match decides the record's
/// type unless the record already names one.
pub struct ExperimentParser {
    parsers: Vec<(String, ParseLineFn)>,
}

impl Default for ExperimentParser {
    fn default() -> Self {
        Self::new(
            Box::new(parse_config_line),
            Box::new(parse_metric_line),
            Box::new(parse_json),
        )
    }
}

impl ExperimentParser {
    pub fn new(config_line: ParseLineFn, metric_line: ParseLineFn, info_line: ParseLineFn) -> Self {
        Self {
            parsers: vec![
                ("config".to_string(), config_line),
                ("metric".to_string(), metric_line),
                ("info".to_string(), info_line),
            ],
        }
    }

    pub fn parse_line(&self, line: &str) -> Option<LogRecord> {
        self.parsers.iter().find_map(|(log_type, parse)| {
            let mut log = parse(line)?;
            log.entry(LOGBOOK_TYPE.to_string())
                .or_insert_with(|| Value::String(log_type.clone()));
            Some(log)
        })
    }

    pub fn parse(&self, path: &Path) -> Result<Experiment> {
        let mut experiment = Experiment::default();
        let mut metric_logs = vec![];

        for_each_line(path, |line| {
            let Some(log) = self.parse_line(line) else {
                return true;
            };
            let log_type = log
                .get(LOGBOOK_TYPE)
                .and_then(Value::as_str)
                .unwrap_or("info")
                .to_string();
            match log_type.as_str() {
                "config" => experiment.configs.push(log),
                "metric" => metric_logs.push(log),
                _ => experiment.info.entry(log_type).or_default().push(log),
            }
            true
        })?;

        debug!(
            path = %path.display(),
            configs = experiment.configs.len(),
            metrics = metric_logs.len(),
            "experiment parsed"
        );
        experiment.metrics = metrics_to_batches(metric_logs, group_all, keep_all)?;
        Ok(experiment)
    }
}

/// An ordered collection of experiments.
#[derive(Debug, Clone, Default)]
pub struct ExperimentSequence {
    experiments: Vec<Experiment>,
}

impl ExperimentSequence {
    pub fn new(experiments: Vec<Experiment>) -> Self {
        Self { experiments }
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Experiment> {
        self.experiments.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Experiment> {
        self.experiments.iter()
    }

    /// Sub-sequence over `range`; out-of-bounds parts are dropped.
    pub fn slice(&self, range: std::ops::Range<usize>) -> ExperimentSequence {
        let end = range.end.min(self.experiments.len());
        let start = range.start.min(end);
        Self::new(self.experiments[start..end].to_vec())
    }

    pub fn filter<F>(&self, keep: F) -> ExperimentSequence
    where
        F: Fn(&Experiment) -> bool,
    {
        Self::new(self.experiments.iter().filter(|e| keep(e)).cloned().collect())
    }

    /// Split into sequences keyed by `group`, keeping order within each.
    pub fn groupby<F>(&self, group: F) -> BTreeMap<String, ExperimentSequence>
    where
        F: Fn(&Experiment) -> String,
    {
        let mut grouped: BTreeMap<String, Vec<Experiment>> = BTreeMap::new();
        for experiment in &self.experiments {
            grouped
                .entry(group(experiment))
                .or_default()
                .push(experiment.clone());
        }
        grouped
            .into_iter()
            .map(|(key, experiments)| (key, Self::new(experiments)))
            .collect()
    }
}

impl From<Vec<Experiment>> for ExperimentSequence {
    fn from(experiments: Vec<Experiment>) -> Self {
        Self::new(experiments)
    }
}

impl<'a> IntoIterator for &'a ExperimentSequence {
    type Item = &'a Experiment;
    type IntoIter = std::slice::Iter<'a, Experiment>;

    fn into_iter(self) -> Self::IntoIter {
        self.experiments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::metric::ALL_METRICS;
    use serde_json::json;
    use tempfile::TempDir;

    fn experiment_with(seed: i64, optimizer: &str) -> Experiment {
        let config = json!({"seed": seed, "optimizer": optimizer});
        Experiment {
            configs: vec![config.as_object().cloned().unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn sorts_records_by_type() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("run.jsonl"),
            concat!(
                "{\"lr\": 0.1, \"logbook_type\": \"config\"}\n",
                "{\"loss\": 0.9, \"step\": 0, \"logbook_type\": \"metric\"}\n",
                "{\"message\": \"epoch done\", \"logbook_type\": \"message\"}\n",
                "some stray console output\n",
                "{\"loss\": 0.4, \"step\": 1, \"logbook_type\": \"metric\"}\n",
                "{\"host\": \"node-3\", \"logbook_type\": \"metadata\"}\n",
                "{\"untyped\": true}\n",
            ),
        )
        .unwrap();

        let experiment = ExperimentParser::default().parse(tmp.path()).unwrap();
        assert_eq!(experiment.configs.len(), 1);
        assert_eq!(experiment.config().unwrap()["lr"], json!(0.1));
        assert_eq!(experiment.metrics[ALL_METRICS].num_rows(), 2);
        assert_eq!(experiment.info["message"].len(), 1);
        assert_eq!(experiment.info["metadata"][0]["host"], json!("node-3"));
        assert_eq!(experiment.info["info"][0]["untyped"], json!(true));
    }

    #[test]
    fn event_files_next_to_logs_are_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("run.jsonl"),
            "{\"lr\": 0.1, \"logbook_type\": \"config\"}\n{\"loss\": 1.0, \"logbook_type\": \"metric\"}\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("events.out.tfevents"), [0xff, 0xfe, 0x00, 0x10]).unwrap();

        let experiment = ExperimentParser::default().parse(tmp.path()).unwrap();
        assert_eq!(experiment.configs.len(), 1);
        assert_eq!(experiment.metrics[ALL_METRICS].num_rows(), 1);
    }

    #[test]
    fn sequence_filter_and_groupby() {
        let sequence = ExperimentSequence::from(vec![
            experiment_with(1, "adam"),
            experiment_with(2, "sgd"),
            experiment_with(3, "adam"),
        ]);

        let adam = sequence.filter(|e| e.configs[0]["optimizer"] == json!("adam"));
        assert_eq!(adam.len(), 2);

        let groups = sequence.groupby(|e| e.configs[0]["optimizer"].as_str().unwrap().to_string());
        assert_eq!(groups["adam"].len(), 2);
        assert_eq!(groups["sgd"].len(), 1);
        assert_eq!(groups["adam"].get(1).unwrap().configs[0]["seed"], json!(3));

        assert_eq!(sequence.slice(1..10).len(), 2);
        assert!(sequence.slice(5..7).is_empty());
        assert_eq!((&sequence).into_iter().count(), 3);
    }
}
