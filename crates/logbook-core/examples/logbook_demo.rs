//! Example of using logbook-core directly from Rust.

use logbook_core::config::{FilesystemConfig, KeyOptions, TensorboardConfig};
use logbook_core::metrics::{AverageMetric, ConstantMetric, Metric, MetricDict};
use logbook_core::{LogBook, LogBookConfig};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).compact().init();

    // 1. Setup configuration: a JSON-lines file plus tensorboard, which
    //    wants the step under `global_step`
    let config = LogBookConfig::new("0", "sine_demo")
        .with_filesystem(FilesystemConfig::new("./logs/sine_demo.jsonl", "sine_demo"))
        .with_tensorboard(
            TensorboardConfig::new("./logs/tensorboard")
                .with_keys(KeyOptions::default().map_key("step", "global_step")),
        );

    // 2. Build every enabled backend
    let mut book = LogBook::new(config)?;

    // 3. Log the run's parameters
    let params = json!({"language": "rust", "threads": 1});
    book.write_config_log(params.as_object().ok_or("params must be an object")?)?;

    // 4. Aggregate and log metrics
    let mut running = MetricDict::new(vec![
        Box::new(ConstantMetric::new("mode", "train")) as Box<dyn Metric>,
        Box::new(AverageMetric::new("sine")),
    ]);
    for i in 0..50u64 {
        let x = i as f64 * 0.1;
        let metric = json!({"sine": x.sin(), "cosine": x.cos(), "step": i});
        let metric = metric.as_object().ok_or("metric must be an object")?;
        book.write_metric_log(metric)?;
        running.update(metric);
    }

    let mut summary = running.to_log();
    summary.insert("step".to_string(), json!(50));
    book.write_metric_log(&summary)?;
    book.write_message("demo finished")?;

    // 5. Flush and finish every backend
    book.close()?;
    Ok(())
}
