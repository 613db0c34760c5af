//! logbook CLI: look at, compare, export and replay logbook logs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use logbook::models::LOGBOOK_KEYS;
use logbook::parser::config::config_parser;
use logbook::parser::experiment::ExperimentParser;
use logbook::parser::metric::{
    batch_to_records, metric_parser, records_to_batch, write_parquet, ALL_METRICS,
};
use logbook::parser::utils::{compare_logs, flatten_log, DEFAULT_SEPARATOR};
use logbook::parser::LogParser;
use logbook::{LogBook, LogBookConfig, LogRecord, LogType};

#[derive(Parser)]
#[command(
    name = "logbook",
    about = "logbook: inspect and replay experiment logs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the config, the last metric and record counts of a log
    Inspect {
        /// Log file, or a directory of log files
        path: PathBuf,
    },
    /// Export the metric records of a log
    Export {
        /// Log file, or a directory of log files
        path: PathBuf,
        /// Output format
        #[arg(long, short, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output file (default: stdout; required for parquet)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Compare the configs of two logs
    Diff {
        first: PathBuf,
        second: PathBuf,
    },
    /// Send the records of a log through the backends of a config file
    Replay {
        /// Log file, or a directory of log files
        path: PathBuf,
        /// YAML logbook config
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
    Parquet,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { path } => cmd_inspect(path)?,
        Commands::Export {
            path,
            format,
            output,
        } => cmd_export(path, format, output)?,
        Commands::Diff { first, second } => cmd_diff(first, second)?,
        Commands::Replay { path, config } => cmd_replay(path, config)?,
    }

    Ok(())
}

// ─── Command implementations ──────────────────────────────────────────────────

fn cmd_inspect(path: PathBuf) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Log not found: {}", path.display());
    }

    let experiment = ExperimentParser::default().parse(&path)?;

    // Config
    if let Some(config) = experiment.config() {
        println!("── Config ──────────────────────────────");
        println!("{}", key_value_table(&without_logbook_keys(config), "Key"));
        println!();
    }

    // Last metric
    let metrics = match experiment.metrics.get(ALL_METRICS) {
        Some(batch) => batch_to_records(batch)?,
        None => vec![],
    };
    if let Some(last) = metrics.last() {
        println!("── Last Metric ({} total rows) ─────────", metrics.len());
        println!("{}", key_value_table(&without_logbook_keys(last), "Metric"));
        println!();
    }

    // Counts
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    counts.insert("config", experiment.configs.len());
    counts.insert("metric", metrics.len());
    for (log_type, logs) in &experiment.info {
        counts.insert(log_type.as_str(), logs.len());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Type", "Records"]);
    for (log_type, count) in counts {
        table.add_row([log_type.to_string(), count.to_string()]);
    }
    println!("── Records ─────────────────────────────");
    println!("{}", table);

    Ok(())
}

fn cmd_export(path: PathBuf, format: ExportFormat, output: Option<PathBuf>) -> Result<()> {
    let metrics: Vec<LogRecord> = metric_parser()
        .parse(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&metrics)?,
        ExportFormat::Csv => to_csv(&metrics),
        ExportFormat::Parquet => {
            let Some(out) = output else {
                anyhow::bail!("--output is required for parquet export");
            };
            let batch = records_to_batch(&metrics)?;
            write_parquet(&out, &batch)?;
            println!("Exported {} rows to {}", metrics.len(), out.display());
            return Ok(());
        }
    };

    match output {
        Some(out) => {
            std::fs::write(&out, &content)?;
            println!("Exported {} rows to {}", metrics.len(), out.display());
        }
        None => print!("{}", content),
    }

    Ok(())
}

fn cmd_diff(first: PathBuf, second: PathBuf) -> Result<()> {
    let parser = config_parser();
    let load = |path: &PathBuf| -> Result<LogRecord> {
        let config = parser
            .parse_first_log(path)?
            .with_context(|| format!("no config record in {}", path.display()))?;
        Ok(without_logbook_keys(&config))
    };
    let (a, b) = (load(&first)?, load(&second)?);
    let diff = compare_logs(&a, &b);

    if diff.is_empty() {
        println!("Configs are identical.");
        return Ok(());
    }

    let (a, b) = (
        flatten_log(&a, DEFAULT_SEPARATOR),
        flatten_log(&b, DEFAULT_SEPARATOR),
    );
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header([
        "Key".to_string(),
        first.display().to_string(),
        second.display().to_string(),
    ]);
    let keys = diff
        .different_values
        .iter()
        .chain(&diff.missing_in_first)
        .chain(&diff.missing_in_second);
    for key in keys {
        table.add_row([key.clone(), cell(a.get(key)), cell(b.get(key))]);
    }
    println!("{}", table);
    Ok(())
}

fn cmd_replay(path: PathBuf, config: PathBuf) -> Result<()> {
    let config = LogBookConfig::from_yaml_file(&config)
        .with_context(|| format!("loading config {}", config.display()))?;
    if config.loggers.is_empty() {
        anyhow::bail!("config enables no backends");
    }

    let logs = LogParser::default().parse(&path)?;
    let mut book = LogBook::new(config)?;

    let progress = ProgressBar::new(logs.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )?);

    let mut skipped = 0usize;
    for log in &logs {
        progress.inc(1);
        let Some(log_type) = LogType::of(log) else {
            skipped += 1;
            continue;
        };
        if let Err(e) = book.write_log(&without_logbook_keys(log), log_type) {
            warn!(log_type = %log_type, "replay failed: {}", e);
            skipped += 1;
        }
    }
    progress.finish_with_message("done");
    book.close()?;

    println!(
        "Replayed {} of {} records ({} skipped)",
        logs.len() - skipped,
        logs.len(),
        skipped
    );
    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

fn without_logbook_keys(log: &LogRecord) -> LogRecord {
    log.iter()
        .filter(|(k, _)| !LOGBOOK_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn key_value_table(log: &LogRecord, header: &str) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header([header, "Value"]);
    for (k, v) in flatten_log(log, DEFAULT_SEPARATOR) {
        table.add_row([k, cell(Some(&v))]);
    }
    table
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Flattened metrics as CSV, columns sorted by name.
fn to_csv(metrics: &[LogRecord]) -> String {
    let rows: Vec<LogRecord> = metrics
        .iter()
        .map(|m| flatten_log(&without_logbook_keys(m), "."))
        .collect();
    let mut keys: Vec<String> = rows.iter().flat_map(|r| r.keys().cloned()).collect();
    keys.sort();
    keys.dedup();
    if keys.is_empty() {
        return String::new();
    }

    let mut out = keys.iter().map(|k| csv_field(k)).collect::<Vec<_>>().join(",") + "\n";
    for row in &rows {
        let vals: Vec<String> = keys
            .iter()
            .map(|k| match row.get(k) {
                None | Some(Value::Null) => String::new(),
                Some(v) => csv_field(&cell(Some(v))),
            })
            .collect();
        out += &(vals.join(",") + "\n");
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_has_union_of_columns() {
        let metrics: Vec<LogRecord> = vec![
            json!({"loss": 0.5, "step": 1, "logbook_type": "metric"}),
            json!({"acc": 0.9, "step": 2, "note": "a,b"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let csv = to_csv(&metrics);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "acc,loss,note,step");
        assert_eq!(lines[1], ",0.5,,1");
        assert_eq!(lines[2], "0.9,,\"a,b\",2");
    }

    #[test]
    fn logbook_keys_are_stripped() {
        let log = json!({"lr": 1, "logbook_id": "0", "logbook_timestamp": "t", "logbook_type": "config"});
        let stripped = without_logbook_keys(log.as_object().unwrap());
        assert_eq!(Value::Object(stripped), json!({"lr": 1}));
    }
}
