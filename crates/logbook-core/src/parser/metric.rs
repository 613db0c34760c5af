//! Metric records and their columnar (Arrow/Parquet) form.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_json::Value;

use crate::error::{LogBookError, Result};
use crate::models::LogRecord;
use crate::parser::utils::flatten_log;
use crate::parser::{parse_json_of_type, LogParser};

/// Group name used when metrics are not split.
pub const ALL_METRICS: &str = "all";

pub fn parse_metric_line(line: &str) -> Option<LogRecord> {
    parse_json_of_type(line, "metric")
}

/// Parser that keeps only metric records.
pub fn metric_parser() -> LogParser {
    LogParser::new(Box::new(parse_metric_line), "metric")
}

/// Put every metric in a single group named `"all"`.
pub fn group_all(metrics: Vec<LogRecord>) -> BTreeMap<String, Vec<LogRecord>> {
    BTreeMap::from([(ALL_METRICS.to_string(), metrics)])
}

/// Group metrics by the string value of `key` (e.g. `"mode"`). Records
/// without the key land in `"all"`.
pub fn group_by_key(key: &str) -> impl Fn(Vec<LogRecord>) -> BTreeMap<String, Vec<LogRecord>> + '_ {
    move |metrics| {
        let mut groups: BTreeMap<String, Vec<LogRecord>> = BTreeMap::new();
        for metric in metrics {
            let group = match metric.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => ALL_METRICS.to_string(),
            };
            groups.entry(group).or_default().push(metric);
        }
        groups
    }
}

/// Leave a group's metrics as they are.
pub fn keep_all(metrics: Vec<LogRecord>) -> Vec<LogRecord> {
    metrics
}

/// Group, aggregate, then build one Arrow batch per group.
pub fn metrics_to_batches<G, A>(
    metrics: Vec<LogRecord>,
    group: G,
    aggregate: A,
) -> Result<BTreeMap<String, RecordBatch>>
where
    G: Fn(Vec<LogRecord>) -> BTreeMap<String, Vec<LogRecord>>,
    A: Fn(Vec<LogRecord>) -> Vec<LogRecord>,
{
    group(metrics)
        .into_iter()
        .map(|(name, logs)| Ok((name, records_to_batch(&aggregate(logs))?)))
        .collect()
}

/// Build a batch from records. Nested objects are flattened with `.`;
/// a column is Float64 when every present value is a number, Utf8
/// otherwise. Cells a record does not have are null.
pub fn records_to_batch(records: &[LogRecord]) -> Result<RecordBatch> {
    let flat: Vec<LogRecord> = records.iter().map(|r| flatten_log(r, ".")).collect();

    // Collect all unique keys across all records, in first-seen order
    let mut all_keys: Vec<String> = vec![];
    for record in &flat {
        for key in record.keys() {
            if !all_keys.contains(key) {
                all_keys.push(key.clone());
            }
        }
    }

    let mut fields = vec![];
    let mut arrays: Vec<ArrayRef> = vec![];

    for key in &all_keys {
        let numeric = flat
            .iter()
            .filter_map(|r| r.get(key))
            .filter(|v| !v.is_null())
            .all(Value::is_number);

        if numeric {
            let vals: Vec<Option<f64>> = flat
                .iter()
                .map(|r| r.get(key).and_then(Value::as_f64))
                .collect();
            fields.push(Field::new(key, DataType::Float64, true));
            arrays.push(Arc::new(Float64Array::from(vals)));
        } else {
            let vals: Vec<Option<String>> = flat
                .iter()
                .map(|r| match r.get(key) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                })
                .collect();
            fields.push(Field::new(key, DataType::Utf8, true));
            arrays.push(Arc::new(StringArray::from(vals)));
        }
    }

    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Read a batch back into records. Null cells are left out.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<LogRecord>> {
    let schema = batch.schema();
    let mut rows = vec![LogRecord::new(); batch.num_rows()];

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let col = batch.column(col_idx);
        let name = field.name();
        match field.data_type() {
            DataType::Float64 => {
                let arr = downcast::<Float64Array>(col, name)?;
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    if arr.is_valid(row_idx) {
                        let v = serde_json::Number::from_f64(arr.value(row_idx))
                            .map(Value::Number)
                            .unwrap_or(Value::Null);
                        row.insert(name.clone(), v);
                    }
                }
            }
            DataType::Utf8 => {
                let arr = downcast::<StringArray>(col, name)?;
                for (row_idx, row) in rows.iter_mut().enumerate() {
                    if arr.is_valid(row_idx) {
                        row.insert(name.clone(), Value::String(arr.value(row_idx).to_string()));
                    }
                }
            }
            other => {
                return Err(LogBookError::InvalidValue {
                    key: name.clone(),
                    reason: format!("unsupported column type {other}"),
                })
            }
        }
    }
    Ok(rows)
}

fn downcast<'a, T: 'static>(col: &'a ArrayRef, name: &str) -> Result<&'a T> {
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| LogBookError::InvalidValue {
            key: name.to_string(),
            reason: "column does not match its declared type".to_string(),
        })
}

pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = fs::File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(arrow::compute::concat_batches(&schema, &batches)?)
}
