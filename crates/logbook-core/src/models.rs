//! Data models for logbook-rs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single log record: a flat-ish JSON object keyed by field name.
pub type LogRecord = serde_json::Map<String, Value>;

/// Key holding the id of the `LogBook` that wrote the record.
pub const LOGBOOK_ID: &str = "logbook_id";
/// Key holding the local wall-clock time the record was written.
pub const LOGBOOK_TIMESTAMP: &str = "logbook_timestamp";
/// Key holding the record's [`LogType`].
pub const LOGBOOK_TYPE: &str = "logbook_type";

/// Bookkeeping keys added by the façade to every record.
pub const LOGBOOK_KEYS: [&str; 3] = [LOGBOOK_ID, LOGBOOK_TIMESTAMP, LOGBOOK_TYPE];

/// Format of the `logbook_timestamp` value, e.g. `03:41PM +02:00 Oct 19, 2026`.
pub const TIMESTAMP_FORMAT: &str = "%I:%M%p %Z %b %d, %Y";

/// Kind of a log record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Config,
    Metric,
    Message,
    Metadata,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Config => "config",
            LogType::Metric => "metric",
            LogType::Message => "message",
            LogType::Metadata => "metadata",
        }
    }

    /// Read the type stamped on a record, if it is one of the known kinds.
    pub fn of(log: &LogRecord) -> Option<LogType> {
        log.get(LOGBOOK_TYPE)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(LogType::Config),
            "metric" => Ok(LogType::Metric),
            "message" => Ok(LogType::Message),
            "metadata" => Ok(LogType::Metadata),
            other => Err(format!("unknown log type: {other}")),
        }
    }
}

/// A single metric value: float, int, bool or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value. Bools map to 0/1, text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(f) => Some(*f),
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(_) => None,
        }
    }

    /// Convert a JSON scalar. Arrays, objects and null have no metric form.
    pub fn from_json(value: &Value) -> Option<MetricValue> {
        match value {
            Value::Bool(b) => Some(MetricValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(MetricValue::Int)
                .or_else(|| n.as_f64().map(MetricValue::Float)),
            Value::String(s) => Some(MetricValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<MetricValue> for Value {
    fn from(v: MetricValue) -> Self {
        match v {
            MetricValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            MetricValue::Int(i) => Value::from(i),
            MetricValue::Bool(b) => Value::Bool(b),
            MetricValue::Text(s) => Value::String(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}
impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v as f64)
    }
}
impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}
impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v as i64)
    }
}
impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(v as i64)
    }
}
impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}
impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}
impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Bool(v) => write!(f, "{v}"),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

/// Numeric view of a JSON value, used by backends that only take scalars.
pub(crate) fn json_as_f64(value: &Value) -> Option<f64> {
    MetricValue::from_json(value).and_then(|v| v.as_f64())
}
