//! Running aggregates over metric values, ready to hand to
//! [`LogBook::write_metric_log`](crate::LogBook::write_metric_log).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{LogRecord, MetricValue};

/// An update fed to a metric: a value and the number of samples it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricUpdate {
    pub value: MetricValue,
    pub count: u64,
}

impl MetricUpdate {
    pub fn new(value: impl Into<MetricValue>, count: u64) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }

    /// Read an update from a JSON value: a scalar, or a `[value, count]` pair.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(pair) if pair.len() == 2 => Some(Self {
                value: MetricValue::from_json(&pair[0])?,
                count: pair[1].as_u64()?,
            }),
            other => MetricValue::from_json(other).map(Self::from),
        }
    }
}

impl From<MetricValue> for MetricUpdate {
    fn from(value: MetricValue) -> Self {
        Self::new(value, 1)
    }
}

pub trait Metric: Send {
    fn name(&self) -> &str;
    fn reset(&mut self);
    fn update(&mut self, update: MetricUpdate);
    fn value(&self) -> MetricValue;
}

/// Tracks the most recent value.
#[derive(Debug, Clone)]
pub struct CurrentMetric {
    name: String,
    val: MetricValue,
}

impl CurrentMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            val: MetricValue::Int(0),
        }
    }
}

impl Metric for CurrentMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.val = MetricValue::Int(0);
    }

    fn update(&mut self, update: MetricUpdate) {
        self.val = update.value;
    }

    fn value(&self) -> MetricValue {
        self.val.clone()
    }
}

/// A fixed value. Updates and resets are ignored; handy for strings such
/// as the mode (`"train"`, `"eval"`) of a metric log.
#[derive(Debug, Clone)]
pub struct ConstantMetric {
    name: String,
    val: MetricValue,
}

impl ConstantMetric {
    pub fn new(name: impl Into<String>, val: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            val: val.into(),
        }
    }
}

impl Metric for ConstantMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {}

    fn update(&mut self, _update: MetricUpdate) {}

    fn value(&self) -> MetricValue {
        self.val.clone()
    }
}

/// Keeps whichever value wins `better(new, current)`.
pub struct ComparisonMetric {
    name: String,
    default: f64,
    val: f64,
    better: fn(f64, f64) -> bool,
}

impl ComparisonMetric {
    pub fn new(name: impl Into<String>, default: f64, better: fn(f64, f64) -> bool) -> Self {
        Self {
            name: name.into(),
            default,
            val: default,
            better,
        }
    }
}

impl Metric for ComparisonMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.val = self.default;
    }

    fn update(&mut self, update: MetricUpdate) {
        if let Some(v) = update.value.as_f64() {
            if (self.better)(v, self.val) {
                self.val = v;
            }
        }
    }

    fn value(&self) -> MetricValue {
        MetricValue::Float(self.val)
    }
}

pub struct MaxMetric;

impl MaxMetric {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>) -> ComparisonMetric {
        ComparisonMetric::new(name, f64::NEG_INFINITY, |new, cur| new > cur)
    }
}

pub struct MinMetric;

impl MinMetric {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>) -> ComparisonMetric {
        ComparisonMetric::new(name, f64::INFINITY, |new, cur| new < cur)
    }
}

/// Weighted running mean. Each update is an average over `count` samples.
#[derive(Debug, Clone)]
pub struct AverageMetric {
    name: String,
    /// Last value seen.
    pub last: f64,
    sum: f64,
    count: f64,
}

impl AverageMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last: 0.0,
            sum: 0.0,
            count: 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn average(&self) -> f64 {
        if self.count == 0.0 {
            0.0
        } else {
            self.sum / self.count
        }
    }
}

impl Metric for AverageMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.last = 0.0;
        self.sum = 0.0;
        self.count = 0.0;
    }

    fn update(&mut self, update: MetricUpdate) {
        if let Some(v) = update.value.as_f64() {
            let n = update.count as f64;
            self.last = v;
            self.sum += v * n;
            self.count += n;
        }
    }

    fn value(&self) -> MetricValue {
        MetricValue::Float(self.average())
    }
}

/// Weighted running sum.
#[derive(Debug, Clone)]
pub struct SumMetric(AverageMetric);

impl SumMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self(AverageMetric::new(name))
    }
}

impl Metric for SumMetric {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn update(&mut self, update: MetricUpdate) {
        self.0.update(update);
    }

    fn value(&self) -> MetricValue {
        MetricValue::Float(self.0.sum())
    }
}

/// A named collection of metrics updated together from one log record.
#[derive(Default)]
pub struct MetricDict {
    metrics: BTreeMap<String, Box<dyn Metric>>,
}

impl MetricDict {
    pub fn new(metrics: Vec<Box<dyn Metric>>) -> Self {
        Self {
            metrics: metrics
                .into_iter()
                .map(|m| (m.name().to_string(), m))
                .collect(),
        }
    }

    pub fn insert(&mut self, metric: Box<dyn Metric>) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn reset(&mut self) {
        for metric in self.metrics.values_mut() {
            metric.reset();
        }
    }

    /// Update every metric named in `values`. Unknown keys and values with
    /// no metric form are ignored.
    pub fn update(&mut self, values: &LogRecord) {
        for (key, value) in values {
            if let (Some(metric), Some(update)) =
                (self.metrics.get_mut(key), MetricUpdate::from_json(value))
            {
                metric.update(update);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).map(|m| m.value())
    }

    /// Current values as a record. Metrics without a finite value (a
    /// `MaxMetric` or `MinMetric` that has seen no update still holds
    /// -inf/+inf) are left out rather than written as `null`.
    pub fn to_log(&self) -> LogRecord {
        self.metrics
            .iter()
            .filter_map(|(k, m)| match m.value() {
                MetricValue::Float(v) if !v.is_finite() => None,
                value => Some((k.clone(), Value::from(value))),
            })
            .collect()
    }
}

impl std::fmt::Display for MetricDict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, metric)) in self.metrics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{name}: {}", metric.value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_metric_tracks_last_value() {
        let mut metric = CurrentMetric::new("current");
        for step in 1..=100i64 {
            metric.update(MetricUpdate::new(step, 1));
            assert_eq!(metric.value(), MetricValue::Int(step));
        }
    }

    #[test]
    fn constant_metric_ignores_updates() {
        let mut metric = ConstantMetric::new("constant", 1000);
        for step in 1..=100i64 {
            metric.update(MetricUpdate::new(step, 1));
            assert_eq!(metric.value(), MetricValue::Int(1000));
        }
        metric.reset();
        assert_eq!(metric.value(), MetricValue::Int(1000));
    }

    #[test]
    fn max_and_min() {
        let mut max = MaxMetric::new("max");
        for step in 1..=100i64 {
            max.update(MetricUpdate::new(step, 1));
            assert_eq!(max.value(), MetricValue::Float(step as f64));
        }

        let mut min = MinMetric::new("min");
        for step in (1..=100i64).rev() {
            min.update(MetricUpdate::new(step, 1));
            assert_eq!(min.value(), MetricValue::Float(step as f64));
        }
        min.reset();
        assert_eq!(min.value(), MetricValue::Float(f64::INFINITY));
    }

    #[test]
    fn average_is_weighted() {
        let mut avg = AverageMetric::new("avg");
        for step in 1..=100i64 {
            avg.update(MetricUpdate::new(step, 2));
            assert_eq!(avg.value(), MetricValue::Float((step as f64 + 1.0) * 0.5));
        }
        assert_eq!(avg.last, 100.0);
    }

    #[test]
    fn sum_accumulates() {
        let mut sum = SumMetric::new("sum");
        for step in 1..=100i64 {
            sum.update(MetricUpdate::new(step, 1));
            assert_eq!(
                sum.value(),
                MetricValue::Float((step * (step + 1)) as f64 * 0.5)
            );
        }
    }

    #[test]
    fn metric_dict_updates_from_records() {
        let mut dict = MetricDict::new(vec![
            Box::new(CurrentMetric::new("current")) as Box<dyn Metric>,
            Box::new(ConstantMetric::new("mode", "train")),
            Box::new(MaxMetric::new("max")),
            Box::new(MinMetric::new("min")),
            Box::new(AverageMetric::new("avg")),
            Box::new(AverageMetric::new("avg_pair")),
            Box::new(SumMetric::new("sum")),
        ]);

        for step in 1..=100i64 {
            let record = json!({
                "current": step,
                "mode": "eval",
                "max": step,
                "min": step,
                "avg": step,
                "avg_pair": [step, 2],
                "sum": step,
                "unknown": step,
            });
            dict.update(record.as_object().unwrap());
        }

        assert_eq!(
            Value::Object(dict.to_log()),
            json!({
                "current": 100,
                "mode": "train",
                "max": 100.0,
                "min": 1.0,
                "avg": 50.5,
                "avg_pair": 50.5,
                "sum": 5050.0,
            })
        );

        dict.reset();
        assert_eq!(dict.get("sum"), Some(MetricValue::Float(0.0)));
    }

    #[test]
    fn untouched_extremes_are_left_out_of_the_log() {
        let mut dict = MetricDict::new(vec![
            Box::new(MaxMetric::new("max")) as Box<dyn Metric>,
            Box::new(MinMetric::new("min")),
            Box::new(SumMetric::new("sum")),
        ]);
        assert_eq!(Value::Object(dict.to_log()), json!({"sum": 0.0}));
        assert_eq!(dict.get("max"), Some(MetricValue::Float(f64::NEG_INFINITY)));

        dict.update(json!({"max": 3}).as_object().unwrap());
        assert_eq!(Value::Object(dict.to_log()), json!({"max": 3.0, "sum": 0.0}));
    }
}
