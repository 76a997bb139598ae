//! Metrics document produced by the external repository analysis tool.

use repolens_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Single metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl MetricValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(b) => MetricValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(MetricValue::Number).unwrap_or(MetricValue::Null),
            Value::String(s) => MetricValue::Text(s.clone()),
            Value::Null => MetricValue::Null,
            other => MetricValue::Text(other.to_string()),
        }
    }
}

/// Opaque metric-key to value mapping. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsDocument {
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricsDocument {
    /// Build a document from analyzer JSON output.
    ///
    /// Accepts either a flat object (`{"metric": value}`) or a table of
    /// entries (`[{"name": ..., "result": ...}]`), the shape emitted by the
    /// analysis tool's table command.
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut metrics = BTreeMap::new();

        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    metrics.insert(key.clone(), MetricValue::from_json(v));
                }
            }
            Value::Array(rows) => {
                for row in rows {
                    let name = row
                        .get("name")
                        .or_else(|| row.get("id"))
                        .and_then(|n| n.as_str())
                        .ok_or_else(|| Error::Parse("metric entry without a name".to_string()))?;
                    let result = row.get("result").unwrap_or(&Value::Null);
                    metrics.insert(name.to_string(), MetricValue::from_json(result));
                }
            }
            _ => {
                return Err(Error::Parse(
                    "expected a JSON object or array of metric entries".to_string(),
                ))
            }
        }

        Ok(Self { metrics })
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.metrics.get(key)
    }

    /// Boolean view of a metric. Numbers are truthy when non-zero.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.metrics.get(key)? {
            MetricValue::Bool(b) => Some(*b),
            MetricValue::Number(n) => Some(*n != 0.0),
            MetricValue::Text(s) => match s.to_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            MetricValue::Null => None,
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.metrics.get(key)? {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.metrics.get(key)? {
            MetricValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
