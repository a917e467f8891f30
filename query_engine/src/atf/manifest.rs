use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::error::{AtfError, AtfResult};
use super::json as codec;
use super::types::TimeRange;

/// Trace-wide summary decoded from the manifest section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestInfo {
    pub metadata: Map<String, Value>,
    pub time_range: TimeRange,
    /// Sorted ascending, no duplicates.
    pub thread_ids: Vec<u64>,
    pub event_count: u64,
}

impl ManifestInfo {
    pub fn from_bytes(payload: &[u8]) -> AtfResult<Self> {
        if payload.is_empty() {
            return Err(AtfError::manifest("manifest payload is empty"));
        }

        let raw = codec::decode(payload)
            .map_err(|err| AtfError::manifest(format!("failed to parse manifest JSON: {err}")))?;
        let Value::Object(root) = raw else {
            return Err(AtfError::manifest("manifest must be a JSON object"));
        };

        let metadata = match present(&root, "metadata") {
            None => Map::new(),
            Some(Value::Object(metadata)) => metadata.clone(),
            Some(_) => return Err(AtfError::manifest("manifest metadata must be an object")),
        };

        let time_range = match present(&root, "time_range") {
            None => TimeRange {
                start_ns: 0,
                end_ns: 0,
            },
            Some(Value::Object(range)) => {
                let start_ns = match range.get("start_ns") {
                    None => 0,
                    Some(value) => time_bound(value)?,
                };
                let end_ns = match range.get("end_ns") {
                    None => start_ns,
                    Some(value) => time_bound(value)?,
                };
                if end_ns < start_ns {
                    return Err(AtfError::manifest("manifest end time precedes start time"));
                }
                TimeRange { start_ns, end_ns }
            }
            Some(_) => return Err(AtfError::manifest("invalid time range in manifest")),
        };

        let thread_ids = match present(&root, "thread_ids") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_u64().ok_or_else(|| {
                        AtfError::manifest("manifest thread_ids must contain integers")
                    })
                })
                .collect::<AtfResult<BTreeSet<u64>>>()?
                .into_iter()
                .collect(),
            Some(_) => return Err(AtfError::manifest("manifest thread_ids must be a list")),
        };

        let event_count = match present(&root, "event_count") {
            None => 0,
            Some(value) => match value.as_u64() {
                Some(count) => count,
                None if value.as_i64().is_some_and(|count| count < 0) => {
                    return Err(AtfError::manifest("manifest event_count must be non-negative"))
                }
                None => return Err(AtfError::manifest("manifest event_count must be an integer")),
            },
        };

        Ok(Self {
            metadata,
            time_range,
            thread_ids,
            event_count,
        })
    }

    /// Canonical JSON mirror of the manifest.
    pub fn to_value(&self) -> Value {
        json!({
            "metadata": self.metadata,
            "time_range": {
                "start_ns": self.time_range.start_ns,
                "end_ns": self.time_range.end_ns,
            },
            "thread_ids": self.thread_ids,
            "event_count": self.event_count,
        })
    }

    /// Manifest section bytes for [`to_value`](Self::to_value).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }

    pub(crate) fn with_event_count(self, event_count: u64) -> Self {
        Self {
            event_count,
            ..self
        }
    }
}

// Explicit `null` counts as absent.
fn present<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    root.get(key).filter(|value| !value.is_null())
}

fn time_bound(value: &Value) -> AtfResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| AtfError::manifest("invalid time range in manifest"))
}
