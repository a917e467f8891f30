// Detail section resolution: `payload_length:u32` followed by a JSON object.

use serde_json::{Map, Value};
use tracing::trace;

use super::error::{AtfError, AtfResult};
use super::json;
use super::memory_map::MemoryMap;
use super::types::{
    le_u32, DetailEvent, EventType, IndexEvent, DETAIL_LENGTH_PREFIX_SIZE,
};

/// Resolve the detail record at absolute file `offset`.
///
/// `detail_section` is the validated start of the detail section; pointers
/// in front of it are rejected.
pub fn resolve(memory_map: &MemoryMap, detail_section: u64, offset: i64) -> AtfResult<DetailEvent> {
    let start = u64::try_from(offset)
        .ok()
        .filter(|start| *start >= detail_section)
        .ok_or_else(|| {
            AtfError::decode(format!(
                "detail offset {offset} precedes detail section at {detail_section}"
            ))
        })?;

    let prefix = memory_map
        .slice(start, DETAIL_LENGTH_PREFIX_SIZE)
        .map_err(|err| match err {
            AtfError::NotOpen(_) => err,
            _ => AtfError::decode(format!("detail entry at {offset} has invalid length prefix")),
        })?;
    let payload_length = u64::from(le_u32(prefix, 0));

    let payload_start = start + DETAIL_LENGTH_PREFIX_SIZE;
    if payload_start + payload_length > memory_map.size() {
        return Err(AtfError::decode(format!(
            "detail entry at {offset} with {payload_length} byte payload extends beyond file"
        )));
    }

    let payload = memory_map.slice(payload_start, payload_length)?;
    trace!(offset, payload_length, "Resolving detail event");
    DetailEvent::from_payload(payload, offset)
}

impl DetailEvent {
    /// Decode a detail JSON payload. `offset` is the pointer that led to it
    /// and becomes the default `detail_offset`.
    pub fn from_payload(payload: &[u8], offset: i64) -> AtfResult<Self> {
        let value = json::decode(payload)
            .map_err(|err| AtfError::decode(format!("detail payload contains invalid JSON: {err}")))?;
        let Value::Object(mut root) = value else {
            return Err(AtfError::decode("detail payload must be a JSON object"));
        };

        let index_event = match root.get("index_event") {
            Some(Value::Object(fields)) => decode_index_event(fields, offset)?,
            _ => return Err(AtfError::decode("detail payload missing index_event")),
        };

        let call_stack = match take_present(&mut root, "call_stack") {
            None => Vec::new(),
            Some(Value::Array(frames)) => frames
                .iter()
                .map(|frame| {
                    integer(frame)
                        .and_then(|frame| u64::try_from(frame).ok())
                        .ok_or_else(|| {
                            AtfError::decode("detail payload contains invalid call_stack entry")
                        })
                })
                .collect::<AtfResult<_>>()?,
            Some(_) => return Err(AtfError::decode("detail payload call_stack must be a list")),
        };

        Ok(Self {
            index_event,
            call_stack,
            arguments: take_object(&mut root, "arguments")?,
            return_value: take_present(&mut root, "return_value"),
            metadata: take_object(&mut root, "metadata")?,
        })
    }
}

fn decode_index_event(fields: &Map<String, Value>, offset: i64) -> AtfResult<IndexEvent> {
    let event_type = match fields.get("event_type") {
        None | Some(Value::Null) => {
            return Err(AtfError::decode("detail payload missing event_type"))
        }
        Some(Value::String(name)) => EventType::from_name(name),
        Some(value) => value
            .as_u64()
            .and_then(|code| u32::try_from(code).ok())
            .and_then(EventType::from_code),
    }
    .ok_or_else(|| AtfError::decode("unsupported event type in detail payload"))?;

    Ok(IndexEvent {
        timestamp_ns: required_field(fields, "timestamp_ns")?,
        thread_id: required_field(fields, "thread_id")?,
        function_id: required_field(fields, "function_id")?,
        event_type,
        detail_offset: optional_field(fields, "detail_offset")?.unwrap_or(offset),
        flags: optional_field(fields, "flags")?.unwrap_or(0),
    })
}

fn required_field<T: TryFrom<i128>>(fields: &Map<String, Value>, key: &str) -> AtfResult<T> {
    optional_field(fields, key)?
        .ok_or_else(|| AtfError::decode(format!("detail index_event missing {key}")))
}

fn optional_field<T: TryFrom<i128>>(fields: &Map<String, Value>, key: &str) -> AtfResult<Option<T>> {
    let Some(value) = fields.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };
    integer(value)
        .and_then(|wide| T::try_from(wide).ok())
        .map(Some)
        .ok_or_else(|| AtfError::decode(format!("detail index_event field {key} is invalid")))
}

/// JSON integer, or a string holding one (`"100"`). Floats and other
/// strings are not integers.
fn integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .map(i128::from)
            .or_else(|| number.as_i64().map(i128::from)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

// Explicit `null` counts as absent.
fn take_present(root: &mut Map<String, Value>, key: &str) -> Option<Value> {
    root.remove(key).filter(|value| !value.is_null())
}

fn take_object(root: &mut Map<String, Value>, key: &str) -> AtfResult<Map<String, Value>> {
    match take_present(root, key) {
        None => Ok(Map::new()),
        Some(Value::Object(object)) => Ok(object),
        Some(_) => Err(AtfError::decode(format!(
            "detail payload {key} must be an object"
        ))),
    }
}
