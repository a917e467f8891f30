// Fixture writer for ATF container files.

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use query_engine::atf::{EventType, ATF_MAGIC, ATF_VERSION, HEADER_SIZE, INDEX_RECORD_SIZE};
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct TestEvent {
    pub timestamp_ns: u64,
    pub thread_id: u32,
    pub function_id: u32,
    pub event_type: EventType,
    pub flags: u32,
    /// Extra detail payload fields (`call_stack`, `arguments`, ...). `None`
    /// writes a zero detail pointer.
    pub detail: Option<Value>,
}

impl TestEvent {
    pub fn new(timestamp_ns: u64, thread_id: u32, event_type: EventType) -> Self {
        Self {
            timestamp_ns,
            thread_id,
            function_id: 1,
            event_type,
            flags: 0,
            detail: None,
        }
    }

    pub fn function_id(mut self, function_id: u32) -> Self {
        self.function_id = function_id;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Header, manifest, index records, then `detail_padding` zero bytes and
/// the detail records in event order.
#[derive(Debug, Clone)]
pub struct AtfFileBuilder {
    manifest: Value,
    events: Vec<TestEvent>,
    detail_padding: u64,
}

impl AtfFileBuilder {
    pub fn new(manifest: Value) -> Self {
        Self {
            manifest,
            events: Vec::new(),
            detail_padding: 0,
        }
    }

    pub fn event(mut self, event: TestEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn detail_padding(mut self, padding: u64) -> Self {
        self.detail_padding = padding;
        self
    }

    pub fn build_bytes(&self) -> Vec<u8> {
        let manifest_bytes = serde_json::to_vec(&self.manifest).expect("serialize manifest");
        let index_count = self.events.len() as u64;
        let index_offset = HEADER_SIZE + manifest_bytes.len() as u64;
        let detail_offset = index_offset + index_count * INDEX_RECORD_SIZE + self.detail_padding;

        let mut index_records = Vec::new();
        let mut detail_records = Vec::new();
        for event in &self.events {
            let mut detail_pointer = 0i64;
            if let Some(extra) = &event.detail {
                detail_pointer = (detail_offset + detail_records.len() as u64) as i64;
                let mut payload = Map::new();
                payload.insert(
                    "index_event".into(),
                    json!({
                        "timestamp_ns": event.timestamp_ns,
                        "thread_id": event.thread_id,
                        "function_id": event.function_id,
                        "event_type": event.event_type.as_str(),
                        "detail_offset": detail_pointer,
                        "flags": event.flags,
                    }),
                );
                if let Value::Object(fields) = extra {
                    for (key, value) in fields {
                        payload.insert(key.clone(), value.clone());
                    }
                }
                let payload_bytes = serde_json::to_vec(&payload).expect("serialize detail");
                detail_records.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
                detail_records.extend_from_slice(&payload_bytes);
            }

            index_records.extend_from_slice(&event.timestamp_ns.to_le_bytes());
            index_records.extend_from_slice(&event.thread_id.to_le_bytes());
            index_records.extend_from_slice(&event.function_id.to_le_bytes());
            index_records.extend_from_slice(&event.event_type.code().to_le_bytes());
            index_records.extend_from_slice(&detail_pointer.to_le_bytes());
            index_records.extend_from_slice(&event.flags.to_le_bytes());
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ATF_MAGIC);
        bytes.extend_from_slice(&ATF_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(manifest_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&index_offset.to_le_bytes());
        bytes.extend_from_slice(&index_count.to_le_bytes());
        bytes.extend_from_slice(&detail_offset.to_le_bytes());
        bytes.extend_from_slice(&manifest_bytes);
        bytes.extend_from_slice(&index_records);
        bytes.resize(bytes.len() + self.detail_padding as usize, 0);
        bytes.extend_from_slice(&detail_records);
        bytes
    }

    pub fn build(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&self.build_bytes()).expect("write trace");
        file.flush().expect("flush trace");
        file
    }
}

pub fn manifest(start_ns: u64, end_ns: u64, thread_ids: &[u64], event_count: u64) -> Value {
    json!({
        "metadata": {
            "process_name": "unit_tests",
            "host": "localhost",
        },
        "time_range": {
            "start_ns": start_ns,
            "end_ns": end_ns,
        },
        "thread_ids": thread_ids,
        "event_count": event_count,
    })
}

/// Three events at 100/250/480 on threads 11/12/11; first and last carry
/// detail payloads.
pub fn sample_builder() -> AtfFileBuilder {
    AtfFileBuilder::new(manifest(100, 500, &[11, 12], 3))
        .event(
            TestEvent::new(100, 11, EventType::FunctionEnter).detail(json!({
                "call_stack": [100, 200],
                "arguments": {"arg": 1},
                "return_value": null,
                "metadata": {"lane": "index"},
            })),
        )
        .event(
            TestEvent::new(250, 12, EventType::Syscall)
                .function_id(2)
                .flags(4),
        )
        .event(
            TestEvent::new(480, 11, EventType::Custom)
                .function_id(3)
                .flags(1)
                .detail(json!({
                    "call_stack": [300],
                    "arguments": {"payload": "hello"},
                    "return_value": "done",
                    "metadata": {"lane": "detail"},
                })),
        )
}

/// Overwrite bytes of a written file in place.
pub fn patch(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).expect("open for patch");
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(bytes).expect("patch");
    file.flush().expect("flush");
}
