// Type definitions for the ATF single-file container.
//
// All integers on disk are little-endian. Records are decoded field by field
// from the mapped bytes; nothing is reinterpreted in place.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::{AtfError, AtfResult};

/// File tag at offset 0.
pub const ATF_MAGIC: [u8; 4] = *b"ATF0";
/// The only container version this reader accepts.
pub const ATF_VERSION: u16 = 1;
/// Fixed header: magic, version, flags, manifest length, index offset,
/// index count, detail offset.
pub const HEADER_SIZE: u64 = 40;
/// Fixed size of one index record.
pub const INDEX_RECORD_SIZE: u64 = 32;
/// `u32` payload length in front of every detail record.
pub const DETAIL_LENGTH_PREFIX_SIZE: u64 = 4;

/// Inclusive nanosecond interval with `end_ns >= start_ns`.
///
/// Fields are read through accessors; [`TimeRange::new`] is the only public
/// constructor and enforces the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    pub(crate) start_ns: u64,
    pub(crate) end_ns: u64,
}

impl TimeRange {
    /// Checked constructor; rejects `end_ns < start_ns`.
    pub fn new(start_ns: u64, end_ns: u64) -> AtfResult<Self> {
        if end_ns < start_ns {
            return Err(AtfError::manifest(format!(
                "time range end {end_ns} precedes start {start_ns}"
            )));
        }
        Ok(Self { start_ns, end_ns })
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, timestamp_ns: u64) -> bool {
        self.start_ns <= timestamp_ns && timestamp_ns <= self.end_ns
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> u64 {
        self.end_ns
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Event category stored as a `u32` code in every index record.
///
/// The codes are part of the on-disk contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FunctionEnter,
    FunctionExit,
    MemoryAlloc,
    MemoryFree,
    Syscall,
    Exception,
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::FunctionEnter,
        EventType::FunctionExit,
        EventType::MemoryAlloc,
        EventType::MemoryFree,
        EventType::Syscall,
        EventType::Exception,
        EventType::Custom,
    ];

    /// On-disk code stored in index records.
    pub fn code(self) -> u32 {
        match self {
            EventType::FunctionEnter => 0,
            EventType::FunctionExit => 1,
            EventType::MemoryAlloc => 2,
            EventType::MemoryFree => 3,
            EventType::Syscall => 4,
            EventType::Exception => 5,
            EventType::Custom => 6,
        }
    }

    /// Inverse of [`code`](Self::code); `None` for unknown codes.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EventType::FunctionEnter),
            1 => Some(EventType::FunctionExit),
            2 => Some(EventType::MemoryAlloc),
            3 => Some(EventType::MemoryFree),
            4 => Some(EventType::Syscall),
            5 => Some(EventType::Exception),
            6 => Some(EventType::Custom),
            _ => None,
        }
    }

    /// Stable snake_case name, as used in detail payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::FunctionEnter => "function_enter",
            EventType::FunctionExit => "function_exit",
            EventType::MemoryAlloc => "memory_alloc",
            EventType::MemoryFree => "memory_free",
            EventType::Syscall => "syscall",
            EventType::Exception => "exception",
            EventType::Custom => "custom",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event_type| event_type.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded 32-byte index record.
///
/// Layout: `timestamp_ns:u64, thread_id:u32, function_id:u32,
/// event_type:u32, detail_offset:i64, flags:u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEvent {
    pub timestamp_ns: u64,
    pub thread_id: u32,
    pub function_id: u32,
    pub event_type: EventType,
    /// Absolute file offset of the detail record; non-positive means none.
    pub detail_offset: i64,
    pub flags: u32,
}

impl IndexEvent {
    /// Decode one record. `bytes` must be exactly [`INDEX_RECORD_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> AtfResult<Self> {
        if bytes.len() as u64 != INDEX_RECORD_SIZE {
            return Err(AtfError::decode(format!(
                "malformed index record: expected {INDEX_RECORD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let code = le_u32(bytes, 16);
        let event_type = EventType::from_code(code)
            .ok_or_else(|| AtfError::decode(format!("unknown event type code {code}")))?;

        Ok(Self {
            timestamp_ns: le_u64(bytes, 0),
            thread_id: le_u32(bytes, 8),
            function_id: le_u32(bytes, 12),
            event_type,
            detail_offset: le_u64(bytes, 20) as i64,
            flags: le_u32(bytes, 28),
        })
    }

    /// True when `detail_offset` points into the detail section.
    pub fn has_detail(&self) -> bool {
        self.detail_offset > 0
    }
}

/// Fully resolved detail record.
///
/// `index_event` is rebuilt from the payload's own copy of the index fields,
/// not from the index section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailEvent {
    pub index_event: IndexEvent,
    pub call_stack: Vec<u64>,
    pub arguments: Map<String, Value>,
    pub return_value: Option<Value>,
    pub metadata: Map<String, Value>,
}

// Callers check bounds before decoding; these never index past `bytes`.
pub(crate) fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
