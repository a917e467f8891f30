//! Process-wide JSON decoding for manifest and detail payloads.
//!
//! Both backends produce a [`serde_json::Value`] and report failures as a
//! [`JsonError`]; callers decide which error category a failure belongs to.

use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonBackend {
    SerdeJson,
    /// Requires the `simd-json` cargo feature.
    SimdJson,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct JsonError(String);

const SERDE_JSON: u8 = 0;
const SIMD_JSON: u8 = 1;

static SELECTED: AtomicU8 = AtomicU8::new(JsonBackend::preferred().tag());

impl JsonBackend {
    /// SIMD decoding when compiled in, `serde_json` otherwise.
    pub const fn preferred() -> Self {
        if cfg!(feature = "simd-json") {
            JsonBackend::SimdJson
        } else {
            JsonBackend::SerdeJson
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            JsonBackend::SerdeJson => true,
            JsonBackend::SimdJson => cfg!(feature = "simd-json"),
        }
    }

    const fn tag(self) -> u8 {
        match self {
            JsonBackend::SerdeJson => SERDE_JSON,
            JsonBackend::SimdJson => SIMD_JSON,
        }
    }

    fn from_tag(tag: u8) -> Self {
        if tag == SIMD_JSON {
            JsonBackend::SimdJson
        } else {
            JsonBackend::SerdeJson
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<Value, JsonError> {
        match self {
            JsonBackend::SerdeJson => decode_serde(payload),
            JsonBackend::SimdJson => decode_simd(payload),
        }
    }
}

/// Backend currently used by the reader.
pub fn json_backend() -> JsonBackend {
    JsonBackend::from_tag(SELECTED.load(Ordering::Relaxed))
}

/// Install `backend` for the whole process and return the backend in effect.
///
/// An unavailable backend falls back to `serde_json`.
pub fn set_json_backend(backend: JsonBackend) -> JsonBackend {
    let effective = if backend.is_available() {
        backend
    } else {
        JsonBackend::SerdeJson
    };
    SELECTED.store(effective.tag(), Ordering::Relaxed);
    debug!(requested = ?backend, effective = ?effective, "Selected JSON backend");
    effective
}

/// Decode with the process-wide backend.
pub fn decode(payload: &[u8]) -> Result<Value, JsonError> {
    json_backend().decode(payload)
}

fn decode_serde(payload: &[u8]) -> Result<Value, JsonError> {
    serde_json::from_slice(payload).map_err(|err| JsonError(err.to_string()))
}

#[cfg(feature = "simd-json")]
fn decode_simd(payload: &[u8]) -> Result<Value, JsonError> {
    // simd-json parses in place, so the mapped bytes are copied once here.
    let mut scratch = payload.to_vec();
    simd_json::serde::from_slice(&mut scratch).map_err(|err| JsonError(err.to_string()))
}

#[cfg(not(feature = "simd-json"))]
fn decode_simd(payload: &[u8]) -> Result<Value, JsonError> {
    decode_serde(payload)
}
