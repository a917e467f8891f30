//! Reader for the ADA Trace Format (ATF) single-file container.
//!
//! Layout: a 40-byte header, a JSON manifest, `index_count` fixed 32-byte
//! index records, then a detail section of length-prefixed JSON records
//! addressed by absolute offsets stored in the index.

pub mod detail;
pub mod error;
pub mod header;
pub mod iterator;
pub mod json;
pub mod manifest;
pub mod memory_map;
pub mod reader;
pub mod types;

pub use error::{AtfError, AtfErrorKind, AtfResult};
pub use header::{AtfHeader, SectionLayout};
pub use iterator::IndexEventIter;
pub use json::{json_backend, set_json_backend, JsonBackend};
pub use manifest::ManifestInfo;
pub use memory_map::MemoryMap;
pub use reader::AtfReader;
pub use types::{
    DetailEvent, EventType, IndexEvent, TimeRange, ATF_MAGIC, ATF_VERSION,
    DETAIL_LENGTH_PREFIX_SIZE, HEADER_SIZE, INDEX_RECORD_SIZE,
};
