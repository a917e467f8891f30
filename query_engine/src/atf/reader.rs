use std::path::Path;

use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    detail,
    error::{AtfError, AtfResult},
    header::{AtfHeader, SectionLayout},
    iterator::IndexEventIter,
    manifest::ManifestInfo,
    memory_map::MemoryMap,
    types::{DetailEvent, IndexEvent, TimeRange, HEADER_SIZE},
};

/// Read-only reader over one memory-mapped ATF file.
///
/// Sequences and slices borrow the reader, so the borrow checker keeps
/// [`close`](Self::close) from running while any of them is alive. The
/// reader itself may be shared across threads; give each thread its own
/// sequence.
#[derive(Debug, Default)]
pub struct AtfReader {
    memory_map: MemoryMap,
    state: Option<OpenState>,
}

#[derive(Debug)]
struct OpenState {
    layout: SectionLayout,
    manifest: ManifestInfo,
    metadata_cache: OnceCell<Map<String, Value>>,
}

impl AtfReader {
    /// Closed reader; call [`open`](Self::open) before querying.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader and open `path` in one step.
    pub fn open_path(path: impl AsRef<Path>) -> AtfResult<Self> {
        let mut reader = Self::new();
        reader.open(path)?;
        Ok(reader)
    }

    /// Map and validate `path`. Any previously open file is closed first; on
    /// failure the reader is left closed.
    pub fn open(&mut self, path: impl AsRef<Path>) -> AtfResult<()> {
        let path = path.as_ref();
        self.close();
        self.memory_map.open(path)?;

        match self.load() {
            Ok(state) => {
                debug!(
                    path = %path.display(),
                    file_size = self.memory_map.size(),
                    index_offset = state.layout.index_offset,
                    index_count = state.layout.index_count,
                    detail_offset = state.layout.detail_offset,
                    "Opened ATF trace",
                );
                self.state = Some(state);
                Ok(())
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Rejected ATF trace");
                self.memory_map.close();
                Err(err)
            }
        }
    }

    fn load(&self) -> AtfResult<OpenState> {
        let file_size = self.memory_map.size();
        let header_bytes = self.memory_map.slice(0, HEADER_SIZE.min(file_size))?;
        let layout = AtfHeader::from_bytes(header_bytes)?.validate(file_size)?;

        let manifest_bytes = self
            .memory_map
            .slice(layout.manifest_offset, layout.manifest_length)?;
        let mut manifest = ManifestInfo::from_bytes(manifest_bytes)?;
        if manifest.event_count == 0 {
            manifest = manifest.with_event_count(layout.index_count);
        }

        Ok(OpenState {
            layout,
            manifest,
            metadata_cache: OnceCell::new(),
        })
    }

    /// Release the mapping. Safe to call when already closed.
    pub fn close(&mut self) {
        self.state = None;
        self.memory_map.close();
    }

    /// Whether the last `open` succeeded and no `close` followed.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Path of the open trace.
    pub fn path(&self) -> Option<&Path> {
        self.memory_map.path()
    }

    fn state(&self) -> AtfResult<&OpenState> {
        self.state.as_ref().ok_or(AtfError::NotOpen("ATF reader"))
    }

    /// Validated section offsets from the header.
    pub fn layout(&self) -> AtfResult<SectionLayout> {
        Ok(self.state()?.layout)
    }

    /// Decoded manifest, with `event_count` filled from the header when absent.
    pub fn manifest(&self) -> AtfResult<&ManifestInfo> {
        Ok(&self.state()?.manifest)
    }

    /// Manifest metadata plus `path` and `event_count`, unless the manifest
    /// already defines those keys. Computed once per open.
    pub fn metadata(&self) -> AtfResult<Map<String, Value>> {
        let state = self.state()?;
        let merged = state.metadata_cache.get_or_init(|| {
            let mut merged = state.manifest.metadata.clone();
            if let Some(path) = self.memory_map.path() {
                merged
                    .entry("path")
                    .or_insert_with(|| Value::String(path.display().to_string()));
            }
            merged
                .entry("event_count")
                .or_insert_with(|| Value::from(state.layout.index_count));
            merged
        });
        Ok(merged.clone())
    }

    /// Time range declared by the manifest.
    pub fn time_range(&self) -> AtfResult<TimeRange> {
        Ok(self.state()?.manifest.time_range)
    }

    /// Sorted, duplicate-free thread ids declared by the manifest.
    pub fn thread_ids(&self) -> AtfResult<&[u64]> {
        Ok(&self.state()?.manifest.thread_ids)
    }

    /// Lazy scan of the index section in on-disk order. Records are kept
    /// when their timestamp lies in `time_range` (inclusive) and their thread
    /// is in `thread_ids`; `None` or an empty list disables that filter.
    pub fn read_index_events(
        &self,
        time_range: Option<TimeRange>,
        thread_ids: Option<&[u64]>,
    ) -> AtfResult<IndexEventIter<'_>> {
        let layout = self.state()?.layout;
        Ok(IndexEventIter::new(
            &self.memory_map,
            layout.index_offset,
            layout.index_count,
            time_range,
            thread_ids,
        ))
    }

    /// Resolve the detail record at absolute file `offset`.
    pub fn read_detail_event(&self, offset: i64) -> AtfResult<DetailEvent> {
        let layout = self.state()?.layout;
        detail::resolve(&self.memory_map, layout.detail_offset, offset)
    }

    /// Detail for `event`, or `None` when the record carries no pointer.
    pub fn read_detail_for(&self, event: &IndexEvent) -> AtfResult<Option<DetailEvent>> {
        self.state()?;
        if !event.has_detail() {
            return Ok(None);
        }
        self.read_detail_event(event.detail_offset).map(Some)
    }

    /// Header index count without a filter; otherwise a full filtered scan.
    pub fn estimate_event_count(&self, time_range: Option<TimeRange>) -> AtfResult<u64> {
        let layout = self.state()?.layout;
        if time_range.is_none() {
            return Ok(layout.index_count);
        }
        self.read_index_events(time_range, None)?
            .try_fold(0u64, |count, item| item.map(|_| count + 1))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::atf::error::AtfErrorKind;
    use crate::atf::types::{EventType, ATF_MAGIC, ATF_VERSION};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Header, manifest, `count` records of event type `code`, no detail.
    fn write_trace(manifest: &Value, timestamps: &[u64], code: u32) -> NamedTempFile {
        let manifest_bytes = serde_json::to_vec(manifest).unwrap();
        let index_offset = HEADER_SIZE + manifest_bytes.len() as u64;
        let detail_offset = index_offset + timestamps.len() as u64 * 32;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ATF_MAGIC);
        bytes.extend_from_slice(&ATF_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(manifest_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&index_offset.to_le_bytes());
        bytes.extend_from_slice(&(timestamps.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&detail_offset.to_le_bytes());
        bytes.extend_from_slice(&manifest_bytes);
        for timestamp in timestamps {
            bytes.extend_from_slice(&timestamp.to_le_bytes());
            bytes.extend_from_slice(&7u32.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&code.to_le_bytes());
            bytes.extend_from_slice(&0i64.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn sample_manifest() -> Value {
        json!({
            "metadata": {"process_name": "unit_tests"},
            "time_range": {"start_ns": 10, "end_ns": 40},
            "thread_ids": [7, 7, 8],
        })
    }

    #[test]
    fn atf_reader_queries__never_opened__then_not_open() {
        let reader = AtfReader::new();
        assert!(!reader.is_open());
        assert!(matches!(reader.metadata(), Err(AtfError::NotOpen(_))));
        assert!(matches!(reader.time_range(), Err(AtfError::NotOpen(_))));
        assert!(matches!(reader.thread_ids(), Err(AtfError::NotOpen(_))));
        assert!(matches!(reader.read_index_events(None, None), Err(AtfError::NotOpen(_))));
        assert!(matches!(reader.read_detail_event(64), Err(AtfError::NotOpen(_))));
        assert!(matches!(reader.estimate_event_count(None), Err(AtfError::NotOpen(_))));
    }

    #[test]
    fn atf_reader_open__missing_event_count__then_uses_index_count() {
        let file = write_trace(&sample_manifest(), &[10, 20, 30], 0);
        let reader = AtfReader::open_path(file.path()).unwrap();

        assert_eq!(reader.manifest().unwrap().event_count, 3);
        assert_eq!(reader.thread_ids().unwrap(), &[7, 8]);
        assert_eq!(reader.time_range().unwrap(), TimeRange { start_ns: 10, end_ns: 40 });
    }

    #[test]
    fn atf_reader_metadata__derived_keys__then_merged_with_set_default() {
        let mut manifest = sample_manifest();
        manifest["metadata"]["event_count"] = json!("declared");
        let file = write_trace(&manifest, &[10, 20], 0);
        let reader = AtfReader::open_path(file.path()).unwrap();

        let metadata = reader.metadata().unwrap();
        assert_eq!(metadata["process_name"], "unit_tests");
        assert_eq!(metadata["event_count"], "declared");
        assert_eq!(metadata["path"], json!(file.path().display().to_string()));
        assert_eq!(reader.metadata().unwrap(), metadata);
    }

    #[test]
    fn atf_reader_estimate_event_count__filters__then_counts_matches() {
        let file = write_trace(&sample_manifest(), &[10, 20, 30, 40], 4);
        let reader = AtfReader::open_path(file.path()).unwrap();

        assert_eq!(reader.estimate_event_count(None).unwrap(), 4);
        let range = TimeRange::new(15, 35).unwrap();
        assert_eq!(reader.estimate_event_count(Some(range)).unwrap(), 2);

        let first = reader.read_index_events(None, None).unwrap().next().unwrap().unwrap();
        assert_eq!(first.event_type, EventType::Syscall);
    }

    #[test]
    fn atf_reader_estimate_event_count__corrupt_record__then_decode_error() {
        let file = write_trace(&sample_manifest(), &[10, 20], 99);
        let reader = AtfReader::open_path(file.path()).unwrap();

        assert_eq!(reader.estimate_event_count(None).unwrap(), 2);
        let err = reader
            .estimate_event_count(Some(TimeRange::new(0, 100).unwrap()))
            .expect_err("expected error");
        assert_eq!(err.kind(), AtfErrorKind::Decode);
    }

    #[test]
    fn atf_reader_open__truncated_header__then_header_error_and_closed() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"ATF0\x01\x00").unwrap();
        file.flush().unwrap();

        let mut reader = AtfReader::new();
        let err = reader.open(file.path()).expect_err("expected error");
        assert_eq!(err.kind(), AtfErrorKind::Header);
        assert!(!reader.is_open());
        assert_eq!(reader.path(), None);
    }

    #[test]
    fn atf_reader_open__bad_manifest__then_manifest_error_and_closed() {
        let file = write_trace(&json!({"thread_ids": "oops"}), &[10], 0);
        let mut reader = AtfReader::new();
        let err = reader.open(file.path()).expect_err("expected error");
        assert_eq!(err.kind(), AtfErrorKind::Manifest);
        assert!(!reader.is_open());
        assert!(matches!(reader.thread_ids(), Err(AtfError::NotOpen(_))));
    }

    #[test]
    fn atf_reader_open__failed_reopen__then_previous_trace_released() {
        let good = write_trace(&sample_manifest(), &[10], 0);
        let bad = write_trace(&json!({"event_count": -1}), &[10], 0);

        let mut reader = AtfReader::open_path(good.path()).unwrap();
        assert!(reader.open(bad.path()).is_err());
        assert!(!reader.is_open());

        reader.open(good.path()).unwrap();
        assert_eq!(reader.estimate_event_count(None).unwrap(), 1);
    }

    #[test]
    fn atf_reader_read_detail_for__no_pointer__then_none() {
        let file = write_trace(&sample_manifest(), &[10], 0);
        let reader = AtfReader::open_path(file.path()).unwrap();
        let event = reader.read_index_events(None, None).unwrap().next().unwrap().unwrap();
        assert!(reader.read_detail_for(&event).unwrap().is_none());
    }

    #[test]
    fn atf_reader_close__twice__then_idempotent_and_not_open() {
        let file = write_trace(&sample_manifest(), &[10], 0);
        let mut reader = AtfReader::open_path(file.path()).unwrap();
        reader.close();
        reader.close();
        assert!(matches!(reader.layout(), Err(AtfError::NotOpen(_))));
    }
}
