// Read-only memory-mapped view over a trace file.
//
// Every access is bounds-checked against the mapped length: offsets handed to
// this type usually come from cross-references stored in the file itself.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use super::error::{AtfError, AtfResult};

/// Owns at most one open mapping. Borrowed slices keep `self` immutably
/// borrowed, so the mapping cannot be released while a view is alive.
#[derive(Debug, Default)]
pub struct MemoryMap {
    mmap: Option<Mmap>,
    file: Option<File>,
    path: Option<PathBuf>,
    size: u64,
}

impl MemoryMap {
    /// Unopened map; every read fails until [`open`](Self::open).
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `path` read-only, releasing any previous mapping first.
    pub fn open(&mut self, path: &Path) -> AtfResult<()> {
        self.close();

        let file = File::open(path).map_err(|err| AtfError::io(path, err))?;
        let metadata = file.metadata().map_err(|err| AtfError::io(path, err))?;
        let size = metadata.len();
        if size == 0 {
            return Err(AtfError::mapping(format!(
                "ATF file is empty: {}",
                path.display()
            )));
        }

        // SAFETY: the mapping is read-only and callers must not truncate the
        // file while it is open; all reads are bounds-checked against `size`.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|err| AtfError::io(path, err))?;

        debug!(path = %path.display(), size, "Mapped ATF file");

        self.size = mmap.len() as u64;
        self.mmap = Some(mmap);
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Release the mapping and file handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.mmap.take().is_some() {
            if let Some(path) = &self.path {
                debug!(path = %path.display(), "Unmapped ATF file");
            }
        }
        self.file = None;
        self.path = None;
        self.size = 0;
    }

    /// Whether a mapping is currently held.
    pub fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    /// Mapped length in bytes; 0 when closed.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backing file of the current mapping.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Owned copy of `[offset, offset + size)`.
    pub fn read(&self, offset: u64, size: u64) -> AtfResult<Vec<u8>> {
        self.slice(offset, size).map(<[u8]>::to_vec)
    }

    /// Zero-copy view of `[offset, offset + size)`.
    pub fn slice(&self, offset: u64, size: u64) -> AtfResult<&[u8]> {
        let mmap = self.mmap.as_ref().ok_or(AtfError::NotOpen("ATF file"))?;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| AtfError::mapping("requested range overflows"))?;
        if end > self.size {
            return Err(AtfError::mapping(format!(
                "range {offset}..{end} exceeds mapped file size {}",
                self.size
            )));
        }
        // `end <= self.size == mmap.len()`, so both bounds fit in usize.
        Ok(&mmap[offset as usize..end as usize])
    }
}
