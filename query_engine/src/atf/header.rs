// Fixed 40-byte file header and section layout validation.

use super::error::{AtfError, AtfResult};
use super::types::{le_u16, le_u64, ATF_MAGIC, ATF_VERSION, HEADER_SIZE, INDEX_RECORD_SIZE};

/// Raw header fields as stored at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtfHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Reserved, not interpreted.
    pub flags: u16,
    pub manifest_length: u64,
    pub index_offset: u64,
    pub index_count: u64,
    pub detail_offset: u64,
}

/// Section boundaries derived from a validated header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionLayout {
    pub manifest_offset: u64,
    pub manifest_length: u64,
    pub index_offset: u64,
    pub index_count: u64,
    pub detail_offset: u64,
}

impl AtfHeader {
    pub fn from_bytes(bytes: &[u8]) -> AtfResult<Self> {
        if (bytes.len() as u64) < HEADER_SIZE {
            return Err(AtfError::header(format!(
                "ATF header is malformed: expected {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: le_u16(bytes, 4),
            flags: le_u16(bytes, 6),
            manifest_length: le_u64(bytes, 8),
            index_offset: le_u64(bytes, 16),
            index_count: le_u64(bytes, 24),
            detail_offset: le_u64(bytes, 32),
        })
    }

    /// Check the header against itself and the mapped file size.
    ///
    /// Sections must be laid out as header, manifest, index, then detail,
    /// with the index immediately after the manifest.
    pub fn validate(&self, file_size: u64) -> AtfResult<SectionLayout> {
        if self.magic != ATF_MAGIC {
            return Err(AtfError::header(format!(
                "ATF file magic does not match: expected {:?}, got {:?}",
                ATF_MAGIC, self.magic
            )));
        }
        if self.version != ATF_VERSION {
            return Err(AtfError::header(format!(
                "unsupported ATF version {}, expected {ATF_VERSION}",
                self.version
            )));
        }
        if self.manifest_length == 0 {
            return Err(AtfError::header("manifest length is zero"));
        }

        let expected_index_offset = HEADER_SIZE
            .checked_add(self.manifest_length)
            .ok_or_else(|| AtfError::header("manifest length overflows"))?;
        if self.index_offset != expected_index_offset {
            return Err(AtfError::header(format!(
                "index offset {} does not follow manifest (expected {expected_index_offset})",
                self.index_offset
            )));
        }

        let index_end = self
            .index_count
            .checked_mul(INDEX_RECORD_SIZE)
            .and_then(|length| length.checked_add(self.index_offset))
            .ok_or_else(|| AtfError::header("index section length overflows"))?;
        if self.detail_offset < index_end {
            return Err(AtfError::header(format!(
                "detail section at {} overlaps index section ending at {index_end}",
                self.detail_offset
            )));
        }
        if self.detail_offset > file_size {
            return Err(AtfError::header(format!(
                "detail section offset {} exceeds file size {file_size}",
                self.detail_offset
            )));
        }

        Ok(SectionLayout {
            manifest_offset: HEADER_SIZE,
            manifest_length: self.manifest_length,
            index_offset: self.index_offset,
            index_count: self.index_count,
            detail_offset: self.detail_offset,
        })
    }
}
