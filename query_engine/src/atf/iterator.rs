// Lazy, filtered sequence over the fixed-size index records.

use std::collections::HashSet;

use super::error::{AtfError, AtfResult};
use super::memory_map::MemoryMap;
use super::types::{IndexEvent, TimeRange, INDEX_RECORD_SIZE};

/// Forward-only cursor over `[index_offset, index_offset + count * 32)`.
///
/// Each `next()` decodes one record and only then applies the filters, so a
/// corrupt record fails the scan even if it would have been filtered out.
/// After the first error the sequence ends. It holds mutable cursor state:
/// use one sequence per thread and ask the reader for a new one to rescan.
pub struct IndexEventIter<'a> {
    memory_map: &'a MemoryMap,
    index_offset: u64,
    count: u64,
    position: u64,
    time_range: Option<TimeRange>,
    thread_filter: Option<HashSet<u64>>,
}

impl<'a> IndexEventIter<'a> {
    /// An empty `thread_ids` slice applies no thread filter.
    pub fn new(
        memory_map: &'a MemoryMap,
        index_offset: u64,
        count: u64,
        time_range: Option<TimeRange>,
        thread_ids: Option<&[u64]>,
    ) -> Self {
        let thread_filter = thread_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.iter().copied().collect());

        Self {
            memory_map,
            index_offset,
            count,
            position: 0,
            time_range,
            thread_filter,
        }
    }

    fn matches(&self, event: &IndexEvent) -> bool {
        if let Some(range) = &self.time_range {
            if !range.contains(event.timestamp_ns) {
                return false;
            }
        }
        if let Some(threads) = &self.thread_filter {
            if !threads.contains(&u64::from(event.thread_id)) {
                return false;
            }
        }
        true
    }

    fn decode_at(&self, position: u64) -> AtfResult<IndexEvent> {
        let offset = position
            .checked_mul(INDEX_RECORD_SIZE)
            .and_then(|delta| delta.checked_add(self.index_offset))
            .ok_or_else(|| AtfError::mapping("index record offset overflows"))?;
        let record = self.memory_map.slice(offset, INDEX_RECORD_SIZE)?;
        IndexEvent::from_bytes(record).map_err(|err| match err {
            AtfError::Decode(message) => AtfError::decode(format!("{message} at offset {offset}")),
            other => other,
        })
    }
}

impl<'a> Iterator for IndexEventIter<'a> {
    type Item = AtfResult<IndexEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.count {
            let position = self.position;
            self.position += 1;

            match self.decode_at(position) {
                Ok(event) if self.matches(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(err) => {
                    self.position = self.count;
                    return Some(Err(err));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.position;
        let filtered = self.time_range.is_some() || self.thread_filter.is_some();
        let lower = if filtered { 0 } else { remaining };
        (
            usize::try_from(lower).unwrap_or(usize::MAX),
            usize::try_from(remaining).ok(),
        )
    }
}

impl<'a> std::iter::FusedIterator for IndexEventIter<'a> {}
