// Adjacency storage. A (label, direction) with at most one neighbour per
// source is an `AdjColumn`: two plain columns holding the neighbour offset
// and the rel offset. The many-neighbour case is `AdjLists`: a CSR layout
// with a header per source and 16-byte (neighbour, rel) entries packed into
// large pages.

use crate::buffer::BufferManager;
use crate::common::{NodeOffset, PageIdx, RelOffset, LARGE_PAGE_SIZE};
use crate::error::{GraphError, Result};
use crate::storage::disk::FileHandle;
use std::path::Path;
use std::sync::Arc;

const HEADER_WIDTH: usize = 12; // start u64 + count u32
const ENTRY_WIDTH: usize = 16; // neighbour u64 + rel u64

fn headers_per_page() -> usize {
    LARGE_PAGE_SIZE / HEADER_WIDTH
}

fn entries_per_page() -> usize {
    LARGE_PAGE_SIZE / ENTRY_WIDTH
}

/// Shared scan position for a list being consumed in lockstep by several
/// readers (adjacency plus any co-scanned rel property lists).
#[derive(Debug, Clone, Default)]
pub struct ListSyncState {
    pub start: u64,
    pub size: u32,
    pub num_scanned: u32,
}

impl ListSyncState {
    pub fn reset(&mut self, start: u64, size: u32) {
        self.start = start;
        self.size = size;
        self.num_scanned = 0;
    }

    pub fn has_more(&self) -> bool {
        self.num_scanned < self.size
    }

    pub fn remaining(&self) -> u32 {
        self.size - self.num_scanned
    }
}

pub struct AdjLists {
    headers: Arc<FileHandle>,
    entries: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
}

impl AdjLists {
    pub fn open(
        path_prefix: impl AsRef<Path>,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        let prefix = path_prefix.as_ref();
        let mut hdr = prefix.as_os_str().to_owned();
        hdr.push(".hdr");
        let mut ent = prefix.as_os_str().to_owned();
        ent.push(".lst");
        Ok(Self {
            headers: Arc::new(FileHandle::open(hdr, LARGE_PAGE_SIZE)?),
            entries: Arc::new(FileHandle::open(ent, LARGE_PAGE_SIZE)?),
            buffer_manager,
        })
    }

    /// Bulk-writes the CSR image: one (start, count) header per source in
    /// order, then every list's entries back to back.
    pub fn build(&self, lists: &[Vec<(NodeOffset, RelOffset)>]) -> Result<()> {
        let mut next_entry = 0u64;
        for (src, list) in lists.iter().enumerate() {
            self.write_header(src as u64, next_entry, list.len() as u32)?;
            for (i, (nbr, rel)) in list.iter().enumerate() {
                self.write_entry(next_entry + i as u64, *nbr, *rel)?;
            }
            next_entry += list.len() as u64;
        }
        Ok(())
    }

    fn write_header(&self, src: NodeOffset, start: u64, count: u32) -> Result<()> {
        let page = src / headers_per_page() as u64;
        let pos = (src % headers_per_page() as u64) as usize * HEADER_WIDTH;
        let guard = self.buffer_manager.pin(&self.headers, page as PageIdx)?;
        guard.write(|data| {
            data[pos..pos + 8].copy_from_slice(&start.to_le_bytes());
            data[pos + 8..pos + 12].copy_from_slice(&count.to_le_bytes());
        });
        Ok(())
    }

    fn write_entry(&self, idx: u64, nbr: NodeOffset, rel: RelOffset) -> Result<()> {
        let page = idx / entries_per_page() as u64;
        let pos = (idx % entries_per_page() as u64) as usize * ENTRY_WIDTH;
        let guard = self.buffer_manager.pin(&self.entries, page as PageIdx)?;
        guard.write(|data| {
            data[pos..pos + 8].copy_from_slice(&nbr.to_le_bytes());
            data[pos + 8..pos + 16].copy_from_slice(&rel.to_le_bytes());
        });
        Ok(())
    }

    /// Positions `sync` at the start of `src`'s list.
    pub fn open_list(&self, src: NodeOffset, sync: &mut ListSyncState) -> Result<()> {
        let page = src / headers_per_page() as u64;
        let pos = (src % headers_per_page() as u64) as usize * HEADER_WIDTH;
        let guard = self.buffer_manager.pin(&self.headers, page as PageIdx)?;
        let (start, count) = guard.read(|data| {
            let start = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
            let count = u32::from_le_bytes(data[pos + 8..pos + 12].try_into().unwrap());
            (start, count)
        });
        sync.reset(start, count);
        Ok(())
    }

    /// Reads the next chunk of `sync`'s list, at most `max` entries, and
    /// advances the cursor. Returns the (neighbour, rel) pairs read.
    pub fn scan(
        &self,
        sync: &mut ListSyncState,
        max: usize,
    ) -> Result<Vec<(NodeOffset, RelOffset)>> {
        let n = (sync.remaining() as usize).min(max);
        let mut out = Vec::with_capacity(n);
        let mut idx = sync.start + sync.num_scanned as u64;
        let mut left = n;
        while left > 0 {
            let page = idx / entries_per_page() as u64;
            let pos_in_page = (idx % entries_per_page() as u64) as usize;
            let in_page = (entries_per_page() - pos_in_page).min(left);
            let guard = self.buffer_manager.pin(&self.entries, page as PageIdx)?;
            guard.read(|data| {
                for i in 0..in_page {
                    let pos = (pos_in_page + i) * ENTRY_WIDTH;
                    let nbr = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
                    let rel = u64::from_le_bytes(data[pos + 8..pos + 16].try_into().unwrap());
                    out.push((nbr, rel));
                }
            });
            idx += in_page as u64;
            left -= in_page;
        }
        sync.num_scanned += n as u32;
        Ok(out)
    }
}

/// Single-neighbour adjacency: a slot per source holding (neighbour, rel),
/// with a missing-edge bit. Packed like a 17-byte-wide column without the
/// overflow machinery.
pub struct AdjColumn {
    file: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
}

const ADJ_SLOT_WIDTH: usize = 17; // present u8 + neighbour u64 + rel u64

fn adj_slots_per_page() -> usize {
    LARGE_PAGE_SIZE / ADJ_SLOT_WIDTH
}

impl AdjColumn {
    pub fn open(path: impl AsRef<Path>, buffer_manager: Arc<BufferManager>) -> Result<Self> {
        Ok(Self {
            file: Arc::new(FileHandle::open(path, LARGE_PAGE_SIZE)?),
            buffer_manager,
        })
    }

    pub fn set(&self, src: NodeOffset, nbr: NodeOffset, rel: RelOffset) -> Result<()> {
        let page = src / adj_slots_per_page() as u64;
        let pos = (src % adj_slots_per_page() as u64) as usize * ADJ_SLOT_WIDTH;
        let guard = self.buffer_manager.pin(&self.file, page as PageIdx)?;
        let already = guard.read(|data| data[pos] != 0);
        if already {
            return Err(GraphError::Transaction(format!(
                "single-cardinality adjacency already has an edge for source {src}"
            )));
        }
        guard.write(|data| {
            data[pos] = 1;
            data[pos + 1..pos + 9].copy_from_slice(&nbr.to_le_bytes());
            data[pos + 9..pos + 17].copy_from_slice(&rel.to_le_bytes());
        });
        Ok(())
    }

    /// The neighbour of `src`, or `None` when no edge exists.
    pub fn neighbor(&self, src: NodeOffset) -> Result<Option<(NodeOffset, RelOffset)>> {
        let page = src / adj_slots_per_page() as u64;
        let pos = (src % adj_slots_per_page() as u64) as usize * ADJ_SLOT_WIDTH;
        let guard = self.buffer_manager.pin(&self.file, page as PageIdx)?;
        Ok(guard.read(|data| {
            if data[pos] == 0 {
                return None;
            }
            let nbr = u64::from_le_bytes(data[pos + 1..pos + 9].try_into().unwrap());
            let rel = u64::from_le_bytes(data[pos + 9..pos + 17].try_into().unwrap());
            Some((nbr, rel))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DEFAULT_PAGE_SIZE;

    fn make_bm() -> Arc<BufferManager> {
        Arc::new(BufferManager::new(
            64 * DEFAULT_PAGE_SIZE,
            8 * LARGE_PAGE_SIZE,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            false,
        ))
    }

    #[test]
    fn csr_build_and_chunked_scan() {
        let dir = tempfile::tempdir().unwrap();
        let lists = AdjLists::open(dir.path().join("knows_fwd"), make_bm()).unwrap();
        let image = vec![
            vec![(1, 0), (2, 1), (3, 2)],
            vec![],
            vec![(0, 3), (1, 4)],
        ];
        lists.build(&image).unwrap();

        let mut sync = ListSyncState::default();
        lists.open_list(0, &mut sync).unwrap();
        assert_eq!(sync.size, 3);
        let first = lists.scan(&mut sync, 2).unwrap();
        assert_eq!(first, vec![(1, 0), (2, 1)]);
        assert!(sync.has_more());
        let rest = lists.scan(&mut sync, 16).unwrap();
        assert_eq!(rest, vec![(3, 2)]);
        assert!(!sync.has_more());

        lists.open_list(1, &mut sync).unwrap();
        assert_eq!(sync.size, 0);
        assert!(!sync.has_more());
    }

    #[test]
    fn adj_column_single_neighbour() {
        let dir = tempfile::tempdir().unwrap();
        let col = AdjColumn::open(dir.path().join("works_fwd.adj"), make_bm()).unwrap();
        col.set(5, 11, 7).unwrap();
        assert_eq!(col.neighbor(5).unwrap(), Some((11, 7)));
        assert_eq!(col.neighbor(6).unwrap(), None);
        assert!(col.set(5, 12, 8).is_err());
    }
}
