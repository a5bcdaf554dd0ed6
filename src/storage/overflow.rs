// Overflow file: page-organized side store for variable-width payloads.
// Column slots keep a 16-byte descriptor; anything that does not fit inline
// lands here. A payload never spans pages, so the page size bounds the
// largest storable value.

use crate::buffer::BufferManager;
use crate::common::{PageIdx, DEFAULT_PAGE_SIZE, STRING_DESCRIPTOR_SIZE, STRING_INLINE_LENGTH};
use crate::error::{GraphError, Result};
use crate::storage::disk::FileHandle;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub struct OverflowFile {
    file: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
    /// Next free (page, offset) append position.
    cursor: Mutex<(PageIdx, usize)>,
}

impl OverflowFile {
    pub fn open(path: impl AsRef<Path>, buffer_manager: Arc<BufferManager>) -> Result<Self> {
        let file = Arc::new(FileHandle::open(path, DEFAULT_PAGE_SIZE)?);
        // Appends resume on a fresh page after reopen; earlier pages are
        // immutable anyway.
        let cursor = (file.num_pages(), 0);
        Ok(Self { file, buffer_manager, cursor: Mutex::new(cursor) })
    }

    /// Appends a payload and returns its (page, offset) location. Payloads
    /// larger than one overflow page are rejected; callers surface this as a
    /// value-too-large runtime error before any slot is modified.
    pub fn append(&self, bytes: &[u8]) -> Result<(u32, u32)> {
        if bytes.len() > DEFAULT_PAGE_SIZE {
            return Err(GraphError::Runtime(format!(
                "list overflow: value of {} bytes exceeds overflow page capacity of {} bytes",
                bytes.len(),
                DEFAULT_PAGE_SIZE
            )));
        }
        let mut cursor = self.cursor.lock();
        if cursor.1 + bytes.len() > DEFAULT_PAGE_SIZE {
            cursor.0 += 1;
            cursor.1 = 0;
        }
        let (page_idx, offset) = *cursor;
        let guard = self.buffer_manager.pin(&self.file, page_idx)?;
        guard.write(|data| data[offset..offset + bytes.len()].copy_from_slice(bytes));
        cursor.1 += bytes.len();
        Ok((page_idx as u32, offset as u32))
    }

    pub fn read(&self, page_idx: u32, offset: u32, len: usize) -> Result<Vec<u8>> {
        let guard = self.buffer_manager.pin(&self.file, page_idx as PageIdx)?;
        Ok(guard.read(|data| data[offset as usize..offset as usize + len].to_vec()))
    }
}

// ============================================================================
// Variable-width slot descriptors
// ============================================================================
//
// Slot layout (16 bytes):
//   bytes 0..4   payload length (LE u32)
//   bytes 4..16  payload, when length <= 12
//   bytes 4..8   4-byte prefix, when length > 12
//   bytes 8..12  overflow page index (LE u32)
//   bytes 12..16 offset within the overflow page (LE u32)

pub fn encode_var_slot(slot: &mut [u8], bytes: &[u8], overflow: &OverflowFile) -> Result<()> {
    debug_assert_eq!(slot.len(), STRING_DESCRIPTOR_SIZE);
    slot.fill(0);
    slot[0..4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
    if bytes.len() <= STRING_INLINE_LENGTH {
        slot[4..4 + bytes.len()].copy_from_slice(bytes);
        return Ok(());
    }
    // Long payload: write it out first so a failed append leaves the slot
    // untouched by the caller.
    let (page_idx, offset) = overflow.append(bytes)?;
    slot[4..8].copy_from_slice(&bytes[0..4]);
    slot[8..12].copy_from_slice(&page_idx.to_le_bytes());
    slot[12..16].copy_from_slice(&offset.to_le_bytes());
    Ok(())
}

pub fn decode_var_slot(slot: &[u8], overflow: &OverflowFile) -> Result<Vec<u8>> {
    debug_assert_eq!(slot.len(), STRING_DESCRIPTOR_SIZE);
    let len = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]) as usize;
    if len <= STRING_INLINE_LENGTH {
        return Ok(slot[4..4 + len].to_vec());
    }
    let page_idx = u32::from_le_bytes([slot[8], slot[9], slot[10], slot[11]]);
    let offset = u32::from_le_bytes([slot[12], slot[13], slot[14], slot[15]]);
    overflow.read(page_idx, offset, len)
}

/// Length/prefix fast reject for equality probes: a mismatch here means the
/// payloads cannot be equal, without touching the overflow file.
pub fn var_slot_maybe_equals(slot: &[u8], probe: &[u8]) -> bool {
    let len = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]) as usize;
    if len != probe.len() {
        return false;
    }
    if len <= STRING_INLINE_LENGTH {
        return &slot[4..4 + len] == probe;
    }
    slot[4..8] == probe[0..4]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LARGE_PAGE_SIZE;

    fn make_overflow() -> (tempfile::TempDir, OverflowFile) {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(
            64 * DEFAULT_PAGE_SIZE,
            4 * LARGE_PAGE_SIZE,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            false,
        ));
        let ovf = OverflowFile::open(dir.path().join("ovf.bin"), bm).unwrap();
        (dir, ovf)
    }

    #[test]
    fn short_payload_round_trips_inline() {
        let (_dir, ovf) = make_overflow();
        let mut slot = [0u8; STRING_DESCRIPTOR_SIZE];
        encode_var_slot(&mut slot, b"Alice", &ovf).unwrap();
        assert_eq!(decode_var_slot(&slot, &ovf).unwrap(), b"Alice");
        // Nothing was appended to the overflow file.
        assert_eq!(ovf.cursor.lock().1, 0);
    }

    #[test]
    fn long_payload_goes_through_overflow() {
        let (_dir, ovf) = make_overflow();
        let payload = b"a string that is definitely longer than twelve bytes";
        let mut slot = [0u8; STRING_DESCRIPTOR_SIZE];
        encode_var_slot(&mut slot, payload, &ovf).unwrap();
        assert_eq!(decode_var_slot(&slot, &ovf).unwrap(), payload);
        assert!(ovf.cursor.lock().1 > 0);
    }

    #[test]
    fn prefix_reject_without_overflow_access() {
        let (_dir, ovf) = make_overflow();
        let mut slot = [0u8; STRING_DESCRIPTOR_SIZE];
        encode_var_slot(&mut slot, b"abcdefghijklmnop", &ovf).unwrap();
        assert!(!var_slot_maybe_equals(&slot, b"abcdefghijklmnoX"));
        assert!(!var_slot_maybe_equals(&slot, b"Xbcdefghijklmnop"));
        assert!(var_slot_maybe_equals(&slot, b"abcdefghijklmnop"));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (_dir, ovf) = make_overflow();
        let huge = vec![b'x'; DEFAULT_PAGE_SIZE + 1];
        let mut slot = [0u8; STRING_DESCRIPTOR_SIZE];
        let err = encode_var_slot(&mut slot, &huge, &ovf).unwrap_err();
        assert!(matches!(err, GraphError::Runtime(_)));
    }
}
