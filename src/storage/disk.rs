// Page-granular file access. Every persistent structure owns a `FileHandle`
// and goes through the buffer manager for reads; writes come back down
// through `write_page` when frames are flushed.

use crate::common::PageIdx;
use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

pub struct FileHandle {
    file_id: u32,
    path: PathBuf,
    page_size: usize,
    file: Mutex<File>,
    num_pages: AtomicU64,
}

impl FileHandle {
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        let num_pages = len.div_ceil(page_size as u64);
        Ok(Self {
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            path,
            page_size,
            file: Mutex::new(file),
            num_pages: AtomicU64::new(num_pages),
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Reserves the next page index without touching the file; the page
    /// materializes on first flush.
    pub fn append_page(&self) -> PageIdx {
        self.num_pages.fetch_add(1, Ordering::AcqRel)
    }

    /// Reads one page into `buf`. Pages past the end of the file (or the
    /// written portion of it) read back as zeroes.
    pub fn read_page(&self, page_idx: PageIdx, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        buf.fill(0);
        let mut file = self.file.lock();
        let offset = page_idx * self.page_size as u64;
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(self.page_size);
        file.read_exact(&mut buf[..available])?;
        Ok(())
    }

    pub fn write_page(&self, page_idx: PageIdx, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_idx * self.page_size as u64))?;
        file.write_all(buf)?;
        self.num_pages.fetch_max(page_idx + 1, Ordering::AcqRel);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DEFAULT_PAGE_SIZE;

    #[test]
    fn unwritten_pages_read_as_zeroes() {
        let dir = tempfile::tempdir().unwrap();
        let handle = FileHandle::open(dir.path().join("col.bin"), DEFAULT_PAGE_SIZE).unwrap();
        let mut buf = vec![0xffu8; DEFAULT_PAGE_SIZE];
        handle.read_page(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn page_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = FileHandle::open(dir.path().join("col.bin"), DEFAULT_PAGE_SIZE).unwrap();
        let mut page = vec![0u8; DEFAULT_PAGE_SIZE];
        page[0] = 7;
        page[DEFAULT_PAGE_SIZE - 1] = 9;
        handle.write_page(2, &page).unwrap();
        let mut back = vec![0u8; DEFAULT_PAGE_SIZE];
        handle.read_page(2, &mut back).unwrap();
        assert_eq!(page, back);
        assert_eq!(handle.num_pages(), 3);
    }
}
