use crate::common::PageIdx;
use crate::error::{GraphError, Result};
use crate::storage::disk::FileHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of page-table partitions. Keys are spread across partitions to
/// keep pin-time lock contention low.
const PAGE_TABLE_PARTITIONS: usize = 16;

type PageKey = (u32, PageIdx);

// ============================================================================
// Page table - partitioned hash map
// ============================================================================

struct PageTable {
    partitions: Vec<RwLock<HashMap<PageKey, usize>>>,
}

impl PageTable {
    fn new() -> Self {
        let mut partitions = Vec::with_capacity(PAGE_TABLE_PARTITIONS);
        for _ in 0..PAGE_TABLE_PARTITIONS {
            partitions.push(RwLock::new(HashMap::new()));
        }
        Self { partitions }
    }

    #[inline]
    fn partition(&self, key: &PageKey) -> &RwLock<HashMap<PageKey, usize>> {
        let h = (key.0 as u64 ^ key.1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        &self.partitions[h as usize % PAGE_TABLE_PARTITIONS]
    }

    #[inline]
    fn lookup(&self, key: &PageKey) -> Option<usize> {
        self.partition(key).read().get(key).copied()
    }

    fn insert(&self, key: PageKey, frame_idx: usize) {
        self.partition(&key).write().insert(key, frame_idx);
    }

    fn remove(&self, key: &PageKey) {
        self.partition(key).write().remove(key);
    }

    fn clear(&self) {
        for p in &self.partitions {
            p.write().clear();
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

struct Frame {
    data: RwLock<Box<[u8]>>,
    /// Which page currently occupies this frame, if any.
    page: Mutex<Option<PageKey>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    ref_bit: AtomicBool,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
            page: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            ref_bit: AtomicBool::new(false),
        }
    }
}

/// A pinned page. The frame stays in the pool until the guard drops.
pub struct FrameGuard<'a> {
    pool: &'a BufferPool,
    frame: Arc<Frame>,
}

impl std::fmt::Debug for FrameGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard").finish_non_exhaustive()
    }
}

impl FrameGuard<'_> {
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.frame.data.read())
    }

    /// Mutates the page contents and marks the frame dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let r = f(&mut self.frame.data.write());
        self.frame.dirty.store(true, Ordering::Release);
        r
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frame.pin_count.fetch_sub(1, Ordering::AcqRel);
        let _ = self.pool;
    }
}

// ============================================================================
// Buffer pool
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    pub num_frames: usize,
    pub pins: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct BufferPool {
    page_size: usize,
    frames: RwLock<Vec<Arc<Frame>>>,
    page_table: PageTable,
    /// Registry of files seen by this pool, for flushing victim frames.
    files: RwLock<HashMap<u32, Arc<FileHandle>>>,
    /// Serializes the miss path (victim selection and page load).
    eviction_lock: Mutex<()>,
    clock_hand: AtomicUsize,
    in_memory_mode: bool,
    pins: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BufferPool {
    fn new(num_frames: usize, page_size: usize, in_memory_mode: bool) -> Self {
        let frames = (0..num_frames).map(|_| Arc::new(Frame::new(page_size))).collect();
        Self {
            page_size,
            frames: RwLock::new(frames),
            page_table: PageTable::new(),
            files: RwLock::new(HashMap::new()),
            eviction_lock: Mutex::new(()),
            clock_hand: AtomicUsize::new(0),
            in_memory_mode,
            pins: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn register_file(&self, file: &Arc<FileHandle>) {
        let mut files = self.files.write();
        files.entry(file.file_id()).or_insert_with(|| Arc::clone(file));
    }

    fn pin(&self, file: &Arc<FileHandle>, page_idx: PageIdx) -> Result<FrameGuard<'_>> {
        self.register_file(file);
        self.pins.fetch_add(1, Ordering::Relaxed);
        let key = (file.file_id(), page_idx);
        loop {
            if let Some(guard) = self.try_pin_existing(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(guard);
            }
            // Miss path, serialized so only one loader faults the page in.
            let _evict = self.eviction_lock.lock();
            if let Some(guard) = self.try_pin_existing(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(guard);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            let (frame_idx, frame) = self.find_victim()?;
            {
                let mut page = frame.page.lock();
                if let Some(old_key) = page.take() {
                    self.page_table.remove(&old_key);
                    self.flush_frame(&frame, &old_key)?;
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                file.read_page(page_idx, &mut frame.data.write())?;
                *page = Some(key);
            }
            frame.ref_bit.store(true, Ordering::Release);
            self.page_table.insert(key, frame_idx);
            return Ok(FrameGuard { pool: self, frame });
        }
    }

    /// Pins the frame currently holding `key`, if any. Re-checks the frame's
    /// identity after pinning since a concurrent eviction may have raced us.
    fn try_pin_existing(&self, key: &PageKey) -> Option<FrameGuard<'_>> {
        let frame_idx = self.page_table.lookup(key)?;
        let frame = {
            let frames = self.frames.read();
            Arc::clone(frames.get(frame_idx)?)
        };
        frame.pin_count.fetch_add(1, Ordering::AcqRel);
        if *frame.page.lock() != Some(*key) {
            frame.pin_count.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        frame.ref_bit.store(true, Ordering::Release);
        Some(FrameGuard { pool: self, frame })
    }

    /// Clock sweep. Returns an unpinned frame with its pin count already
    /// raised to one so nobody else can claim it.
    fn find_victim(&self) -> Result<(usize, Arc<Frame>)> {
        let frames = self.frames.read();
        if frames.is_empty() {
            return Err(GraphError::Buffer("buffer pool has no frames".to_string()));
        }
        let len = frames.len();
        for _ in 0..2 * len {
            let idx = self.clock_hand.fetch_add(1, Ordering::Relaxed) % len;
            let frame = &frames[idx];
            if frame.pin_count.load(Ordering::Acquire) != 0 {
                continue;
            }
            let occupied = frame.page.lock().is_some();
            if self.in_memory_mode && occupied {
                // In-memory mode keeps every loaded page resident.
                continue;
            }
            if occupied && frame.ref_bit.swap(false, Ordering::AcqRel) {
                continue;
            }
            if frame
                .pin_count
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok((idx, Arc::clone(frame)));
            }
        }
        if self.in_memory_mode {
            // Grow instead of evicting; every page stays pinned in memory.
            drop(frames);
            let mut frames = self.frames.write();
            let frame = Arc::new(Frame::new(self.page_size));
            frame.pin_count.store(1, Ordering::Release);
            frames.push(Arc::clone(&frame));
            return Ok((frames.len() - 1, frame));
        }
        Err(GraphError::Buffer("buffer pool exhausted: all frames pinned".to_string()))
    }

    fn flush_frame(&self, frame: &Frame, key: &PageKey) -> Result<()> {
        if !frame.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let file = self
            .files
            .read()
            .get(&key.0)
            .cloned()
            .ok_or_else(|| GraphError::Buffer(format!("no file registered for id {}", key.0)))?;
        file.write_page(key.1, &frame.data.read())
    }

    fn flush_all(&self) -> Result<()> {
        let frames = self.frames.read();
        for frame in frames.iter() {
            let page = frame.page.lock();
            if let Some(key) = page.as_ref() {
                self.flush_frame(frame, key)?;
            }
        }
        Ok(())
    }

    /// Changes the pool capacity. Dirty unpinned frames are flushed before
    /// being dropped; pinned frames always survive. Fails if pinned frames
    /// alone exceed the new capacity.
    fn resize(&self, new_num_frames: usize) -> Result<()> {
        let _evict = self.eviction_lock.lock();
        let mut frames = self.frames.write();
        if new_num_frames >= frames.len() {
            while frames.len() < new_num_frames {
                frames.push(Arc::new(Frame::new(self.page_size)));
            }
            return Ok(());
        }
        let pinned = frames
            .iter()
            .filter(|f| f.pin_count.load(Ordering::Acquire) != 0)
            .count();
        if pinned > new_num_frames {
            return Err(GraphError::Buffer(format!(
                "cannot shrink pool to {new_num_frames} frames: {pinned} frames are pinned"
            )));
        }
        let old = std::mem::take(&mut *frames);
        let mut kept = Vec::with_capacity(new_num_frames);
        let mut unpinned = Vec::new();
        for frame in old {
            if frame.pin_count.load(Ordering::Acquire) != 0 {
                kept.push(frame);
            } else {
                unpinned.push(frame);
            }
        }
        for frame in unpinned {
            if kept.len() < new_num_frames && frame.page.lock().is_some() {
                kept.push(frame);
            } else {
                let page = frame.page.lock();
                if let Some(key) = page.as_ref() {
                    self.flush_frame(&frame, key)?;
                }
            }
        }
        while kept.len() < new_num_frames {
            kept.push(Arc::new(Frame::new(self.page_size)));
        }
        // Frame indices changed wholesale; rebuild the table.
        self.page_table.clear();
        for (idx, frame) in kept.iter().enumerate() {
            if let Some(key) = frame.page.lock().as_ref() {
                self.page_table.insert(*key, idx);
            }
        }
        *frames = kept;
        self.clock_hand.store(0, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            num_frames: self.frames.read().len(),
            pins: self.pins.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Buffer manager - two pools
// ============================================================================

pub struct BufferManager {
    default_pool: BufferPool,
    large_pool: BufferPool,
    default_page_size: usize,
}

impl BufferManager {
    /// `default_pool_size` / `large_pool_size` are byte budgets; each pool
    /// gets `budget / page_size` frames.
    pub fn new(
        default_pool_size: usize,
        large_pool_size: usize,
        default_page_size: usize,
        large_page_size: usize,
        in_memory_mode: bool,
    ) -> Self {
        tracing::debug!(
            default_pool_size,
            large_pool_size,
            in_memory_mode,
            "initializing buffer manager"
        );
        Self {
            default_pool: BufferPool::new(
                (default_pool_size / default_page_size).max(1),
                default_page_size,
                in_memory_mode,
            ),
            large_pool: BufferPool::new(
                (large_pool_size / large_page_size).max(1),
                large_page_size,
                in_memory_mode,
            ),
            default_page_size,
        }
    }

    fn pool_for(&self, file: &FileHandle) -> &BufferPool {
        if file.page_size() == self.default_page_size {
            &self.default_pool
        } else {
            &self.large_pool
        }
    }

    pub fn pin(&self, file: &Arc<FileHandle>, page_idx: PageIdx) -> Result<FrameGuard<'_>> {
        self.pool_for(file).pin(file, page_idx)
    }

    pub fn flush_all(&self) -> Result<()> {
        self.default_pool.flush_all()?;
        self.large_pool.flush_all()
    }

    /// Retunes both pool capacities at runtime.
    pub fn resize(&self, default_pool_size: usize, large_pool_size: usize) -> Result<()> {
        self.default_pool
            .resize((default_pool_size / self.default_pool.page_size).max(1))?;
        self.large_pool
            .resize((large_pool_size / self.large_pool.page_size).max(1))
    }

    pub fn default_pool_stats(&self) -> BufferPoolStats {
        self.default_pool.stats()
    }

    pub fn large_pool_stats(&self) -> BufferPoolStats {
        self.large_pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DEFAULT_PAGE_SIZE;

    fn make_pool_and_file(frames: usize) -> (tempfile::TempDir, BufferManager, Arc<FileHandle>) {
        let dir = tempfile::tempdir().unwrap();
        let bm = BufferManager::new(
            frames * DEFAULT_PAGE_SIZE,
            DEFAULT_PAGE_SIZE * 4,
            DEFAULT_PAGE_SIZE,
            DEFAULT_PAGE_SIZE * 4,
            false,
        );
        let file = Arc::new(FileHandle::open(dir.path().join("data.bin"), DEFAULT_PAGE_SIZE).unwrap());
        (dir, bm, file)
    }

    #[test]
    fn pin_write_evict_read_back() {
        let (_dir, bm, file) = make_pool_and_file(2);
        {
            let guard = bm.pin(&file, 0).unwrap();
            guard.write(|data| data[17] = 0xAB);
        }
        // Force page 0 out by cycling other pages through the two frames.
        for p in 1..6 {
            let _ = bm.pin(&file, p).unwrap();
        }
        let guard = bm.pin(&file, 0).unwrap();
        assert_eq!(guard.read(|data| data[17]), 0xAB);
    }

    #[test]
    fn exhaustion_when_all_frames_pinned() {
        let (_dir, bm, file) = make_pool_and_file(2);
        let _g0 = bm.pin(&file, 0).unwrap();
        let _g1 = bm.pin(&file, 1).unwrap();
        let err = bm.pin(&file, 2).unwrap_err();
        assert!(matches!(err, GraphError::Buffer(_)));
    }

    #[test]
    fn resize_preserves_dirty_unpinned_pages() {
        let (_dir, bm, file) = make_pool_and_file(4);
        {
            let guard = bm.pin(&file, 2).unwrap();
            guard.write(|data| data[0] = 0x5C);
        }
        bm.resize(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE * 4).unwrap();
        let guard = bm.pin(&file, 2).unwrap();
        assert_eq!(guard.read(|data| data[0]), 0x5C);
    }

    #[test]
    fn resize_refuses_to_discard_pinned_frames() {
        let (_dir, bm, file) = make_pool_and_file(4);
        let _g0 = bm.pin(&file, 0).unwrap();
        let _g1 = bm.pin(&file, 1).unwrap();
        let err = bm.resize(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_SIZE * 4).unwrap_err();
        assert!(matches!(err, GraphError::Buffer(_)));
    }
}
