use crate::buffer::BufferManager;
use crate::common::{LogicalType, NodeOffset, Value};
use crate::error::{GraphError, Result};
use crate::index::utils::{index_functions_for, shard_for_hash, IndexFunctions, NUM_HASH_SHARDS};
use crate::storage::overflow::OverflowFile;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Entry layout: [state u8][hash u64][key bytes][offset u64].
const STATE_EMPTY: u8 = 0;
const STATE_OCCUPIED: u8 = 1;
const STATE_TOMBSTONE: u8 = 2;

const INITIAL_SHARD_CAPACITY: usize = 64;
const MAX_LOAD_NUMERATOR: usize = 7; // resize beyond 7/10 load

struct Shard {
    slots: Vec<u8>,
    capacity: usize,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedShard {
    slots: Vec<u8>,
    capacity: usize,
    count: usize,
}

impl Shard {
    fn new(capacity: usize, entry_width: usize) -> Self {
        Self { slots: vec![0u8; capacity * entry_width], capacity, count: 0 }
    }

    #[inline]
    fn entry(&self, idx: usize, entry_width: usize) -> &[u8] {
        &self.slots[idx * entry_width..(idx + 1) * entry_width]
    }

    #[inline]
    fn entry_mut(&mut self, idx: usize, entry_width: usize) -> &mut [u8] {
        &mut self.slots[idx * entry_width..(idx + 1) * entry_width]
    }
}

/// One label's primary-key index: 256 shards of open-addressed entries,
/// with an overflow file for out-of-line string keys.
pub struct HashIndex {
    path: PathBuf,
    key_type: LogicalType,
    funcs: IndexFunctions,
    entry_width: usize,
    shards: Vec<RwLock<Shard>>,
    overflow: OverflowFile,
    dirty: AtomicBool,
}

impl HashIndex {
    pub fn open(
        path: impl AsRef<Path>,
        key_type: LogicalType,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let funcs = index_functions_for(&key_type)?;
        let entry_width = 1 + 8 + funcs.key_width + 8;
        let mut ovf_path = path.as_os_str().to_owned();
        ovf_path.push(".ovf");
        let overflow = OverflowFile::open(ovf_path, buffer_manager)?;
        let shards = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let (persisted, _): (Vec<PersistedShard>, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
            if persisted.len() != NUM_HASH_SHARDS {
                return Err(GraphError::Serialization(format!(
                    "hash index {} has {} shards, expected {NUM_HASH_SHARDS}",
                    path.display(),
                    persisted.len()
                )));
            }
            persisted
                .into_iter()
                .map(|p| RwLock::new(Shard { slots: p.slots, capacity: p.capacity, count: p.count }))
                .collect()
        } else {
            (0..NUM_HASH_SHARDS)
                .map(|_| RwLock::new(Shard::new(INITIAL_SHARD_CAPACITY, entry_width)))
                .collect()
        };
        Ok(Self { path, key_type, funcs, entry_width, shards, overflow, dirty: AtomicBool::new(false) })
    }

    pub fn key_type(&self) -> &LogicalType {
        &self.key_type
    }

    pub fn lookup(&self, key: &Value) -> Result<Option<NodeOffset>> {
        let hash = (self.funcs.hash)(key)?;
        let shard = self.shards[shard_for_hash(hash)].read();
        let mut idx = (hash as usize) & (shard.capacity - 1);
        loop {
            let entry = shard.entry(idx, self.entry_width);
            match entry[0] {
                STATE_EMPTY => return Ok(None),
                STATE_OCCUPIED => {
                    let stored_hash = u64::from_le_bytes(entry[1..9].try_into().unwrap());
                    if stored_hash == hash
                        && (self.funcs.equals)(key, &entry[9..9 + self.funcs.key_width], &self.overflow)?
                    {
                        let off_start = 9 + self.funcs.key_width;
                        return Ok(Some(u64::from_le_bytes(
                            entry[off_start..off_start + 8].try_into().unwrap(),
                        )));
                    }
                }
                _ => {}
            }
            idx = (idx + 1) & (shard.capacity - 1);
        }
    }

    pub fn insert(&self, key: &Value, offset: NodeOffset) -> Result<()> {
        if self.lookup(key)?.is_some() {
            return Err(GraphError::Runtime(format!("duplicate primary key: {key}")));
        }
        let hash = (self.funcs.hash)(key)?;
        let shard_idx = shard_for_hash(hash);
        let mut shard = self.shards[shard_idx].write();
        if (shard.count + 1) * 10 > shard.capacity * MAX_LOAD_NUMERATOR {
            self.grow(&mut shard)?;
        }
        self.insert_into(&mut shard, hash, key, offset)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn insert_into(
        &self,
        shard: &mut Shard,
        hash: u64,
        key: &Value,
        offset: NodeOffset,
    ) -> Result<()> {
        let mut idx = (hash as usize) & (shard.capacity - 1);
        loop {
            let state = shard.entry(idx, self.entry_width)[0];
            if state != STATE_OCCUPIED {
                let key_width = self.funcs.key_width;
                let mut key_bytes = vec![0u8; key_width];
                (self.funcs.insert)(key, &mut key_bytes, &self.overflow)?;
                let entry = shard.entry_mut(idx, self.entry_width);
                entry[0] = STATE_OCCUPIED;
                entry[1..9].copy_from_slice(&hash.to_le_bytes());
                entry[9..9 + key_width].copy_from_slice(&key_bytes);
                entry[9 + key_width..9 + key_width + 8].copy_from_slice(&offset.to_le_bytes());
                shard.count += 1;
                return Ok(());
            }
            idx = (idx + 1) & (shard.capacity - 1);
        }
    }

    /// Doubles a shard, re-slotting entries by their stored hashes. Key
    /// bytes move verbatim, so overflow references stay valid.
    fn grow(&self, shard: &mut Shard) -> Result<()> {
        let new_capacity = shard.capacity * 2;
        let old = std::mem::replace(shard, Shard::new(new_capacity, self.entry_width));
        for idx in 0..old.capacity {
            let entry = old.entry(idx, self.entry_width);
            if entry[0] != STATE_OCCUPIED {
                continue;
            }
            let hash = u64::from_le_bytes(entry[1..9].try_into().unwrap());
            let mut new_idx = (hash as usize) & (shard.capacity - 1);
            while shard.entry(new_idx, self.entry_width)[0] == STATE_OCCUPIED {
                new_idx = (new_idx + 1) & (shard.capacity - 1);
            }
            shard
                .entry_mut(new_idx, self.entry_width)
                .copy_from_slice(entry);
            shard.count += 1;
        }
        Ok(())
    }

    pub fn delete(&self, key: &Value) -> Result<bool> {
        let hash = (self.funcs.hash)(key)?;
        let mut shard = self.shards[shard_for_hash(hash)].write();
        let mut idx = (hash as usize) & (shard.capacity - 1);
        loop {
            let entry = shard.entry(idx, self.entry_width);
            match entry[0] {
                STATE_EMPTY => return Ok(false),
                STATE_OCCUPIED => {
                    let stored_hash = u64::from_le_bytes(entry[1..9].try_into().unwrap());
                    if stored_hash == hash
                        && (self.funcs.equals)(key, &entry[9..9 + self.funcs.key_width], &self.overflow)?
                    {
                        shard.entry_mut(idx, self.entry_width)[0] = STATE_TOMBSTONE;
                        shard.count -= 1;
                        self.dirty.store(true, Ordering::Release);
                        return Ok(true);
                    }
                }
                _ => {}
            }
            idx = (idx + 1) & (shard.capacity - 1);
        }
    }

    pub fn save(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let persisted: Vec<PersistedShard> = self
            .shards
            .iter()
            .map(|s| {
                let s = s.read();
                PersistedShard { slots: s.slots.clone(), capacity: s.capacity, count: s.count }
            })
            .collect();
        let bytes = bincode::serde::encode_to_vec(&persisted, bincode::config::standard())?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DEFAULT_PAGE_SIZE, LARGE_PAGE_SIZE};

    fn make_bm() -> Arc<BufferManager> {
        Arc::new(BufferManager::new(
            128 * DEFAULT_PAGE_SIZE,
            4 * LARGE_PAGE_SIZE,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            false,
        ))
    }

    #[test]
    fn insert_lookup_delete_int64() {
        let dir = tempfile::tempdir().unwrap();
        let index =
            HashIndex::open(dir.path().join("p.hidx"), LogicalType::Int64, make_bm()).unwrap();
        for i in 0..500i64 {
            index.insert(&Value::Int64(i * 7), i as u64).unwrap();
        }
        assert_eq!(index.lookup(&Value::Int64(7 * 123)).unwrap(), Some(123));
        assert_eq!(index.lookup(&Value::Int64(5)).unwrap(), None);
        assert!(index.delete(&Value::Int64(7 * 123)).unwrap());
        assert_eq!(index.lookup(&Value::Int64(7 * 123)).unwrap(), None);
        // Duplicate keys are rejected.
        assert!(index.insert(&Value::Int64(0), 999).is_err());
    }

    #[test]
    fn string_keys_survive_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let bm = make_bm();
        let path = dir.path().join("s.hidx");
        {
            let index =
                HashIndex::open(&path, LogicalType::String, Arc::clone(&bm)).unwrap();
            index.insert(&Value::String("Alice".to_string()), 0).unwrap();
            index
                .insert(&Value::String("a-name-exceeding-the-inline-limit".to_string()), 1)
                .unwrap();
            index.save().unwrap();
            bm.flush_all().unwrap();
        }
        let index = HashIndex::open(&path, LogicalType::String, bm).unwrap();
        assert_eq!(index.lookup(&Value::String("Alice".to_string())).unwrap(), Some(0));
        assert_eq!(
            index
                .lookup(&Value::String("a-name-exceeding-the-inline-limit".to_string()))
                .unwrap(),
            Some(1)
        );
        assert_eq!(index.lookup(&Value::String("Bob".to_string())).unwrap(), None);
    }
}
