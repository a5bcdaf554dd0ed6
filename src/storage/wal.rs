// Write-ahead log of logical undo records. Each write operator appends the
// before-image of whatever it is about to touch; a failed statement replays
// the records in reverse and truncates the file, a committed one just
// truncates. Records carry a crc32 footer so a torn tail is detected and
// ignored at recovery.

use crate::common::{LabelId, NodeOffset, PropertyId, Value};
use crate::error::{GraphError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    /// A structured property slot is about to change.
    SetProperty {
        label: LabelId,
        property: PropertyId,
        offset: NodeOffset,
        before: Value,
    },
    /// A node was created at `offset`; undo rolls the watermark back and
    /// removes the key from the label's hash index.
    CreateNode {
        label: LabelId,
        offset: NodeOffset,
        key: Value,
    },
    /// A node is about to be deleted; undo clears the flag and restores the
    /// index entry.
    DeleteNode {
        label: LabelId,
        offset: NodeOffset,
        key: Value,
    },
}

pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
    records: Mutex<Vec<WalRecord>>,
}

impl WriteAheadLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { path, file: Mutex::new(file), records: Mutex::new(Vec::new()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: WalRecord) -> Result<()> {
        let payload = bincode::serde::encode_to_vec(&record, bincode::config::standard())?;
        let crc = crc32fast::hash(&payload);
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc.to_le_bytes())?;
        self.records.lock().push(record);
        Ok(())
    }

    /// Statement boundary: the log is only needed while a statement is in
    /// flight, so both outcomes end in truncation.
    pub fn truncate(&self) -> Result<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_data()?;
        self.records.lock().clear();
        Ok(())
    }

    /// In-memory records of the current statement, newest last.
    pub fn take_records(&self) -> Vec<WalRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Reads back every intact record in the file, stopping at the first
    /// torn or corrupt entry. Used once at database open.
    pub fn recover_records(&self) -> Result<Vec<WalRecord>> {
        let mut file = self.file.lock();
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;
        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos + 8 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            if pos + 4 + len + 4 > bytes.len() {
                break;
            }
            let payload = &bytes[pos + 4..pos + 4 + len];
            let crc = u32::from_le_bytes(bytes[pos + 4 + len..pos + 8 + len].try_into().unwrap());
            if crc32fast::hash(payload) != crc {
                tracing::warn!("discarding torn WAL tail at byte {pos}");
                break;
            }
            let (record, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| GraphError::Serialization(e.to_string()))?;
            records.push(record);
            pos += 8 + len;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_recover_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("graphite.wal")).unwrap();
        wal.append(WalRecord::SetProperty {
            label: 0,
            property: 2,
            offset: 7,
            before: Value::Int64(35),
        })
        .unwrap();
        wal.append(WalRecord::CreateNode { label: 1, offset: 4, key: Value::Int64(33) }).unwrap();

        let recovered = wal.recover_records().unwrap();
        assert_eq!(recovered.len(), 2);
        assert!(matches!(recovered[0], WalRecord::SetProperty { offset: 7, .. }));

        wal.truncate().unwrap();
        assert!(wal.recover_records().unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphite.wal");
        {
            let wal = WriteAheadLog::open(&path).unwrap();
            wal.append(WalRecord::DeleteNode { label: 0, offset: 1, key: Value::Int64(9) })
                .unwrap();
        }
        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0x00, 0x00, 0x00, 0xde, 0xad]).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&path).unwrap();
        assert_eq!(wal.recover_records().unwrap().len(), 1);
    }
}
