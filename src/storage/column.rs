// Typed on-disk columns. A column maps a node or rel offset to a
// fixed-width slot; each page leads with a null bitmap for the elements it
// holds. Variable-width types keep a 16-byte descriptor in the slot and put
// the payload in a sibling overflow file.

use crate::buffer::BufferManager;
use crate::common::{
    IntervalValue, LogicalType, NodeOffset, Value, DEFAULT_PAGE_SIZE,
};
use crate::error::{GraphError, Result};
use crate::storage::disk::FileHandle;
use crate::storage::overflow::{decode_var_slot, encode_var_slot, OverflowFile};
use chrono::Datelike;
use std::path::Path;
use std::sync::Arc;

/// Number of elements per page for a given slot width, leaving room for the
/// page-leading null bitmap.
fn elems_per_page(width: usize) -> usize {
    let mut n = DEFAULT_PAGE_SIZE * 8 / (width * 8 + 1);
    while n * width + n.div_ceil(8) > DEFAULT_PAGE_SIZE {
        n -= 1;
    }
    n
}

pub struct Column {
    data_type: LogicalType,
    width: usize,
    elems_per_page: usize,
    file: Arc<FileHandle>,
    buffer_manager: Arc<BufferManager>,
    overflow: Option<OverflowFile>,
}

impl Column {
    pub fn open(
        path: impl AsRef<Path>,
        data_type: LogicalType,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let width = data_type.column_width();
        let overflow = if data_type.is_variable_width() {
            let mut ovf_path = path.as_os_str().to_owned();
            ovf_path.push(".ovf");
            Some(OverflowFile::open(ovf_path, Arc::clone(&buffer_manager))?)
        } else {
            None
        };
        let file = Arc::new(FileHandle::open(path, DEFAULT_PAGE_SIZE)?);
        Ok(Self {
            data_type,
            width,
            elems_per_page: elems_per_page(width),
            file,
            buffer_manager,
            overflow,
        })
    }

    pub fn data_type(&self) -> &LogicalType {
        &self.data_type
    }

    #[inline]
    fn locate(&self, offset: NodeOffset) -> (u64, usize) {
        (offset / self.elems_per_page as u64, (offset % self.elems_per_page as u64) as usize)
    }

    #[inline]
    fn bitmap_len(&self) -> usize {
        self.elems_per_page.div_ceil(8)
    }

    pub fn read_value(&self, offset: NodeOffset) -> Result<Value> {
        let (page_idx, elem) = self.locate(offset);
        let guard = self.buffer_manager.pin(&self.file, page_idx)?;
        let (is_null, slot) = guard.read(|data| {
            let is_null = data[elem / 8] & (1 << (elem % 8)) != 0;
            let start = self.bitmap_len() + elem * self.width;
            (is_null, data[start..start + self.width].to_vec())
        });
        if is_null {
            return Ok(Value::Null);
        }
        self.decode_slot(&slot)
    }

    pub fn read_values(&self, offsets: &[NodeOffset]) -> Result<Vec<Value>> {
        offsets.iter().map(|&o| self.read_value(o)).collect()
    }

    /// Writes one value. For variable-width types the overflow payload is
    /// appended before the slot or bitmap changes, so an oversized value
    /// fails without clobbering the previous contents.
    pub fn write_value(&self, offset: NodeOffset, value: &Value) -> Result<()> {
        let (page_idx, elem) = self.locate(offset);
        let mut slot = vec![0u8; self.width];
        if !value.is_null() {
            self.encode_slot(&mut slot, value)?;
        }
        let guard = self.buffer_manager.pin(&self.file, page_idx)?;
        guard.write(|data| {
            if value.is_null() {
                data[elem / 8] |= 1 << (elem % 8);
            } else {
                data[elem / 8] &= !(1 << (elem % 8));
            }
            let start = self.bitmap_len() + elem * self.width;
            data[start..start + self.width].copy_from_slice(&slot);
        });
        Ok(())
    }

    fn encode_slot(&self, slot: &mut [u8], value: &Value) -> Result<()> {
        match (&self.data_type, value) {
            (LogicalType::Bool, Value::Bool(b)) => slot[0] = *b as u8,
            (LogicalType::Int64, Value::Int64(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (LogicalType::Double, Value::Double(v)) => {
                slot.copy_from_slice(&v.to_bits().to_le_bytes())
            }
            (LogicalType::Date, Value::Date(d)) => {
                slot.copy_from_slice(&d.num_days_from_ce().to_le_bytes())
            }
            (LogicalType::Timestamp, Value::Timestamp(t)) => {
                slot.copy_from_slice(&t.and_utc().timestamp_micros().to_le_bytes())
            }
            (LogicalType::Interval, Value::Interval(iv)) => {
                slot[0..4].copy_from_slice(&iv.months.to_le_bytes());
                slot[4..8].copy_from_slice(&iv.days.to_le_bytes());
                slot[8..16].copy_from_slice(&iv.micros.to_le_bytes());
            }
            (LogicalType::String, Value::String(s)) => {
                let overflow = self.overflow.as_ref().expect("string column has overflow");
                encode_var_slot(slot, s.as_bytes(), overflow)?;
            }
            (LogicalType::List(_), Value::List(_)) | (LogicalType::Unstructured, _) => {
                let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
                let overflow = self.overflow.as_ref().expect("list column has overflow");
                encode_var_slot(slot, &bytes, overflow)?;
            }
            (expected, got) => {
                return Err(GraphError::Runtime(format!(
                    "cannot store {} value in {} column",
                    got.data_type(),
                    expected
                )));
            }
        }
        Ok(())
    }

    fn decode_slot(&self, slot: &[u8]) -> Result<Value> {
        Ok(match &self.data_type {
            LogicalType::Bool => Value::Bool(slot[0] != 0),
            LogicalType::Int64 => Value::Int64(i64::from_le_bytes(slot.try_into().unwrap())),
            LogicalType::Double => {
                Value::Double(f64::from_bits(u64::from_le_bytes(slot.try_into().unwrap())))
            }
            LogicalType::Date => {
                let days = i32::from_le_bytes(slot.try_into().unwrap());
                let date = chrono::NaiveDate::from_num_days_from_ce_opt(days)
                    .ok_or_else(|| GraphError::Runtime(format!("date out of range: {days}")))?;
                Value::Date(date)
            }
            LogicalType::Timestamp => {
                let micros = i64::from_le_bytes(slot.try_into().unwrap());
                let ts = chrono::DateTime::from_timestamp_micros(micros)
                    .ok_or_else(|| GraphError::Runtime(format!("timestamp out of range: {micros}")))?;
                Value::Timestamp(ts.naive_utc())
            }
            LogicalType::Interval => Value::Interval(IntervalValue {
                months: i32::from_le_bytes(slot[0..4].try_into().unwrap()),
                days: i32::from_le_bytes(slot[4..8].try_into().unwrap()),
                micros: i64::from_le_bytes(slot[8..16].try_into().unwrap()),
            }),
            LogicalType::String => {
                let overflow = self.overflow.as_ref().expect("string column has overflow");
                let bytes = decode_var_slot(slot, overflow)?;
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            LogicalType::List(_) | LogicalType::Unstructured => {
                let overflow = self.overflow.as_ref().expect("list column has overflow");
                let bytes = decode_var_slot(slot, overflow)?;
                let (value, _) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                value
            }
            other => {
                return Err(GraphError::Runtime(format!("column type {other} is not readable")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::LARGE_PAGE_SIZE;

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
    fn int64_column_round_trip_across_pages() {
        let dir = tempfile::tempdir().unwrap();
        let col = Column::open(dir.path().join("age.col"), LogicalType::Int64, make_bm()).unwrap();
        let n = elems_per_page(8) as u64 + 10;
        for offset in 0..n {
            col.write_value(offset, &Value::Int64(offset as i64 * 3)).unwrap();
        }
        for offset in 0..n {
            assert_eq!(col.read_value(offset).unwrap(), Value::Int64(offset as i64 * 3));
        }
    }

    #[test]
    fn null_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let col = Column::open(dir.path().join("x.col"), LogicalType::Int64, make_bm()).unwrap();
        col.write_value(0, &Value::Int64(5)).unwrap();
        col.write_value(0, &Value::Null).unwrap();
        assert_eq!(col.read_value(0).unwrap(), Value::Null);
    }

    #[test]
    fn string_column_inline_and_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let col = Column::open(dir.path().join("name.col"), LogicalType::String, make_bm()).unwrap();
        col.write_value(0, &Value::String("Alice".to_string())).unwrap();
        let long = "Zione-the-very-long-name-indeed".to_string();
        col.write_value(1, &Value::String(long.clone())).unwrap();
        assert_eq!(col.read_value(0).unwrap(), Value::String("Alice".to_string()));
        assert_eq!(col.read_value(1).unwrap(), Value::String(long));
    }

    #[test]
    fn oversized_string_leaves_slot_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let col = Column::open(dir.path().join("s.col"), LogicalType::String, make_bm()).unwrap();
        col.write_value(4, &Value::String("original".to_string())).unwrap();
        let huge = "y".repeat(DEFAULT_PAGE_SIZE + 100);
        let err = col.write_value(4, &Value::String(huge)).unwrap_err();
        assert!(matches!(err, GraphError::Runtime(_)));
        assert_eq!(col.read_value(4).unwrap(), Value::String("original".to_string()));
    }
}
