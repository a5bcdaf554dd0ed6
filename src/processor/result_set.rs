use crate::common::LogicalType;
use crate::storage::ListSyncState;
use crate::vector::{ChunkState, DataChunk, ValueVector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Address of a value vector inside a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPos {
    pub chunk: usize,
    pub vector: usize,
}

impl DataPos {
    pub fn new(chunk: usize, vector: usize) -> Self {
        Self { chunk, vector }
    }
}

#[derive(Debug, Clone)]
pub struct VectorDescriptor {
    pub name: String,
    pub data_type: LogicalType,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkDescriptor {
    pub vectors: Vec<VectorDescriptor>,
}

/// Shape of the result set a pipeline allocates: one chunk per
/// factorization group, one vector per expression slot.
#[derive(Debug, Clone, Default)]
pub struct ResultSetDescriptor {
    pub chunks: Vec<ChunkDescriptor>,
    positions: HashMap<String, DataPos>,
}

impl ResultSetDescriptor {
    pub fn add_chunk(&mut self) -> usize {
        self.chunks.push(ChunkDescriptor::default());
        self.chunks.len() - 1
    }

    pub fn add_vector(&mut self, chunk: usize, name: &str, data_type: LogicalType) -> DataPos {
        let pos = DataPos::new(chunk, self.chunks[chunk].vectors.len());
        self.chunks[chunk].vectors.push(VectorDescriptor { name: name.to_string(), data_type });
        self.positions.insert(name.to_string(), pos);
        pos
    }

    pub fn data_pos(&self, name: &str) -> Option<DataPos> {
        self.positions.get(name).copied()
    }

    pub fn make_result_set(&self) -> ResultSet {
        let chunks = self
            .chunks
            .iter()
            .map(|c| {
                let types: Vec<LogicalType> =
                    c.vectors.iter().map(|v| v.data_type.clone()).collect();
                DataChunk::new(&types)
            })
            .collect();
        ResultSet {
            multiplicity: 1,
            chunks,
            list_syncs: vec![None; self.chunks.len()],
        }
    }
}

/// Ordered data chunks plus the row-count multiplier accumulated by
/// operators that drop factorized payloads.
pub struct ResultSet {
    pub multiplicity: u64,
    pub chunks: Vec<DataChunk>,
    /// Per-chunk shared list cursor, so lists feeding a chunk are consumed
    /// in lockstep.
    pub list_syncs: Vec<Option<Arc<Mutex<ListSyncState>>>>,
}

impl ResultSet {
    pub fn vector(&self, pos: DataPos) -> &ValueVector {
        &self.chunks[pos.chunk].vectors[pos.vector]
    }

    pub fn vector_mut(&mut self, pos: DataPos) -> &mut ValueVector {
        &mut self.chunks[pos.chunk].vectors[pos.vector]
    }

    pub fn chunk_state(&self, chunk: usize) -> &ChunkState {
        &self.chunks[chunk].state
    }

    pub fn chunk_state_mut(&mut self, chunk: usize) -> &mut ChunkState {
        &mut self.chunks[chunk].state
    }

    /// Tuples currently represented: the product of unflat chunk sizes
    /// times the multiplicity. With the at-most-one-unflat invariant this
    /// is exact.
    pub fn active_tuple_count(&self) -> u64 {
        let mut count = self.multiplicity;
        for chunk in &self.chunks {
            if !chunk.state.is_flat() && !chunk.vectors.is_empty() {
                count *= chunk.state.selected_size() as u64;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_builds_matching_result_set() {
        let mut desc = ResultSetDescriptor::default();
        let c0 = desc.add_chunk();
        let a = desc.add_vector(c0, "a", LogicalType::Node);
        let c1 = desc.add_chunk();
        let b = desc.add_vector(c1, "b.age", LogicalType::Int64);

        assert_eq!(desc.data_pos("a"), Some(a));
        assert_eq!(desc.data_pos("b.age"), Some(b));
        let rs = desc.make_result_set();
        assert_eq!(rs.chunks.len(), 2);
        assert_eq!(rs.vector(b).data_type, LogicalType::Int64);
        assert_eq!(rs.multiplicity, 1);
    }

    #[test]
    fn tuple_count_tracks_unflat_size_and_multiplicity() {
        let mut desc = ResultSetDescriptor::default();
        let c0 = desc.add_chunk();
        desc.add_vector(c0, "a", LogicalType::Node);
        let mut rs = desc.make_result_set();
        rs.chunk_state_mut(0).reset_identity(5);
        rs.multiplicity = 3;
        assert_eq!(rs.active_tuple_count(), 15);
    }
}
