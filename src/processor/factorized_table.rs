// Row-store materialization shared by hash-join builds, order-by, and
// result collection. A column is either flat (one value per tuple) or
// unflat (a whole factorized list per tuple). Build tables key on column 0
// and link colliding tuples through a chain resolved by an index-based
// next pointer, published once by the finalizer.

use super::result_set::{DataPos, ResultSet};
use crate::common::{hash_value, LogicalType, Value};
use crate::error::{GraphError, Result};

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: LogicalType,
    pub is_unflat: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub values: Vec<Value>,
    pub multiplicity: u64,
}

#[derive(Debug, Default)]
pub struct FactorizedTable {
    schema: TableSchema,
    rows: Vec<Row>,
    /// Hash directory over column 0; empty until `finalize_build`.
    directory: Vec<Option<usize>>,
    /// Per-row chain link into `directory`'s buckets.
    next: Vec<Option<usize>>,
    hash_mask: u64,
}

impl FactorizedTable {
    pub fn new(schema: TableSchema) -> Self {
        Self { schema, ..Default::default() }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> &Row {
        &self.rows[idx]
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Total tuple count with multiplicities expanded.
    pub fn num_tuples(&self) -> u64 {
        self.rows.iter().map(|r| r.multiplicity).sum()
    }

    /// Appends tuples from a result set, one row per live position of the
    /// `expand_over` chunk (the join-key chunk for builds). Columns living
    /// on other chunks contribute their current value when flat, or a
    /// factorized list when unflat.
    pub fn append_from(
        &mut self,
        rs: &ResultSet,
        positions: &[DataPos],
        expand_over: Option<usize>,
    ) -> Result<()> {
        debug_assert_eq!(positions.len(), self.schema.columns.len());
        let expand_positions: Vec<Option<usize>> = match expand_over {
            Some(chunk) => rs.chunk_state(chunk).positions().map(Some).collect(),
            None => vec![None],
        };
        for expand_pos in expand_positions {
            let mut values = Vec::with_capacity(positions.len());
            for (pos, col) in positions.iter().zip(&self.schema.columns) {
                let state = rs.chunk_state(pos.chunk);
                let vector = rs.vector(*pos);
                if Some(pos.chunk) == expand_over {
                    let p = expand_pos.expect("expansion chunk position");
                    values.push(vector.value(p).clone());
                } else if state.is_flat() {
                    values.push(vector.value(state.curr_position()).clone());
                } else if col.is_unflat {
                    values.push(Value::List(
                        state.positions().map(|p| vector.value(p).clone()).collect(),
                    ));
                } else {
                    return Err(GraphError::Runtime(format!(
                        "column {} is unflat but its table slot is flat",
                        col.name
                    )));
                }
            }
            self.rows.push(Row { values, multiplicity: rs.multiplicity });
        }
        Ok(())
    }

    /// Appends fully expanded tuples: the cross product of every unflat
    /// chunk the positions touch (at most one by invariant) times the
    /// multiplicity stays recorded on the row.
    pub fn append_expanded(&mut self, rs: &ResultSet, positions: &[DataPos]) -> Result<()> {
        let unflat_chunk = positions
            .iter()
            .map(|p| p.chunk)
            .find(|&c| !rs.chunk_state(c).is_flat());
        self.append_from(rs, positions, unflat_chunk)
    }

    pub fn merge(&mut self, mut other: FactorizedTable) {
        self.rows.append(&mut other.rows);
    }

    // ------------------------------------------------------------------
    // Hash directory (build side of joins)
    // ------------------------------------------------------------------

    fn key_hash(key: &Value) -> u64 {
        use std::hash::Hasher;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_value(key, &mut hasher);
        hasher.finish()
    }

    /// Builds the directory sized to the next power of two of twice the
    /// tuple count and links colliding rows, newest first. Null keys are
    /// left out of every chain.
    pub fn finalize_build(&mut self) {
        let capacity = (self.rows.len().max(1) * 2).next_power_of_two();
        self.hash_mask = capacity as u64 - 1;
        self.directory = vec![None; capacity];
        self.next = vec![None; self.rows.len()];
        for idx in 0..self.rows.len() {
            let key = &self.rows[idx].values[0];
            if key.is_null() {
                continue;
            }
            let slot = (Self::key_hash(key) & self.hash_mask) as usize;
            self.next[idx] = self.directory[slot];
            self.directory[slot] = Some(idx);
        }
    }

    /// Head of the chain that may contain `key`.
    pub fn probe(&self, key: &Value) -> Option<usize> {
        if key.is_null() || self.directory.is_empty() {
            return None;
        }
        self.directory[(Self::key_hash(key) & self.hash_mask) as usize]
    }

    /// Next row in the same chain.
    pub fn chain_next(&self, idx: usize) -> Option<usize> {
        self.next[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeId;

    fn key_table() -> FactorizedTable {
        FactorizedTable::new(TableSchema {
            columns: vec![ColumnSchema {
                name: "k".to_string(),
                data_type: LogicalType::Node,
                is_unflat: false,
            }],
        })
    }

    #[test]
    fn directory_chains_cover_all_non_null_rows() {
        let mut table = key_table();
        for offset in 0..100u64 {
            table.push_row(Row {
                values: vec![Value::Node(NodeId { label: 0, offset })],
                multiplicity: 1,
            });
        }
        table.push_row(Row { values: vec![Value::Null], multiplicity: 1 });
        table.finalize_build();

        // Every non-null key is findable by walking its chain.
        for offset in 0..100u64 {
            let key = Value::Node(NodeId { label: 0, offset });
            let mut found = false;
            let mut cursor = table.probe(&key);
            while let Some(idx) = cursor {
                if table.row(idx).values[0] == key {
                    found = true;
                    break;
                }
                cursor = table.chain_next(idx);
            }
            assert!(found, "key {offset} not reachable through its chain");
        }
        assert_eq!(table.probe(&Value::Null), None);
    }
}
