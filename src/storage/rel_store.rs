// Rel tables: adjacency in both directions plus property columns indexed
// by rel offset. Rel offsets are assigned in load order, so forward and
// backward structures and every property column agree on them.
//
// Rels are buffered at insert time and written out as a CSR image when the
// table is built; the engine builds all dirty tables before a query runs.

use crate::buffer::BufferManager;
use crate::catalog::{Catalog, RelLabelSchema};
use crate::common::{Cardinality, Direction, LabelId, NodeOffset, PropertyId, RelOffset, Value};
use crate::error::{GraphError, Result};
use crate::storage::adjacency::{AdjColumn, AdjLists, ListSyncState};
use crate::storage::column::Column;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub enum AdjStructure {
    Column(AdjColumn),
    Lists(AdjLists),
}

impl AdjStructure {
    pub fn is_column(&self) -> bool {
        matches!(self, AdjStructure::Column(_))
    }
}

struct PendingRel {
    src: NodeOffset,
    dst: NodeOffset,
    properties: Vec<Value>,
}

pub struct RelTable {
    label_id: LabelId,
    cardinality: Cardinality,
    fwd: AdjStructure,
    bwd: AdjStructure,
    property_columns: Vec<Column>,
    num_rels: AtomicU64,
    pending: Mutex<Vec<PendingRel>>,
    built: AtomicBool,
}

impl RelTable {
    fn open(
        schema: &RelLabelSchema,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<Self> {
        let open_adj = |direction: Direction| -> Result<AdjStructure> {
            let tag = match direction {
                Direction::Fwd => "fwd",
                Direction::Bwd => "bwd",
            };
            let prefix = directory.join(format!("r_{}_{tag}", schema.label_id));
            if schema.cardinality.is_single(direction) {
                Ok(AdjStructure::Column(AdjColumn::open(
                    prefix.with_extension("adj"),
                    Arc::clone(buffer_manager),
                )?))
            } else {
                Ok(AdjStructure::Lists(AdjLists::open(prefix, Arc::clone(buffer_manager))?))
            }
        };
        let mut property_columns = Vec::with_capacity(schema.properties.len());
        for property in &schema.properties {
            let path = directory.join(format!(
                "r_{}_p_{}.col",
                schema.label_id, property.property_id
            ));
            property_columns.push(Column::open(
                path,
                property.data_type.clone(),
                Arc::clone(buffer_manager),
            )?);
        }
        Ok(Self {
            label_id: schema.label_id,
            cardinality: schema.cardinality,
            fwd: open_adj(Direction::Fwd)?,
            bwd: open_adj(Direction::Bwd)?,
            property_columns,
            num_rels: AtomicU64::new(schema.num_rels),
            pending: Mutex::new(Vec::new()),
            built: AtomicBool::new(schema.num_rels > 0),
        })
    }

    pub fn label_id(&self) -> LabelId {
        self.label_id
    }

    pub fn num_rels(&self) -> u64 {
        self.num_rels.load(Ordering::Acquire)
    }

    pub fn adj(&self, direction: Direction) -> &AdjStructure {
        match direction {
            Direction::Fwd => &self.fwd,
            Direction::Bwd => &self.bwd,
        }
    }

    pub fn is_single(&self, direction: Direction) -> bool {
        self.cardinality.is_single(direction)
    }

    pub fn property_column(&self, property_id: PropertyId) -> &Column {
        &self.property_columns[property_id as usize]
    }

    /// Buffers one rel; takes effect at the next `build`.
    pub fn insert(&self, src: NodeOffset, dst: NodeOffset, properties: Vec<Value>) -> Result<()> {
        if self.built.load(Ordering::Acquire) {
            return Err(GraphError::Transaction(format!(
                "rel label {} is already built; incremental rel insertion is not supported",
                self.label_id
            )));
        }
        if properties.len() != self.property_columns.len() {
            return Err(GraphError::Runtime(format!(
                "rel of label {} expects {} properties, got {}",
                self.label_id,
                self.property_columns.len(),
                properties.len()
            )));
        }
        self.pending.lock().push(PendingRel { src, dst, properties });
        Ok(())
    }

    pub fn needs_build(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Writes the buffered rels: property columns by rel offset, then the
    /// CSR (or single-slot) adjacency for both directions.
    pub fn build(&self, num_src_nodes: u64, num_dst_nodes: u64) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(label = self.label_id, num_rels = pending.len(), "building rel table");
        let mut fwd_lists: Vec<Vec<(NodeOffset, RelOffset)>> =
            vec![Vec::new(); num_src_nodes as usize];
        let mut bwd_lists: Vec<Vec<(NodeOffset, RelOffset)>> =
            vec![Vec::new(); num_dst_nodes as usize];
        for (i, rel) in pending.iter().enumerate() {
            let rel_offset = i as RelOffset;
            for (column, value) in self.property_columns.iter().zip(&rel.properties) {
                column.write_value(rel_offset, value)?;
            }
            fwd_lists[rel.src as usize].push((rel.dst, rel_offset));
            bwd_lists[rel.dst as usize].push((rel.src, rel_offset));
        }
        self.write_direction(&self.fwd, &fwd_lists)?;
        self.write_direction(&self.bwd, &bwd_lists)?;
        self.num_rels.store(pending.len() as u64, Ordering::Release);
        self.built.store(true, Ordering::Release);
        Ok(())
    }

    fn write_direction(
        &self,
        adj: &AdjStructure,
        lists: &[Vec<(NodeOffset, RelOffset)>],
    ) -> Result<()> {
        match adj {
            AdjStructure::Lists(adj_lists) => adj_lists.build(lists),
            AdjStructure::Column(adj_column) => {
                for (src, list) in lists.iter().enumerate() {
                    match list.as_slice() {
                        [] => {}
                        [(nbr, rel)] => adj_column.set(src as NodeOffset, *nbr, *rel)?,
                        _ => {
                            return Err(GraphError::Transaction(format!(
                                "cardinality violation on rel label {}: node {} has {} edges",
                                self.label_id,
                                src,
                                list.len()
                            )))
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

pub struct RelsStore {
    tables: Vec<Arc<RelTable>>,
}

impl RelsStore {
    pub fn open(
        catalog: &Catalog,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<Self> {
        tracing::debug!(num_labels = catalog.rel_labels().len(), "initializing rels store");
        let tables = catalog
            .rel_labels()
            .iter()
            .map(|schema| RelTable::open(schema, directory, buffer_manager).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }

    pub fn table(&self, label: LabelId) -> &Arc<RelTable> {
        &self.tables[label as usize]
    }

    pub fn add_table(
        &mut self,
        schema: &RelLabelSchema,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<()> {
        debug_assert_eq!(schema.label_id as usize, self.tables.len());
        self.tables.push(Arc::new(RelTable::open(schema, directory, buffer_manager)?));
        Ok(())
    }

    pub fn tables(&self) -> &[Arc<RelTable>] {
        &self.tables
    }
}

/// Convenience for operators: one scan step over either adjacency shape.
pub fn scan_adjacency(
    table: &RelTable,
    direction: Direction,
    src: NodeOffset,
    sync: &mut ListSyncState,
    max: usize,
) -> Result<Vec<(NodeOffset, RelOffset)>> {
    match table.adj(direction) {
        AdjStructure::Column(column) => {
            if sync.num_scanned > 0 {
                sync.num_scanned = sync.size;
                return Ok(Vec::new());
            }
            match column.neighbor(src)? {
                Some(pair) => {
                    sync.reset(0, 1);
                    sync.num_scanned = 1;
                    Ok(vec![pair])
                }
                None => {
                    sync.reset(0, 0);
                    Ok(Vec::new())
                }
            }
        }
        AdjStructure::Lists(lists) => {
            if sync.size == 0 && sync.num_scanned == 0 {
                lists.open_list(src, sync)?;
            }
            lists.scan(sync, max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogicalType, DEFAULT_PAGE_SIZE, LARGE_PAGE_SIZE};

    fn setup() -> (tempfile::TempDir, RelsStore) {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(
            128 * DEFAULT_PAGE_SIZE,
            16 * LARGE_PAGE_SIZE,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            false,
        ));
        let mut catalog = Catalog::new();
        let person = catalog
            .add_node_label("person", vec![("ID".to_string(), LogicalType::Int64)], "ID", false)
            .unwrap();
        catalog
            .add_rel_label(
                "knows",
                vec![("since".to_string(), LogicalType::Int64)],
                person,
                person,
                Cardinality::ManyMany,
            )
            .unwrap();
        let store = RelsStore::open(&catalog, dir.path(), &bm).unwrap();
        (dir, store)
    }

    #[test]
    fn build_then_scan_both_directions() {
        let (_dir, store) = setup();
        let table = store.table(0);
        table.insert(0, 1, vec![Value::Int64(2020)]).unwrap();
        table.insert(0, 2, vec![Value::Int64(2021)]).unwrap();
        table.insert(2, 1, vec![Value::Int64(2022)]).unwrap();
        table.build(3, 3).unwrap();

        let mut sync = ListSyncState::default();
        let fwd = scan_adjacency(table, Direction::Fwd, 0, &mut sync, 16).unwrap();
        assert_eq!(fwd, vec![(1, 0), (2, 1)]);

        let mut sync = ListSyncState::default();
        let bwd = scan_adjacency(table, Direction::Bwd, 1, &mut sync, 16).unwrap();
        assert_eq!(bwd, vec![(0, 0), (2, 2)]);

        // Property column is addressed by rel offset.
        assert_eq!(table.property_column(0).read_value(2).unwrap(), Value::Int64(2022));
        assert!(table.insert(1, 2, vec![Value::Int64(2023)]).is_err());
    }
}
