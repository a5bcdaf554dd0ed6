// Node tables: one typed column per structured property, an optional
// unstructured sidecar, and a deletion flag column. Offsets are allocated
// densely and never reused; deleted nodes are skipped by scans.

use crate::buffer::BufferManager;
use crate::catalog::{Catalog, NodeLabelSchema};
use crate::common::{LabelId, LogicalType, NodeOffset, PropertyId, Value};
use crate::error::{GraphError, Result};
use crate::storage::column::Column;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct NodeTable {
    label_id: LabelId,
    columns: Vec<Column>,
    unstructured: Option<Column>,
    deleted: Column,
    num_nodes: AtomicU64,
}

impl NodeTable {
    fn open(
        schema: &NodeLabelSchema,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(schema.properties.len());
        for property in &schema.properties {
            let path = node_column_path(directory, schema.label_id, property.property_id);
            columns.push(Column::open(
                path,
                property.data_type.clone(),
                Arc::clone(buffer_manager),
            )?);
        }
        let unstructured = if schema.has_unstructured {
            let path = directory.join(format!("n_{}_unstr.col", schema.label_id));
            Some(Column::open(path, LogicalType::Unstructured, Arc::clone(buffer_manager))?)
        } else {
            None
        };
        let deleted = Column::open(
            directory.join(format!("n_{}_deleted.col", schema.label_id)),
            LogicalType::Bool,
            Arc::clone(buffer_manager),
        )?;
        Ok(Self {
            label_id: schema.label_id,
            columns,
            unstructured,
            deleted,
            num_nodes: AtomicU64::new(schema.num_nodes),
        })
    }

    pub fn label_id(&self) -> LabelId {
        self.label_id
    }

    pub fn num_nodes(&self) -> u64 {
        self.num_nodes.load(Ordering::Acquire)
    }

    pub fn column(&self, property_id: PropertyId) -> &Column {
        &self.columns[property_id as usize]
    }

    /// Allocates the next offset and writes one value per structured
    /// property, in property order.
    pub fn insert(&self, values: &[Value]) -> Result<NodeOffset> {
        if values.len() != self.columns.len() {
            return Err(GraphError::Runtime(format!(
                "node of label {} expects {} properties, got {}",
                self.label_id,
                self.columns.len(),
                values.len()
            )));
        }
        let offset = self.num_nodes.fetch_add(1, Ordering::AcqRel);
        for (column, value) in self.columns.iter().zip(values) {
            column.write_value(offset, value)?;
        }
        Ok(offset)
    }

    pub fn is_deleted(&self, offset: NodeOffset) -> Result<bool> {
        Ok(self.deleted.read_value(offset)? == Value::Bool(true))
    }

    pub fn set_deleted(&self, offset: NodeOffset, deleted: bool) -> Result<()> {
        self.deleted.write_value(offset, &Value::Bool(deleted))
    }

    pub fn read_unstructured(&self, offset: NodeOffset) -> Result<HashMap<String, Value>> {
        let column = self.unstructured.as_ref().ok_or_else(|| {
            GraphError::Runtime(format!("label {} has no unstructured properties", self.label_id))
        })?;
        Ok(decode_unstructured(column.read_value(offset)?))
    }

    pub fn write_unstructured(&self, offset: NodeOffset, map: &HashMap<String, Value>) -> Result<()> {
        let column = self.unstructured.as_ref().ok_or_else(|| {
            GraphError::Runtime(format!("label {} has no unstructured properties", self.label_id))
        })?;
        column.write_value(offset, &encode_unstructured(map))
    }

    /// Restores the allocation watermark after a rolled-back create.
    pub(crate) fn truncate_to(&self, num_nodes: u64) {
        self.num_nodes.store(num_nodes, Ordering::Release);
    }
}

fn node_column_path(directory: &Path, label: LabelId, property: PropertyId) -> PathBuf {
    directory.join(format!("n_{label}_p_{property}.col"))
}

// The heterogeneous key->value map rides in one overflow-backed slot as a
// list of [key, value] pairs.
fn encode_unstructured(map: &HashMap<String, Value>) -> Value {
    let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Value::List(
        pairs
            .into_iter()
            .map(|(k, v)| Value::List(vec![Value::String(k.clone()), v.clone()]))
            .collect(),
    )
}

fn decode_unstructured(value: Value) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    if let Value::List(pairs) = value {
        for pair in pairs {
            if let Value::List(mut kv) = pair {
                if kv.len() == 2 {
                    let v = kv.pop().unwrap();
                    if let Value::String(k) = kv.pop().unwrap() {
                        map.insert(k, v);
                    }
                }
            }
        }
    }
    map
}

pub struct NodesStore {
    tables: Vec<Arc<NodeTable>>,
}

impl NodesStore {
    pub fn open(
        catalog: &Catalog,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<Self> {
        tracing::debug!(num_labels = catalog.node_labels().len(), "initializing nodes store");
        let tables = catalog
            .node_labels()
            .iter()
            .map(|schema| NodeTable::open(schema, directory, buffer_manager).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }

    pub fn table(&self, label: LabelId) -> &Arc<NodeTable> {
        &self.tables[label as usize]
    }

    /// Registers the table for a label created after open.
    pub fn add_table(
        &mut self,
        schema: &NodeLabelSchema,
        directory: &Path,
        buffer_manager: &Arc<BufferManager>,
    ) -> Result<()> {
        debug_assert_eq!(schema.label_id as usize, self.tables.len());
        self.tables.push(Arc::new(NodeTable::open(schema, directory, buffer_manager)?));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DEFAULT_PAGE_SIZE, LARGE_PAGE_SIZE};

    fn setup() -> (tempfile::TempDir, Catalog, NodesStore) {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(BufferManager::new(
            128 * DEFAULT_PAGE_SIZE,
            8 * LARGE_PAGE_SIZE,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            false,
        ));
        let mut catalog = Catalog::new();
        catalog
            .add_node_label(
                "person",
                vec![
                    ("ID".to_string(), LogicalType::Int64),
                    ("fName".to_string(), LogicalType::String),
                ],
                "ID",
                true,
            )
            .unwrap();
        let store = NodesStore::open(&catalog, dir.path(), &bm).unwrap();
        (dir, catalog, store)
    }

    #[test]
    fn insert_and_read_back() {
        let (_dir, _catalog, store) = setup();
        let table = store.table(0);
        let o0 = table
            .insert(&[Value::Int64(0), Value::String("Alice".to_string())])
            .unwrap();
        let o1 = table
            .insert(&[Value::Int64(2), Value::String("Bob".to_string())])
            .unwrap();
        assert_eq!((o0, o1), (0, 1));
        assert_eq!(table.column(0).read_value(1).unwrap(), Value::Int64(2));
        assert_eq!(
            table.column(1).read_value(0).unwrap(),
            Value::String("Alice".to_string())
        );
        assert!(!table.is_deleted(0).unwrap());
    }

    #[test]
    fn unstructured_map_round_trip() {
        let (_dir, _catalog, store) = setup();
        let table = store.table(0);
        let offset = table
            .insert(&[Value::Int64(0), Value::String("Alice".to_string())])
            .unwrap();
        let mut map = HashMap::new();
        map.insert("nickname".to_string(), Value::String("Al".to_string()));
        map.insert("height".to_string(), Value::Double(1.7));
        table.write_unstructured(offset, &map).unwrap();
        assert_eq!(table.read_unstructured(offset).unwrap(), map);
    }
}
