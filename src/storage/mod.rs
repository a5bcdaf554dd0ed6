// # Columnar Store
//
// On-disk layout: one file per (label, property) column, one per
// (label, direction) adjacency structure, an overflow file per
// variable-width column, and one WAL. All reads and writes go through the
// buffer manager at page granularity.

pub mod adjacency;
pub mod column;
pub mod disk;
pub mod node_store;
pub mod overflow;
pub mod rel_store;
pub mod wal;

pub use adjacency::{AdjColumn, AdjLists, ListSyncState};
pub use column::Column;
pub use disk::FileHandle;
pub use node_store::{NodeTable, NodesStore};
pub use overflow::OverflowFile;
pub use rel_store::{scan_adjacency, AdjStructure, RelTable, RelsStore};
pub use wal::{WalRecord, WriteAheadLog};

use crate::buffer::BufferManager;
use crate::catalog::Catalog;
use crate::common::LabelId;
use crate::error::Result;
use crate::index::HashIndex;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns every persistent structure of one database directory.
pub struct StorageManager {
    directory: PathBuf,
    buffer_manager: Arc<BufferManager>,
    nodes: RwLock<NodesStore>,
    rels: RwLock<RelsStore>,
    indexes: RwLock<Vec<Arc<HashIndex>>>,
    wal: WriteAheadLog,
}

impl StorageManager {
    pub fn open(
        catalog: &Catalog,
        directory: impl AsRef<Path>,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tracing::info!(directory = %directory.display(), "initializing storage manager");
        let nodes = NodesStore::open(catalog, &directory, &buffer_manager)?;
        let rels = RelsStore::open(catalog, &directory, &buffer_manager)?;
        let mut indexes = Vec::new();
        for schema in catalog.node_labels() {
            let key_type = schema.properties[schema.primary_key as usize].data_type.clone();
            indexes.push(Arc::new(HashIndex::open(
                index_path(&directory, schema.label_id),
                key_type,
                Arc::clone(&buffer_manager),
            )?));
        }
        let wal = WriteAheadLog::open(directory.join("graphite.wal"))?;
        Ok(Self {
            directory,
            buffer_manager,
            nodes: RwLock::new(nodes),
            rels: RwLock::new(rels),
            indexes: RwLock::new(indexes),
            wal,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn node_table(&self, label: LabelId) -> Arc<NodeTable> {
        Arc::clone(self.nodes.read().table(label))
    }

    pub fn rel_table(&self, label: LabelId) -> Arc<RelTable> {
        Arc::clone(self.rels.read().table(label))
    }

    pub fn index(&self, label: LabelId) -> Arc<HashIndex> {
        Arc::clone(&self.indexes.read()[label as usize])
    }

    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    /// Builds every rel table with buffered inserts. Called before a query
    /// starts so scans see a complete CSR image.
    pub fn build_dirty_rel_tables(&self, catalog: &Catalog) -> Result<()> {
        let rels = self.rels.read();
        for table in rels.tables() {
            if table.needs_build() {
                let schema = catalog.rel_label(table.label_id());
                let num_src = catalog.node_label(schema.src_label).num_nodes;
                let num_dst = catalog.node_label(schema.dst_label).num_nodes;
                table.build(num_src, num_dst)?;
            }
        }
        Ok(())
    }

    /// Registers the storage structures for labels created after open.
    pub fn sync_with_catalog(&self, catalog: &Catalog) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            let existing = catalog
                .node_labels()
                .iter()
                .filter(|s| (s.label_id as usize) < self.indexes.read().len())
                .count();
            for schema in &catalog.node_labels()[existing..] {
                nodes.add_table(schema, &self.directory, &self.buffer_manager)?;
                let key_type = schema.properties[schema.primary_key as usize].data_type.clone();
                self.indexes.write().push(Arc::new(HashIndex::open(
                    index_path(&self.directory, schema.label_id),
                    key_type,
                    Arc::clone(&self.buffer_manager),
                )?));
            }
        }
        {
            let mut rels = self.rels.write();
            let existing = rels.tables().len();
            for schema in &catalog.rel_labels()[existing..] {
                rels.add_table(schema, &self.directory, &self.buffer_manager)?;
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer_manager.flush_all()?;
        let indexes = self.indexes.read();
        for index in indexes.iter() {
            index.save()?;
        }
        Ok(())
    }
}

fn index_path(directory: &Path, label: LabelId) -> PathBuf {
    directory.join(format!("n_{label}.hidx"))
}
