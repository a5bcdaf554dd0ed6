// Write operators. All of them append WAL before-images before touching a
// slot and run on single-threaded pipelines under the database's writer
// lock. Variable-width SETs validate the overflow append inside the
// column write, so an oversized value fails before the slot changes.

use super::PhysicalOperator;
use crate::common::{LabelId, PropertyId};
use crate::error::{GraphError, Result};
use crate::expression::ExprEvaluator;
use crate::index::HashIndex;
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::storage::{NodeTable, StorageManager, WalRecord};
use std::sync::Arc;

pub struct CreateNodeItem {
    pub label: LabelId,
    pub table: Arc<NodeTable>,
    pub index: Arc<HashIndex>,
    pub primary_key: PropertyId,
    pub values: Vec<ExprEvaluator>,
}

/// Creates one node per item, once per input tuple (or exactly once when
/// CREATE opens the statement).
pub struct CreateNode {
    id: u32,
    child: Option<Box<dyn PhysicalOperator>>,
    items: Vec<CreateNodeItem>,
    storage: Arc<StorageManager>,
    source_done: bool,
}

impl CreateNode {
    pub fn new(
        id: u32,
        child: Option<Box<dyn PhysicalOperator>>,
        items: Vec<CreateNodeItem>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self { id, child, items, storage, source_done: false }
    }

    fn create_all(&mut self, rs: &ResultSet, ctx: &ExecutionContext) -> Result<()> {
        for item in &mut self.items {
            let mut values = Vec::with_capacity(item.values.len());
            for eval in &mut item.values {
                eval.evaluate(rs, ctx)?;
                let (vector, state) = eval.resolve(rs);
                values.push(vector.value(state.curr_position()).clone());
            }
            let key = values[item.primary_key as usize].clone();
            if key.is_null() {
                return Err(GraphError::Runtime(
                    "primary key of a created node cannot be NULL".to_string(),
                ));
            }
            let offset = item.table.num_nodes();
            self.storage.wal().append(WalRecord::CreateNode {
                label: item.label,
                offset,
                key: key.clone(),
            })?;
            item.table.insert(&values)?;
            item.index.insert(&key, offset)?;
        }
        Ok(())
    }
}

impl PhysicalOperator for CreateNode {
    fn name(&self) -> &'static str {
        "CREATE_NODE"
    }

    fn is_source(&self) -> bool {
        self.child.is_none()
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.source_done = false;
        if let Some(child) = &mut self.child {
            child.init(rs, ctx)?;
        }
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        match &mut self.child {
            Some(child) => {
                if !child.next(rs, ctx)? {
                    return Ok(false);
                }
            }
            None => {
                if self.source_done {
                    return Ok(false);
                }
                self.source_done = true;
                rs.multiplicity = 1;
            }
        }
        self.create_all(rs, ctx)?;
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.as_ref().map(|c| c.clone_op()),
            items: self
                .items
                .iter()
                .map(|i| CreateNodeItem {
                    label: i.label,
                    table: Arc::clone(&i.table),
                    index: Arc::clone(&i.index),
                    primary_key: i.primary_key,
                    values: i.values.clone(),
                })
                .collect(),
            storage: Arc::clone(&self.storage),
            source_done: false,
        })
    }
}

pub struct SetPropertyItem {
    pub node: DataPos,
    pub label: LabelId,
    pub table: Arc<NodeTable>,
    pub property_id: PropertyId,
    pub value: ExprEvaluator,
}

/// Writes property slots for every input row; the before-image goes to the
/// WAL first so a failed statement restores it.
pub struct SetProperty {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    items: Vec<SetPropertyItem>,
    storage: Arc<StorageManager>,
}

impl SetProperty {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        items: Vec<SetPropertyItem>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self { id, child, items, storage }
    }
}

impl PhysicalOperator for SetProperty {
    fn name(&self) -> &'static str {
        "SET_PROPERTY"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        for item in &mut self.items {
            let offset = {
                let state = rs.chunk_state(item.node.chunk);
                match rs.vector(item.node).value(state.curr_position()).as_node() {
                    Some(node) => node.offset,
                    None => continue,
                }
            };
            item.value.evaluate(rs, ctx)?;
            let new_value = {
                let (vector, state) = item.value.resolve(rs);
                vector.value(state.curr_position()).clone()
            };
            let column = item.table.column(item.property_id);
            let before = column.read_value(offset)?;
            self.storage.wal().append(WalRecord::SetProperty {
                label: item.label,
                property: item.property_id,
                offset,
                before,
            })?;
            column.write_value(offset, &new_value)?;
        }
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            items: self
                .items
                .iter()
                .map(|i| SetPropertyItem {
                    node: i.node,
                    label: i.label,
                    table: Arc::clone(&i.table),
                    property_id: i.property_id,
                    value: i.value.clone(),
                })
                .collect(),
            storage: Arc::clone(&self.storage),
        })
    }
}

pub struct DeleteNodeItem {
    pub node: DataPos,
    pub label: LabelId,
    pub table: Arc<NodeTable>,
    pub index: Arc<HashIndex>,
    pub primary_key: PropertyId,
}

/// Marks nodes deleted and drops their primary keys from the index.
pub struct DeleteNode {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    items: Vec<DeleteNodeItem>,
    storage: Arc<StorageManager>,
}

impl DeleteNode {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        items: Vec<DeleteNodeItem>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self { id, child, items, storage }
    }
}

impl PhysicalOperator for DeleteNode {
    fn name(&self) -> &'static str {
        "DELETE_NODE"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        for item in &self.items {
            let offset = {
                let state = rs.chunk_state(item.node.chunk);
                match rs.vector(item.node).value(state.curr_position()).as_node() {
                    Some(node) => node.offset,
                    None => continue,
                }
            };
            let key = item.table.column(item.primary_key).read_value(offset)?;
            self.storage.wal().append(WalRecord::DeleteNode {
                label: item.label,
                offset,
                key: key.clone(),
            })?;
            item.table.set_deleted(offset, true)?;
            if !key.is_null() {
                item.index.delete(&key)?;
            }
        }
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            items: self
                .items
                .iter()
                .map(|i| DeleteNodeItem {
                    node: i.node,
                    label: i.label,
                    table: Arc::clone(&i.table),
                    index: Arc::clone(&i.index),
                    primary_key: i.primary_key,
                })
                .collect(),
            storage: Arc::clone(&self.storage),
        })
    }
}
