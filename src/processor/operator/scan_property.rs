use super::PhysicalOperator;
use crate::common::PropertyId;
use crate::error::{GraphError, Result};
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::storage::NodeTable;
use std::sync::Arc;

/// Reads node property columns at the offsets of an input node-id vector;
/// outputs land in the same chunk and co-vary with it.
pub struct ScanNodeProperty {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    input: DataPos,
    items: Vec<(PropertyId, DataPos)>,
    table: Arc<NodeTable>,
}

impl ScanNodeProperty {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        input: DataPos,
        items: Vec<(PropertyId, DataPos)>,
        table: Arc<NodeTable>,
    ) -> Self {
        Self { id, child, input, items, table }
    }
}

impl PhysicalOperator for ScanNodeProperty {
    fn name(&self) -> &'static str {
        "SCAN_NODE_PROPERTY"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        let targets: Vec<(usize, u64)> = {
            let vector = rs.vector(self.input);
            rs.chunk_state(self.input.chunk)
                .positions()
                .map(|pos| {
                    vector
                        .value(pos)
                        .as_node()
                        .map(|node| (pos, node.offset))
                        .ok_or_else(|| {
                            GraphError::Runtime("property scan over a non-node value".to_string())
                        })
                })
                .collect::<Result<_>>()?
        };
        for &(property_id, out) in &self.items {
            let column = self.table.column(property_id);
            for &(pos, offset) in &targets {
                let value = column.read_value(offset)?;
                rs.vector_mut(out).set_value(pos, value);
            }
        }
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            input: self.input,
            items: self.items.clone(),
            table: Arc::clone(&self.table),
        })
    }
}
