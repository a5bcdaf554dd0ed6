use super::PhysicalOperator;
use crate::common::{LabelId, NodeId, Value, NODE_MORSEL_SIZE};
use crate::error::Result;
use crate::expression::ExprEvaluator;
use crate::index::HashIndex;
use crate::processor::semi_mask::NodeSemiMask;
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::storage::NodeTable;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Morsel cursor shared by every clone of one scan.
pub struct ScanNodeIdSharedState {
    cursor: AtomicU64,
    num_nodes: u64,
    mask: Option<Arc<NodeSemiMask>>,
}

impl ScanNodeIdSharedState {
    pub fn new(num_nodes: u64, mask: Option<Arc<NodeSemiMask>>) -> Self {
        Self { cursor: AtomicU64::new(0), num_nodes, mask }
    }
}

/// Emits node offsets of one label in morsel-sized unflat batches.
pub struct ScanNodeId {
    id: u32,
    label: LabelId,
    table: Arc<NodeTable>,
    shared: Arc<ScanNodeIdSharedState>,
    out: DataPos,
}

impl ScanNodeId {
    pub fn new(
        id: u32,
        label: LabelId,
        table: Arc<NodeTable>,
        shared: Arc<ScanNodeIdSharedState>,
        out: DataPos,
    ) -> Self {
        Self { id, label, table, shared, out }
    }
}

impl PhysicalOperator for ScanNodeId {
    fn name(&self) -> &'static str {
        "SCAN_NODE_ID"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn init(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        loop {
            if ctx.should_stop() {
                return Ok(false);
            }
            let start = self.shared.cursor.fetch_add(NODE_MORSEL_SIZE, Ordering::AcqRel);
            if start >= self.shared.num_nodes {
                return Ok(false);
            }
            let end = (start + NODE_MORSEL_SIZE).min(self.shared.num_nodes);
            let mut n = 0usize;
            for offset in start..end {
                if self.table.is_deleted(offset)? {
                    continue;
                }
                if let Some(mask) = &self.shared.mask {
                    if !mask.allows(offset) {
                        continue;
                    }
                }
                rs.vector_mut(self.out)
                    .set_value(n, Value::Node(NodeId { label: self.label, offset }));
                n += 1;
            }
            if n > 0 {
                rs.chunk_state_mut(self.out.chunk).reset_identity(n);
                rs.multiplicity = 1;
                ctx.profiler.add_tuples(self.id, self.name(), n as u64);
                return Ok(true);
            }
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            label: self.label,
            table: Arc::clone(&self.table),
            shared: Arc::clone(&self.shared),
            out: self.out,
        })
    }
}

/// Primary-key point lookup replacing a full scan: emits zero or one node.
/// The single lookup is claimed atomically so only one worker produces it.
pub struct IndexScan {
    id: u32,
    label: LabelId,
    key: ExprEvaluator,
    index: Arc<HashIndex>,
    table: Arc<NodeTable>,
    out: DataPos,
    claimed: Arc<std::sync::atomic::AtomicBool>,
}

impl IndexScan {
    pub fn new(
        id: u32,
        label: LabelId,
        key: ExprEvaluator,
        index: Arc<HashIndex>,
        table: Arc<NodeTable>,
        out: DataPos,
    ) -> Self {
        Self {
            id,
            label,
            key,
            index,
            table,
            out,
            claimed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl PhysicalOperator for IndexScan {
    fn name(&self) -> &'static str {
        "INDEX_SCAN_NODE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn init(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        if ctx.should_stop() || self.claimed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.key.evaluate(rs, ctx)?;
        let key_value = {
            let (vector, state) = self.key.resolve(rs);
            vector.value(state.curr_position()).clone()
        };
        if key_value.is_null() {
            return Ok(false);
        }
        let Some(offset) = self.index.lookup(&key_value)? else {
            return Ok(false);
        };
        if self.table.is_deleted(offset)? {
            return Ok(false);
        }
        rs.vector_mut(self.out)
            .set_value(0, Value::Node(NodeId { label: self.label, offset }));
        rs.chunk_state_mut(self.out.chunk).reset_identity(1);
        rs.multiplicity = 1;
        ctx.profiler.add_tuples(self.id, self.name(), 1);
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            label: self.label,
            key: self.key.clone(),
            index: Arc::clone(&self.index),
            table: Arc::clone(&self.table),
            out: self.out,
            claimed: Arc::clone(&self.claimed),
        })
    }
}
