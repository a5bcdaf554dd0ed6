use super::PhysicalOperator;
use crate::common::{Direction, LabelId, NodeId, PropertyId, RelId, Value, DEFAULT_VECTOR_CAPACITY};
use crate::error::Result;
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::storage::{scan_adjacency, ListSyncState, RelTable};
use parking_lot::Mutex;
use std::sync::Arc;

/// Walks one adjacency structure. Column adjacency writes the neighbour
/// into the bound chunk (narrowing its selection to sources that have an
/// edge); list adjacency consumes a flat source and produces unflat
/// neighbour batches, resuming long lists across calls through the chunk's
/// shared list cursor. Needed rel properties are read in lockstep.
pub struct Extend {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    input: DataPos,
    out_nbr: DataPos,
    out_rel: DataPos,
    rel_properties: Vec<(PropertyId, DataPos)>,
    table: Arc<RelTable>,
    direction: Direction,
    is_column: bool,
    nbr_label: LabelId,
    rel_label: LabelId,
    current_src: Option<u64>,
    sync: Option<Arc<Mutex<ListSyncState>>>,
}

impl Extend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        input: DataPos,
        out_nbr: DataPos,
        out_rel: DataPos,
        rel_properties: Vec<(PropertyId, DataPos)>,
        table: Arc<RelTable>,
        direction: Direction,
        is_column: bool,
        nbr_label: LabelId,
        rel_label: LabelId,
    ) -> Self {
        Self {
            id,
            child,
            input,
            out_nbr,
            out_rel,
            rel_properties,
            table,
            direction,
            is_column,
            nbr_label,
            rel_label,
            current_src: None,
            sync: None,
        }
    }

    fn write_neighbor(
        &self,
        rs: &mut ResultSet,
        pos: usize,
        nbr: u64,
        rel: u64,
    ) -> Result<()> {
        rs.vector_mut(self.out_nbr)
            .set_value(pos, Value::Node(NodeId { label: self.nbr_label, offset: nbr }));
        rs.vector_mut(self.out_rel)
            .set_value(pos, Value::Rel(RelId { label: self.rel_label, offset: rel }));
        for &(property_id, out) in &self.rel_properties {
            let value = self.table.property_column(property_id).read_value(rel)?;
            rs.vector_mut(out).set_value(pos, value);
        }
        Ok(())
    }

    fn next_column(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        loop {
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let positions: Vec<usize> = rs.chunk_state(self.input.chunk).positions().collect();
            let was_flat = rs.chunk_state(self.input.chunk).is_flat();
            let mut surviving = Vec::with_capacity(positions.len());
            for pos in positions {
                let Some(node) = rs.vector(self.input).value(pos).as_node() else {
                    continue;
                };
                let mut sync = ListSyncState::default();
                let pairs =
                    scan_adjacency(&self.table, self.direction, node.offset, &mut sync, 1)?;
                if let Some(&(nbr, rel)) = pairs.first() {
                    self.write_neighbor(rs, pos, nbr, rel)?;
                    surviving.push(pos);
                }
            }
            if was_flat {
                if !surviving.is_empty() {
                    return Ok(true);
                }
            } else {
                let n = surviving.len();
                rs.chunk_state_mut(self.input.chunk).selected_positions = surviving;
                if n > 0 {
                    return Ok(true);
                }
            }
        }
    }

    fn next_lists(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let sync = self.sync.clone().expect("list extend initialized");
        loop {
            if let Some(src) = self.current_src {
                let pairs = {
                    let mut sync = sync.lock();
                    scan_adjacency(
                        &self.table,
                        self.direction,
                        src,
                        &mut sync,
                        DEFAULT_VECTOR_CAPACITY,
                    )?
                };
                if !pairs.is_empty() {
                    for (i, &(nbr, rel)) in pairs.iter().enumerate() {
                        self.write_neighbor(rs, i, nbr, rel)?;
                    }
                    rs.chunk_state_mut(self.out_nbr.chunk).reset_identity(pairs.len());
                    ctx.profiler.add_tuples(self.id, self.name(), pairs.len() as u64);
                    return Ok(true);
                }
                self.current_src = None;
            }
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let state = rs.chunk_state(self.input.chunk);
            let node = rs.vector(self.input).value(state.curr_position()).as_node();
            if let Some(node) = node {
                self.current_src = Some(node.offset);
                *sync.lock() = ListSyncState::default();
            }
        }
    }
}

impl PhysicalOperator for Extend {
    fn name(&self) -> &'static str {
        "EXTEND"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)?;
        if !self.is_column {
            let sync = Arc::new(Mutex::new(ListSyncState::default()));
            rs.list_syncs[self.out_nbr.chunk] = Some(Arc::clone(&sync));
            self.sync = Some(sync);
            self.current_src = None;
        }
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        if self.is_column {
            self.next_column(rs, ctx)
        } else {
            self.next_lists(rs, ctx)
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            input: self.input,
            out_nbr: self.out_nbr,
            out_rel: self.out_rel,
            rel_properties: self.rel_properties.clone(),
            table: Arc::clone(&self.table),
            direction: self.direction,
            is_column: self.is_column,
            nbr_label: self.nbr_label,
            rel_label: self.rel_label,
            current_src: None,
            sync: None,
        })
    }
}
