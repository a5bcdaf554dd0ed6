use super::extend::Extend;
use super::result_collector::SharedFactorizedTable;
use super::PhysicalOperator;
use crate::common::{
    Direction, LabelId, NodeId, NodeOffset, Value, DEFAULT_VECTOR_CAPACITY,
};
use crate::error::Result;
use crate::processor::semi_mask::NodeSemiMask;
use crate::processor::{DataPos, ExecutionContext, ResultSet, ResultSetDescriptor};
use crate::storage::RelTable;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source of the recursive join's inner plan: emits the single frontier
/// node it was handed, once, then reports exhaustion until re-armed.
pub struct ScanFrontier {
    id: u32,
    out: DataPos,
    cell: Arc<Mutex<Option<NodeId>>>,
}

impl ScanFrontier {
    pub fn new(id: u32, out: DataPos, cell: Arc<Mutex<Option<NodeId>>>) -> Self {
        Self { id, out, cell }
    }
}

impl PhysicalOperator for ScanFrontier {
    fn name(&self) -> &'static str {
        "SCAN_FRONTIER"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn init(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<bool> {
        let Some(node) = self.cell.lock().take() else {
            return Ok(false);
        };
        rs.vector_mut(self.out).set_value(0, Value::Node(node));
        let state = rs.chunk_state_mut(self.out.chunk);
        state.reset_identity(1);
        state.curr_idx = Some(0);
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self { id: self.id, out: self.out, cell: Arc::clone(&self.cell) })
    }
}

/// Input table of sources plus the per-statement morsel cursor (one source
/// tuple per morsel) and the semi-mask advertising reached destinations.
pub struct RecursiveJoinSharedState {
    pub input: Arc<SharedFactorizedTable>,
    cursor: AtomicUsize,
    pub semi_mask: Arc<NodeSemiMask>,
}

impl RecursiveJoinSharedState {
    pub fn new(input: Arc<SharedFactorizedTable>, num_nbr_nodes: u64) -> Self {
        Self {
            input,
            cursor: AtomicUsize::new(0),
            semi_mask: Arc::new(NodeSemiMask::new(num_nbr_nodes)),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct LevelEntry {
    multiplicity: u64,
    parents: Vec<(NodeOffset, u64)>,
}

/// One finished BFS: per-level reached nodes with path multiplicities and,
/// when paths are tracked, the parent edges to rebuild them.
struct BfsLevels {
    src: NodeOffset,
    levels: Vec<HashMap<NodeOffset, LevelEntry>>,
}

/// Bounded breadth-first expansion from each source tuple. Phase one runs
/// the inner plan (ScanFrontier -> Extend) to exhaustion per frontier
/// node; phase two scans the reached frontiers out in batches.
pub struct RecursiveJoin {
    id: u32,
    shared: Arc<RecursiveJoinSharedState>,
    lower: u32,
    upper: u32,
    track_path: bool,
    /// Input-table column -> outer slot, for everything carried through.
    vectors_to_scan: Vec<(usize, DataPos)>,
    src_column: usize,
    out_dst: DataPos,
    out_length: DataPos,
    out_path: Option<DataPos>,
    // Inner plan configuration; the plan itself is built per worker.
    rel_table: Arc<RelTable>,
    direction: Direction,
    is_column_adjacency: bool,
    node_label: LabelId,
    rel_label: LabelId,
    local_descriptor: ResultSetDescriptor,
    tmp_dst: DataPos,
    // Worker-local runtime state.
    cell: Arc<Mutex<Option<NodeId>>>,
    inner: Option<Box<dyn PhysicalOperator>>,
    local_rs: Option<ResultSet>,
    output: Vec<(NodeOffset, u32, Option<Value>)>,
    output_cursor: usize,
}

impl RecursiveJoin {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        shared: Arc<RecursiveJoinSharedState>,
        lower: u32,
        upper: u32,
        track_path: bool,
        vectors_to_scan: Vec<(usize, DataPos)>,
        src_column: usize,
        out_dst: DataPos,
        out_length: DataPos,
        out_path: Option<DataPos>,
        rel_table: Arc<RelTable>,
        direction: Direction,
        is_column_adjacency: bool,
        node_label: LabelId,
        rel_label: LabelId,
    ) -> Self {
        // The inner plan's result set: frontier node in chunk 0, the
        // one-step expansion in chunk 1.
        let mut local_descriptor = ResultSetDescriptor::default();
        let c0 = local_descriptor.add_chunk();
        local_descriptor.add_vector(c0, "_frontier", crate::common::LogicalType::Node);
        let c1 = local_descriptor.add_chunk();
        let tmp_dst = local_descriptor.add_vector(c1, "_tmp_dst", crate::common::LogicalType::Node);
        local_descriptor.add_vector(c1, "_tmp_rel", crate::common::LogicalType::Rel);
        Self {
            id,
            shared,
            lower,
            upper,
            track_path,
            vectors_to_scan,
            src_column,
            out_dst,
            out_length,
            out_path,
            rel_table,
            direction,
            is_column_adjacency,
            node_label,
            rel_label,
            local_descriptor,
            tmp_dst,
            cell: Arc::new(Mutex::new(None)),
            inner: None,
            local_rs: None,
            output: Vec::new(),
            output_cursor: 0,
        }
    }

    fn build_inner_plan(&self) -> Box<dyn PhysicalOperator> {
        let frontier = ScanFrontier::new(self.id, DataPos::new(0, 0), Arc::clone(&self.cell));
        Box::new(Extend::new(
            self.id,
            Box::new(frontier),
            DataPos::new(0, 0),
            DataPos::new(1, 0),
            DataPos::new(1, 1),
            Vec::new(),
            Arc::clone(&self.rel_table),
            self.direction,
            self.is_column_adjacency,
            self.node_label,
            self.rel_label,
        ))
    }

    fn compute_bfs(&mut self, src: NodeOffset, ctx: &ExecutionContext) -> Result<BfsLevels> {
        let mut inner = self.inner.take().expect("inner plan initialized");
        let mut local_rs = self.local_rs.take().expect("local result set initialized");

        let mut levels: Vec<HashMap<NodeOffset, LevelEntry>> = Vec::new();
        let mut level0 = HashMap::new();
        level0.insert(src, LevelEntry { multiplicity: 1, parents: Vec::new() });
        levels.push(level0);
        let mut visited: HashSet<NodeOffset> = HashSet::new();
        visited.insert(src);

        for depth in 1..=self.upper {
            let current: Vec<(NodeOffset, u64)> = levels[depth as usize - 1]
                .iter()
                .map(|(&n, e)| (n, e.multiplicity))
                .collect();
            let mut next: HashMap<NodeOffset, LevelEntry> = HashMap::new();
            for (node, multiplicity) in current {
                if ctx.is_cancelled() {
                    break;
                }
                self.cell.lock().replace(NodeId { label: self.node_label, offset: node });
                while inner.next(&mut local_rs, ctx)? {
                    let state = local_rs.chunk_state(self.tmp_dst.chunk);
                    let pairs: Vec<(NodeOffset, u64)> = state
                        .positions()
                        .filter_map(|pos| {
                            let dst = local_rs.vector(self.tmp_dst).value(pos).as_node()?;
                            let rel = match local_rs
                                .vector(DataPos::new(self.tmp_dst.chunk, 1))
                                .value(pos)
                            {
                                Value::Rel(rel) => rel.offset,
                                _ => return None,
                            };
                            Some((dst.offset, rel))
                        })
                        .collect();
                    for (dst, rel) in pairs {
                        // Accumulate within the level; never re-expand a
                        // node reached at an earlier level.
                        if let Some(entry) = next.get_mut(&dst) {
                            entry.multiplicity += multiplicity;
                            if self.track_path {
                                entry.parents.push((node, rel));
                            }
                        } else if !visited.contains(&dst) {
                            visited.insert(dst);
                            let mut entry =
                                LevelEntry { multiplicity, parents: Vec::new() };
                            if self.track_path {
                                entry.parents.push((node, rel));
                            }
                            next.insert(dst, entry);
                        }
                    }
                }
            }
            let done = next.is_empty();
            levels.push(next);
            if done {
                break;
            }
        }
        self.inner = Some(inner);
        self.local_rs = Some(local_rs);
        Ok(BfsLevels { src, levels })
    }

    fn enumerate_paths(&self, bfs: &BfsLevels, depth: u32, node: NodeOffset) -> Vec<Vec<Value>> {
        if depth == 0 {
            return vec![vec![Value::Node(NodeId { label: self.node_label, offset: node })]];
        }
        let mut out = Vec::new();
        if let Some(entry) = bfs.levels[depth as usize].get(&node) {
            for &(parent, rel) in &entry.parents {
                for mut path in self.enumerate_paths(bfs, depth - 1, parent) {
                    path.push(Value::Rel(crate::common::RelId {
                        label: self.rel_label,
                        offset: rel,
                    }));
                    path.push(Value::Node(NodeId { label: self.node_label, offset: node }));
                    out.push(path);
                }
            }
        }
        out
    }

    /// Flattens the finished BFS into the emission queue: every level in
    /// [lower, upper], each destination once per distinct path when paths
    /// are tracked, otherwise once per path multiplicity.
    fn build_output(&mut self, bfs: &BfsLevels) {
        self.output.clear();
        self.output_cursor = 0;
        for depth in self.lower..=self.upper {
            if depth == 0 {
                let path = self
                    .track_path
                    .then(|| Value::List(vec![Value::Node(NodeId { label: self.node_label, offset: bfs.src })]));
                self.output.push((bfs.src, 0, path));
                continue;
            }
            let Some(level) = bfs.levels.get(depth as usize) else {
                break;
            };
            let mut nodes: Vec<&NodeOffset> = level.keys().collect();
            nodes.sort();
            for &dst in nodes {
                if self.track_path {
                    for path in self.enumerate_paths(bfs, depth, dst) {
                        self.output.push((dst, depth, Some(Value::List(path))));
                    }
                } else {
                    let multiplicity = level[&dst].multiplicity;
                    for _ in 0..multiplicity {
                        self.output.push((dst, depth, None));
                    }
                }
                self.shared.semi_mask.mark(dst);
            }
        }
    }

    fn emit_batch(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) {
        let n = (self.output.len() - self.output_cursor).min(DEFAULT_VECTOR_CAPACITY);
        for i in 0..n {
            let (dst, length, path) = self.output[self.output_cursor + i].clone();
            rs.vector_mut(self.out_dst)
                .set_value(i, Value::Node(NodeId { label: self.node_label, offset: dst }));
            rs.vector_mut(self.out_length).set_value(i, Value::Int64(length as i64));
            if let (Some(pos), Some(path)) = (self.out_path, path) {
                rs.vector_mut(pos).set_value(i, path);
            }
        }
        self.output_cursor += n;
        rs.chunk_state_mut(self.out_dst.chunk).reset_identity(n);
        ctx.profiler.add_tuples(self.id, self.name(), n as u64);
    }
}

impl PhysicalOperator for RecursiveJoin {
    fn name(&self) -> &'static str {
        "RECURSIVE_JOIN"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn init(&mut self, _rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        let mut local_rs = self.local_descriptor.make_result_set();
        let mut inner = self.build_inner_plan();
        inner.init(&mut local_rs, ctx)?;
        self.inner = Some(inner);
        self.local_rs = Some(local_rs);
        self.output.clear();
        self.output_cursor = 0;
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        loop {
            if self.output_cursor < self.output.len() {
                self.emit_batch(rs, ctx);
                return Ok(true);
            }
            if ctx.should_stop() {
                return Ok(false);
            }
            // Grab a new source tuple; one BFS per morsel.
            let row_idx = self.shared.cursor.fetch_add(1, Ordering::AcqRel);
            let Some((values, multiplicity)) = self.shared.input.row_values(row_idx) else {
                return Ok(false);
            };
            let src = match values.get(self.src_column).and_then(|v| v.as_node()) {
                Some(node) => node.offset,
                None => continue,
            };
            let mut touched = HashSet::new();
            for &(column, pos) in &self.vectors_to_scan {
                rs.vector_mut(pos).set_value(0, values[column].clone());
                touched.insert(pos.chunk);
            }
            for chunk in touched {
                *rs.chunk_state_mut(chunk) = crate::vector::ChunkState::flat_single();
            }
            rs.multiplicity = multiplicity;
            let bfs = self.compute_bfs(src, ctx)?;
            if ctx.is_cancelled() {
                return Ok(false);
            }
            self.build_output(&bfs);
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        let mut clone = Self::new(
            self.id,
            Arc::clone(&self.shared),
            self.lower,
            self.upper,
            self.track_path,
            self.vectors_to_scan.clone(),
            self.src_column,
            self.out_dst,
            self.out_length,
            self.out_path,
            Arc::clone(&self.rel_table),
            self.direction,
            self.is_column_adjacency,
            self.node_label,
            self.rel_label,
        );
        clone.cell = Arc::new(Mutex::new(None));
        Box::new(clone)
    }
}

impl RecursiveJoin {
    /// Exposed for plan wiring: scans that run after this join may consult
    /// the mask to skip nodes no BFS reached.
    pub fn semi_mask(&self) -> Arc<NodeSemiMask> {
        Arc::clone(&self.shared.semi_mask)
    }
}
