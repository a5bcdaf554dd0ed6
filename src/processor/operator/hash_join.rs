use super::PhysicalOperator;
use crate::common::{Value, DEFAULT_VECTOR_CAPACITY};
use crate::error::{GraphError, Result};
use crate::processor::factorized_table::{FactorizedTable, TableSchema};
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::vector::ChunkState;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Build table shared between the build pipeline and every probe clone.
/// Writers append under the lock; after the single finalizer publishes the
/// hash directory, probes read without contention.
pub struct HashJoinSharedState {
    table: RwLock<FactorizedTable>,
    finalized: AtomicBool,
}

impl HashJoinSharedState {
    pub fn new(schema: TableSchema) -> Self {
        Self { table: RwLock::new(FactorizedTable::new(schema)), finalized: AtomicBool::new(false) }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

/// Drains its child into the shared table, keyed by column 0.
pub struct HashJoinBuild {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    /// Key first, then payload slots, matching the table schema.
    positions: Vec<DataPos>,
    shared: Arc<HashJoinSharedState>,
}

impl HashJoinBuild {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        positions: Vec<DataPos>,
        shared: Arc<HashJoinSharedState>,
    ) -> Self {
        Self { id, child, positions, shared }
    }
}

impl PhysicalOperator for HashJoinBuild {
    fn name(&self) -> &'static str {
        "HASH_JOIN_BUILD"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        let key_chunk = self.positions[0].chunk;
        self.shared.table.write().append_from(rs, &self.positions, Some(key_chunk))?;
        Ok(true)
    }

    fn finalize(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let mut table = self.shared.table.write();
        table.finalize_build();
        self.shared.finalized.store(true, Ordering::Release);
        tracing::debug!(rows = table.num_rows(), "hash join build finalized");
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            positions: self.positions.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Where one build-table payload column lands on the probe side.
#[derive(Debug, Clone)]
pub struct ProbePayload {
    /// Column index in the build table (key is 0).
    pub column: usize,
    pub out: DataPos,
    /// The column holds a factorized list that unnests into its own chunk.
    pub from_unflat: bool,
}

struct ProbeState {
    chain: Option<usize>,
    matches: Vec<usize>,
    pos: usize,
    base_multiplicity: u64,
}

impl ProbeState {
    fn new() -> Self {
        Self { chain: None, matches: Vec::new(), pos: 0, base_multiplicity: 1 }
    }
}

/// For each flat probe-side key, walks the build chain and emits matched
/// tuples. Matches beyond one vector re-enter the chain across calls.
pub struct HashJoinProbe {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    key: DataPos,
    payload: Vec<ProbePayload>,
    shared: Arc<HashJoinSharedState>,
    state: ProbeState,
}

impl HashJoinProbe {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        key: DataPos,
        payload: Vec<ProbePayload>,
        shared: Arc<HashJoinSharedState>,
    ) -> Self {
        Self { id, child, key, payload, shared, state: ProbeState::new() }
    }

    fn has_unflat_payload(&self) -> bool {
        self.payload.iter().any(|p| p.from_unflat)
    }

    /// Walks the chain until the match buffer fills or the chain ends.
    fn collect_matches(&mut self, key: &Value, table: &FactorizedTable) {
        self.state.matches.clear();
        self.state.pos = 0;
        while let Some(idx) = self.state.chain {
            if self.state.matches.len() == DEFAULT_VECTOR_CAPACITY {
                return;
            }
            if table.row(idx).values[0] == *key {
                self.state.matches.push(idx);
            }
            self.state.chain = table.chain_next(idx);
        }
    }

    fn populate(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let table = shared.table.read();
        if self.payload.is_empty() {
            // Key-only build: one output tuple per matched build tuple.
            let row = table.row(self.state.matches[self.state.pos]);
            self.state.pos += 1;
            rs.multiplicity = self.state.base_multiplicity * row.multiplicity;
            ctx.profiler.add_tuples(self.id, self.name(), 1);
            return Ok(());
        }
        if self.has_unflat_payload() {
            // Factorized payload: one build tuple per call, lists unnest.
            let row = table.row(self.state.matches[self.state.pos]);
            self.state.pos += 1;
            rs.multiplicity = self.state.base_multiplicity * row.multiplicity;
            let mut flat_chunks = Vec::new();
            let mut writes: Vec<(DataPos, Vec<Value>, bool)> = Vec::new();
            for p in &self.payload {
                let value = row.values[p.column].clone();
                if p.from_unflat {
                    let Value::List(values) = value else {
                        return Err(GraphError::Runtime(
                            "factorized join payload is not a list".to_string(),
                        ));
                    };
                    writes.push((p.out, values, true));
                } else {
                    flat_chunks.push(p.out.chunk);
                    writes.push((p.out, vec![value], false));
                }
            }
            drop(table);
            for (out, values, unflat) in writes {
                if unflat {
                    let n = values.len();
                    for (i, v) in values.into_iter().enumerate() {
                        rs.vector_mut(out).set_value(i, v);
                    }
                    rs.chunk_state_mut(out.chunk).reset_identity(n);
                } else {
                    rs.vector_mut(out).set_value(0, values.into_iter().next().unwrap());
                }
            }
            for chunk in flat_chunks {
                *rs.chunk_state_mut(chunk) = ChunkState::flat_single();
            }
            ctx.profiler.add_tuples(self.id, self.name(), 1);
            return Ok(());
        }
        // Flat payload: a batch of matched tuples becomes one unflat chunk.
        let out_chunk = self.payload[0].out.chunk;
        let mut emitted = 0usize;
        let mut writes: Vec<(DataPos, usize, Value)> = Vec::new();
        while self.state.pos < self.state.matches.len() {
            let row = table.row(self.state.matches[self.state.pos]);
            let copies = row.multiplicity as usize;
            if emitted + copies > DEFAULT_VECTOR_CAPACITY && emitted > 0 {
                break;
            }
            for _ in 0..copies.min(DEFAULT_VECTOR_CAPACITY) {
                for p in &self.payload {
                    writes.push((p.out, emitted, row.values[p.column].clone()));
                }
                emitted += 1;
            }
            self.state.pos += 1;
        }
        drop(table);
        for (out, pos, value) in writes {
            rs.vector_mut(out).set_value(pos, value);
        }
        rs.chunk_state_mut(out_chunk).reset_identity(emitted);
        rs.multiplicity = self.state.base_multiplicity;
        ctx.profiler.add_tuples(self.id, self.name(), emitted as u64);
        Ok(())
    }
}

impl PhysicalOperator for HashJoinProbe {
    fn name(&self) -> &'static str {
        "HASH_JOIN_PROBE"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.state = ProbeState::new();
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        debug_assert!(self.shared.is_finalized(), "probe before build finalization");
        loop {
            if self.state.pos < self.state.matches.len() {
                self.populate(rs, ctx)?;
                return Ok(true);
            }
            let shared = Arc::clone(&self.shared);
            if self.state.chain.is_some() {
                let key_value = {
                    let state = rs.chunk_state(self.key.chunk);
                    rs.vector(self.key).value(state.curr_position()).clone()
                };
                let table = shared.table.read();
                self.collect_matches(&key_value, &table);
                drop(table);
                if !self.state.matches.is_empty() {
                    continue;
                }
            }
            // Pull the next probe-side row.
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let key_value = {
                let state = rs.chunk_state(self.key.chunk);
                rs.vector(self.key).value(state.curr_position()).clone()
            };
            if key_value.is_null() {
                continue;
            }
            self.state.base_multiplicity = rs.multiplicity;
            let table = shared.table.read();
            self.state.chain = table.probe(&key_value);
            self.collect_matches(&key_value, &table);
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            key: self.key,
            payload: self.payload.clone(),
            shared: Arc::clone(&self.shared),
            state: ProbeState::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogicalType, NodeId};
    use crate::processor::factorized_table::ColumnSchema;
    use crate::processor::{Profiler, ResultSetDescriptor, TransactionType};
    use std::collections::HashMap;

    /// Emits prepared batches of node ids: unflat batches for the build
    /// side, one flat row per call for the probe side.
    struct MockScan {
        batches: Vec<Vec<Value>>,
        cursor: usize,
        out: DataPos,
        flat: bool,
    }

    impl PhysicalOperator for MockScan {
        fn name(&self) -> &'static str {
            "MOCK_SCAN"
        }

        fn is_source(&self) -> bool {
            true
        }

        fn init(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<()> {
            Ok(())
        }

        fn next(&mut self, rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<bool> {
            if self.cursor >= self.batches.len() {
                return Ok(false);
            }
            let batch = &self.batches[self.cursor];
            self.cursor += 1;
            for (i, v) in batch.iter().enumerate() {
                rs.vector_mut(self.out).set_value(i, v.clone());
            }
            let state = rs.chunk_state_mut(self.out.chunk);
            state.reset_identity(batch.len());
            if self.flat {
                state.curr_idx = Some(0);
            }
            rs.multiplicity = 1;
            Ok(true)
        }

        fn clone_op(&self) -> Box<dyn PhysicalOperator> {
            unreachable!("mock scan is single-worker")
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            TransactionType::ReadOnly,
            1,
            HashMap::new(),
            Arc::new(Profiler::new(false)),
        )
    }

    fn node(offset: u64) -> Value {
        Value::Node(NodeId { label: 0, offset })
    }

    #[test]
    fn probe_matches_equal_nested_loop_reference() {
        // Skewed key distributions on both sides, plus a null on each.
        let build_keys: Vec<Value> =
            vec![node(1), node(2), node(2), node(3), node(3), node(3), Value::Null];
        let probe_keys: Vec<Value> =
            vec![node(2), node(3), node(9), Value::Null, node(1), node(3)];

        let mut descriptor = ResultSetDescriptor::default();
        let c0 = descriptor.add_chunk();
        let key = descriptor.add_vector(c0, "k", LogicalType::Node);

        let shared = Arc::new(HashJoinSharedState::new(TableSchema {
            columns: vec![ColumnSchema {
                name: "k".to_string(),
                data_type: LogicalType::Node,
                is_unflat: false,
            }],
        }));
        let ctx = ctx();

        // Build phase.
        let build_child =
            MockScan { batches: vec![build_keys.clone()], cursor: 0, out: key, flat: false };
        let mut build = HashJoinBuild::new(0, Box::new(build_child), vec![key], Arc::clone(&shared));
        let mut rs = descriptor.make_result_set();
        build.init(&mut rs, &ctx).unwrap();
        while build.next(&mut rs, &ctx).unwrap() {}
        build.finalize(&ctx).unwrap();

        // Probe phase: key-only build, so one output tuple per match.
        let probe_child = MockScan {
            batches: probe_keys.iter().map(|k| vec![k.clone()]).collect(),
            cursor: 0,
            out: key,
            flat: true,
        };
        let mut probe = HashJoinProbe::new(1, Box::new(probe_child), key, Vec::new(), shared);
        let mut rs = descriptor.make_result_set();
        probe.init(&mut rs, &ctx).unwrap();
        let mut matched = Vec::new();
        while probe.next(&mut rs, &ctx).unwrap() {
            let pos = rs.chunk_state(key.chunk).curr_position();
            matched.push(rs.vector(key).value(pos).clone());
        }

        // Nested-loop reference over the same inputs.
        let mut expected = Vec::new();
        for p in &probe_keys {
            for b in &build_keys {
                if !p.is_null() && !b.is_null() && p == b {
                    expected.push(p.clone());
                }
            }
        }
        let count_of = |values: &[Value], key: &Value| {
            values.iter().filter(|v| *v == key).count()
        };
        for k in [node(1), node(2), node(3), node(9)] {
            assert_eq!(count_of(&matched, &k), count_of(&expected, &k), "key {k}");
        }
        assert_eq!(matched.len(), expected.len());
    }
}
