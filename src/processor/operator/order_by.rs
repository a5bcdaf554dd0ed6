use super::aggregate::order_values;
use super::PhysicalOperator;
use crate::common::{Value, DEFAULT_VECTOR_CAPACITY};
use crate::error::Result;
use crate::expression::ExprEvaluator;
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct SortRow {
    keys: Vec<Value>,
    payload: Vec<Value>,
}

fn compare_rows(a: &SortRow, b: &SortRow, ascending: &[bool]) -> CmpOrdering {
    for (i, (x, y)) in a.keys.iter().zip(&b.keys).enumerate() {
        let mut ord = order_values(x, y);
        if !ascending.get(i).copied().unwrap_or(true) {
            ord = ord.reverse();
        }
        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

/// Sorted runs produced by the workers, merged once, then rescanned.
pub struct OrderBySharedState {
    ascending: Vec<bool>,
    runs: Mutex<Vec<Vec<SortRow>>>,
    merged: Mutex<Vec<SortRow>>,
    cursor: AtomicUsize,
}

impl OrderBySharedState {
    pub fn new(ascending: Vec<bool>) -> Self {
        Self {
            ascending,
            runs: Mutex::new(Vec::new()),
            merged: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

/// Materializes fully flattened tuples with their sort keys into a local
/// run; runs are k-way merged at finalization.
pub struct OrderBySink {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    keys: Vec<ExprEvaluator>,
    payload: Vec<DataPos>,
    shared: Arc<OrderBySharedState>,
    local: Vec<SortRow>,
    flushed: bool,
}

impl OrderBySink {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        keys: Vec<ExprEvaluator>,
        payload: Vec<DataPos>,
        shared: Arc<OrderBySharedState>,
    ) -> Self {
        Self { id, child, keys, payload, shared, local: Vec::new(), flushed: false }
    }
}

impl PhysicalOperator for OrderBySink {
    fn name(&self) -> &'static str {
        "ORDER_BY"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.local.clear();
        self.flushed = false;
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            if !self.flushed {
                self.flushed = true;
                let ascending = self.shared.ascending.clone();
                self.local.sort_by(|a, b| compare_rows(a, b, &ascending));
                let run = std::mem::take(&mut self.local);
                if !run.is_empty() {
                    self.shared.runs.lock().push(run);
                }
            }
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        let mut keys = Vec::with_capacity(self.keys.len());
        for eval in &mut self.keys {
            eval.evaluate(rs, ctx)?;
            let (vector, state) = eval.resolve(rs);
            keys.push(vector.value(state.curr_position()).clone());
        }
        let payload: Vec<Value> = self
            .payload
            .iter()
            .map(|&pos| {
                let state = rs.chunk_state(pos.chunk);
                rs.vector(pos).value(state.curr_position()).clone()
            })
            .collect();
        for _ in 0..rs.multiplicity {
            self.local.push(SortRow { keys: keys.clone(), payload: payload.clone() });
        }
        Ok(true)
    }

    fn finalize(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        // K-way merge of the workers' sorted runs; the run count is small
        // (one per worker), so a repeated minimum over the heads does.
        let runs = std::mem::take(&mut *self.shared.runs.lock());
        let ascending = self.shared.ascending.clone();
        let mut merged = Vec::with_capacity(runs.iter().map(Vec::len).sum());
        let mut heads: Vec<usize> = vec![0; runs.len()];
        loop {
            let mut best: Option<usize> = None;
            for (run_idx, run) in runs.iter().enumerate() {
                if heads[run_idx] >= run.len() {
                    continue;
                }
                best = match best {
                    None => Some(run_idx),
                    Some(current)
                        if compare_rows(
                            &run[heads[run_idx]],
                            &runs[current][heads[current]],
                            &ascending,
                        ) == CmpOrdering::Less =>
                    {
                        Some(run_idx)
                    }
                    other => other,
                };
            }
            match best {
                Some(run_idx) => {
                    merged.push(runs[run_idx][heads[run_idx]].clone());
                    heads[run_idx] += 1;
                }
                None => break,
            }
        }
        *self.shared.merged.lock() = merged;
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            keys: self.keys.clone(),
            payload: self.payload.clone(),
            shared: Arc::clone(&self.shared),
            local: Vec::new(),
            flushed: false,
        })
    }
}

/// Re-scans the merged table in order.
pub struct OrderByScan {
    id: u32,
    outputs: Vec<DataPos>,
    shared: Arc<OrderBySharedState>,
}

impl OrderByScan {
    pub fn new(id: u32, outputs: Vec<DataPos>, shared: Arc<OrderBySharedState>) -> Self {
        Self { id, outputs, shared }
    }
}

impl PhysicalOperator for OrderByScan {
    fn name(&self) -> &'static str {
        "ORDER_BY_SCAN"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn init(&mut self, _rs: &mut ResultSet, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        if ctx.should_stop() {
            return Ok(false);
        }
        let merged = self.shared.merged.lock();
        let start = self.shared.cursor.fetch_add(DEFAULT_VECTOR_CAPACITY, Ordering::AcqRel);
        if start >= merged.len() {
            return Ok(false);
        }
        let end = (start + DEFAULT_VECTOR_CAPACITY).min(merged.len());
        let batch: Vec<SortRow> = merged[start..end].to_vec();
        drop(merged);
        let n = batch.len();
        for (i, row) in batch.into_iter().enumerate() {
            for (value, &out) in row.payload.into_iter().zip(&self.outputs) {
                rs.vector_mut(out).set_value(i, value);
            }
        }
        rs.chunk_state_mut(self.outputs[0].chunk).reset_identity(n);
        rs.multiplicity = 1;
        ctx.profiler.add_tuples(self.id, self.name(), n as u64);
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self { id: self.id, outputs: self.outputs.clone(), shared: Arc::clone(&self.shared) })
    }
}
