use super::PhysicalOperator;
use crate::common::{GroupKey, Value, DEFAULT_VECTOR_CAPACITY};
use crate::error::{GraphError, Result};
use crate::expression::{AggregateFunction, ExprEvaluator};
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::vector::compare_values;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AggDesc {
    pub function: AggregateFunction,
    pub distinct: bool,
    pub has_input: bool,
}

/// Running state for one aggregate within one group.
#[derive(Debug, Clone)]
struct AggState {
    count: u64,
    sum: Value,
    min: Value,
    max: Value,
    collected: Vec<Value>,
    collecting: bool,
    seen: Option<HashSet<GroupKey>>,
}

impl AggState {
    fn new(desc: &AggDesc) -> Self {
        Self {
            count: 0,
            sum: Value::Null,
            min: Value::Null,
            max: Value::Null,
            collected: Vec::new(),
            collecting: desc.function == AggregateFunction::Collect,
            seen: desc.distinct.then(HashSet::new),
        }
    }

    fn update(&mut self, value: &Value, weight: u64) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            if !seen.insert(GroupKey(vec![value.clone()])) {
                return Ok(());
            }
        }
        let weight = if self.seen.is_some() { 1 } else { weight };
        self.count += weight;
        self.sum = match (&self.sum, value.as_double()) {
            (Value::Null, Some(_)) => match value {
                Value::Int64(v) => Value::Int64(v * weight as i64),
                _ => Value::Double(value.as_double().unwrap_or(0.0) * weight as f64),
            },
            (Value::Int64(acc), Some(_)) => match value {
                Value::Int64(v) => Value::Int64(acc + v * weight as i64),
                _ => Value::Double(*acc as f64 + value.as_double().unwrap_or(0.0) * weight as f64),
            },
            (Value::Double(acc), Some(v)) => Value::Double(acc + v * weight as f64),
            (acc, None) => acc.clone(),
            (acc, Some(_)) => acc.clone(),
        };
        let replace_min = match &self.min {
            Value::Null => true,
            current => matches!(compare_values(value, current)?, Some(CmpOrdering::Less)),
        };
        if replace_min {
            self.min = value.clone();
        }
        let replace_max = match &self.max {
            Value::Null => true,
            current => matches!(compare_values(value, current)?, Some(CmpOrdering::Greater)),
        };
        if replace_max {
            self.max = value.clone();
        }
        if self.collecting {
            for _ in 0..weight {
                self.collected.push(value.clone());
            }
        }
        Ok(())
    }

    fn update_count_star(&mut self, tuples: u64) {
        self.count += tuples;
    }

    fn finalize(&self, function: AggregateFunction) -> Value {
        match function {
            AggregateFunction::Count => Value::Int64(self.count as i64),
            AggregateFunction::Sum => self.sum.clone(),
            AggregateFunction::Avg => match (self.sum.as_double(), self.count) {
                (_, 0) => Value::Null,
                (Some(sum), n) => Value::Double(sum / n as f64),
                (None, _) => Value::Null,
            },
            AggregateFunction::Min => self.min.clone(),
            AggregateFunction::Max => self.max.clone(),
            AggregateFunction::Collect => Value::List(self.collected.clone()),
        }
    }
}

/// Hash-grouped aggregation state shared by build workers and the scan.
pub struct AggregateSharedState {
    descs: Vec<AggDesc>,
    groups: Mutex<HashMap<GroupKey, Vec<AggState>>>,
    rows: Mutex<Vec<Vec<Value>>>,
    cursor: AtomicUsize,
}

impl AggregateSharedState {
    pub fn new(descs: Vec<AggDesc>) -> Self {
        Self {
            descs,
            groups: Mutex::new(HashMap::new()),
            rows: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

/// Sink half: drains its child, folding every tuple into per-group states.
pub struct AggregateBuild {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    group_keys: Vec<ExprEvaluator>,
    inputs: Vec<Option<ExprEvaluator>>,
    shared: Arc<AggregateSharedState>,
}

impl AggregateBuild {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        group_keys: Vec<ExprEvaluator>,
        inputs: Vec<Option<ExprEvaluator>>,
        shared: Arc<AggregateSharedState>,
    ) -> Self {
        Self { id, child, group_keys, inputs, shared }
    }
}

impl PhysicalOperator for AggregateBuild {
    fn name(&self) -> &'static str {
        "AGGREGATE"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        // Group keys are flat by construction.
        let mut key = Vec::with_capacity(self.group_keys.len());
        for eval in &mut self.group_keys {
            eval.evaluate(rs, ctx)?;
            let (vector, state) = eval.resolve(rs);
            key.push(vector.value(state.curr_position()).clone());
        }
        // Aggregate inputs may be factorized; gather all live values.
        let mut per_agg_values: Vec<Option<Vec<Value>>> = Vec::with_capacity(self.inputs.len());
        for input in &mut self.inputs {
            match input {
                Some(eval) => {
                    eval.evaluate(rs, ctx)?;
                    let (vector, state) = eval.resolve(rs);
                    per_agg_values
                        .push(Some(state.positions().map(|p| vector.value(p).clone()).collect()));
                }
                None => per_agg_values.push(None),
            }
        }
        let tuples = rs.active_tuple_count();
        let weight = rs.multiplicity;
        let mut groups = self.shared.groups.lock();
        let states = groups
            .entry(GroupKey(key))
            .or_insert_with(|| self.shared.descs.iter().map(AggState::new).collect());
        for (i, values) in per_agg_values.iter().enumerate() {
            match values {
                Some(values) => {
                    for value in values {
                        states[i].update(value, weight)?;
                    }
                }
                None => states[i].update_count_star(tuples),
            }
        }
        Ok(true)
    }

    fn finalize(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let mut groups = self.shared.groups.lock();
        // A global aggregate over no input still produces one row.
        if groups.is_empty() && self.group_keys.is_empty() {
            let states: Vec<AggState> = self.shared.descs.iter().map(AggState::new).collect();
            groups.insert(GroupKey(Vec::new()), states);
        }
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(groups.len());
        for (key, states) in groups.drain() {
            let mut row = key.0;
            for (state, desc) in states.iter().zip(&self.shared.descs) {
                row.push(state.finalize(desc.function));
            }
            rows.push(row);
        }
        // Hash order is nondeterministic; fix an output order.
        rows.sort_by(|a, b| {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = order_values(x, y);
                if ord != CmpOrdering::Equal {
                    return ord;
                }
            }
            CmpOrdering::Equal
        });
        *self.shared.rows.lock() = rows;
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            group_keys: self.group_keys.clone(),
            inputs: self.inputs.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Total order over values for deterministic output: nulls last, type tag
/// breaks cross-type ties.
pub(crate) fn order_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return CmpOrdering::Equal,
        (true, false) => return CmpOrdering::Greater,
        (false, true) => return CmpOrdering::Less,
        _ => {}
    }
    match compare_values(a, b) {
        Ok(Some(ord)) => ord,
        _ => format!("{a}").cmp(&format!("{b}")),
    }
}

/// Source half: emits the finalized groups in batches.
pub struct AggregateScan {
    id: u32,
    outputs: Vec<DataPos>,
    shared: Arc<AggregateSharedState>,
}

impl AggregateScan {
    pub fn new(id: u32, outputs: Vec<DataPos>, shared: Arc<AggregateSharedState>) -> Self {
        Self { id, outputs, shared }
    }
}

impl PhysicalOperator for AggregateScan {
    fn name(&self) -> &'static str {
        "AGGREGATE_SCAN"
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
        let rows = self.shared.rows.lock();
        let start = self.shared.cursor.fetch_add(DEFAULT_VECTOR_CAPACITY, Ordering::AcqRel);
        if start >= rows.len() {
            return Ok(false);
        }
        let end = (start + DEFAULT_VECTOR_CAPACITY).min(rows.len());
        let batch: Vec<Vec<Value>> = rows[start..end].to_vec();
        drop(rows);
        let n = batch.len();
        for (i, row) in batch.into_iter().enumerate() {
            if row.len() != self.outputs.len() {
                return Err(GraphError::Runtime(
                    "aggregate row width does not match output slots".to_string(),
                ));
            }
            for (value, &out) in row.into_iter().zip(&self.outputs) {
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
