use super::PhysicalOperator;
use crate::common::{Value, DEFAULT_VECTOR_CAPACITY};
use crate::error::{GraphError, Result};
use crate::expression::ExprEvaluator;
use crate::processor::{DataPos, ExecutionContext, ResultSet};

/// Expands a list value into one row per element. Acts as a source when
/// UNWIND opens the query, otherwise unwinds once per input row, emitting
/// capacity-bounded unflat batches.
pub struct Unwind {
    id: u32,
    child: Option<Box<dyn PhysicalOperator>>,
    list: ExprEvaluator,
    out: DataPos,
    buffer: Vec<Value>,
    cursor: usize,
    source_done: bool,
}

impl Unwind {
    pub fn new(
        id: u32,
        child: Option<Box<dyn PhysicalOperator>>,
        list: ExprEvaluator,
        out: DataPos,
    ) -> Self {
        Self { id, child, list, out, buffer: Vec::new(), cursor: 0, source_done: false }
    }
}

impl PhysicalOperator for Unwind {
    fn name(&self) -> &'static str {
        "UNWIND"
    }

    fn is_source(&self) -> bool {
        self.child.is_none()
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.buffer.clear();
        self.cursor = 0;
        self.source_done = false;
        if let Some(child) = &mut self.child {
            child.init(rs, ctx)?;
        }
        Ok(())
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        loop {
            if self.cursor < self.buffer.len() {
                let n = (self.buffer.len() - self.cursor).min(DEFAULT_VECTOR_CAPACITY);
                for i in 0..n {
                    rs.vector_mut(self.out).set_value(i, self.buffer[self.cursor + i].clone());
                }
                rs.chunk_state_mut(self.out.chunk).reset_identity(n);
                self.cursor += n;
                ctx.profiler.add_tuples(self.id, self.name(), n as u64);
                return Ok(true);
            }
            match &mut self.child {
                Some(child) => {
                    if !child.next(rs, ctx)? {
                        return Ok(false);
                    }
                }
                None => {
                    if self.source_done || ctx.should_stop() {
                        return Ok(false);
                    }
                    self.source_done = true;
                    rs.multiplicity = 1;
                }
            }
            self.list.evaluate(rs, ctx)?;
            let value = {
                let (vector, state) = self.list.resolve(rs);
                vector.value(state.curr_position()).clone()
            };
            self.cursor = 0;
            self.buffer = match value {
                Value::List(values) => values,
                Value::Null => Vec::new(),
                other => {
                    return Err(GraphError::Runtime(format!(
                        "UNWIND expects a list, got {}",
                        other.data_type()
                    )))
                }
            };
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.as_ref().map(|c| c.clone_op()),
            list: self.list.clone(),
            out: self.out,
            buffer: Vec::new(),
            cursor: 0,
            source_done: false,
        })
    }
}
