use super::PhysicalOperator;
use crate::error::Result;
use crate::expression::ExprEvaluator;
use crate::processor::{ExecutionContext, ResultSet};

/// Applies a boolean predicate through the evaluator's select shape,
/// narrowing the governing unflat chunk's selection to the survivors.
pub struct Filter {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    predicate: ExprEvaluator,
}

impl Filter {
    pub fn new(id: u32, child: Box<dyn PhysicalOperator>, predicate: ExprEvaluator) -> Self {
        Self { id, child, predicate }
    }
}

impl PhysicalOperator for Filter {
    fn name(&self) -> &'static str {
        "FILTER"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        loop {
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let _timer = ctx.profiler.timer(self.id, self.name());
            let governing = self.predicate.unflat_chunk_pos(rs);
            let mut survivors = Vec::new();
            let count = self.predicate.select(rs, ctx, &mut survivors)?;
            match governing {
                Some(chunk) => {
                    rs.chunk_state_mut(chunk).selected_positions = survivors;
                    if count > 0 {
                        ctx.profiler.add_tuples(self.id, self.name(), count as u64);
                        return Ok(true);
                    }
                }
                None => {
                    // Fully flat row: it either survives whole or dies.
                    if count > 0 {
                        ctx.profiler.add_tuples(self.id, self.name(), 1);
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            predicate: self.predicate.clone(),
        })
    }
}
