use super::PhysicalOperator;
use crate::error::Result;
use crate::expression::ExprEvaluator;
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use crate::vector::ChunkState;

pub struct ProjectionItem {
    pub evaluator: ExprEvaluator,
    pub out: DataPos,
    /// True when the expression already lives at `out`; no copy needed.
    pub identity: bool,
}

/// Evaluates projection expressions into their output slots and collapses
/// discarded factorized chunks into the row multiplicity.
pub struct Projection {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    items: Vec<ProjectionItem>,
    discarded_chunks: Vec<usize>,
}

impl Projection {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        items: Vec<ProjectionItem>,
        discarded_chunks: Vec<usize>,
    ) -> Self {
        Self { id, child, items, discarded_chunks }
    }
}

impl PhysicalOperator for Projection {
    fn name(&self) -> &'static str {
        "PROJECTION"
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
            if item.identity {
                continue;
            }
            item.evaluator.evaluate(rs, ctx)?;
            let copies: Vec<(usize, crate::common::Value)> = {
                let (vector, state) = item.evaluator.resolve(rs);
                state.positions().map(|p| (p, vector.value(p).clone())).collect()
            };
            let out = rs.vector_mut(item.out);
            for (pos, value) in copies {
                out.set_value(pos, value);
            }
        }
        // A dropped factorized chunk contributes only its row count.
        for &chunk in &self.discarded_chunks {
            let state = rs.chunk_state_mut(chunk);
            if !state.is_flat() {
                let selected = state.selected_size() as u64;
                *state = ChunkState::flat_single();
                rs.multiplicity *= selected;
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
                .map(|i| ProjectionItem {
                    evaluator: i.evaluator.clone(),
                    out: i.out,
                    identity: i.identity,
                })
                .collect(),
            discarded_chunks: self.discarded_chunks.clone(),
        })
    }
}
