use super::PhysicalOperator;
use crate::error::Result;
use crate::processor::{ExecutionContext, ResultSet};

/// Converts an unflat chunk into a sequence of flat rows by walking a
/// cursor over its selected positions.
pub struct Flatten {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    chunk: usize,
    cursor: usize,
    size: usize,
}

impl Flatten {
    pub fn new(id: u32, child: Box<dyn PhysicalOperator>, chunk: usize) -> Self {
        Self { id, child, chunk, cursor: 0, size: 0 }
    }
}

impl PhysicalOperator for Flatten {
    fn name(&self) -> &'static str {
        "FLATTEN"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.cursor = 0;
        self.size = 0;
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        let _timer = ctx.profiler.timer(self.id, self.name());
        loop {
            if self.cursor < self.size {
                rs.chunk_state_mut(self.chunk).curr_idx = Some(self.cursor);
                self.cursor += 1;
                return Ok(true);
            }
            if !self.child.next(rs, ctx)? {
                return Ok(false);
            }
            let state = rs.chunk_state_mut(self.chunk);
            self.size = state.selected_size();
            self.cursor = 0;
            if self.size == 0 {
                continue;
            }
            state.curr_idx = Some(0);
            self.cursor = 1;
            return Ok(true);
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            chunk: self.chunk,
            cursor: 0,
            size: 0,
        })
    }
}
