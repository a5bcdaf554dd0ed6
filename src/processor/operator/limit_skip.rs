use super::PhysicalOperator;
use crate::error::Result;
use crate::processor::{ExecutionContext, ResultSet};
use crate::vector::ChunkState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Folds factorized chunks that are no longer in scope into the row
/// multiplicity, so SKIP and LIMIT count actual output tuples.
pub struct MultiplicityReducer {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    /// Chunks still carrying output data; everything else collapses.
    scoped_chunks: Vec<usize>,
}

impl MultiplicityReducer {
    pub fn new(id: u32, child: Box<dyn PhysicalOperator>, scoped_chunks: Vec<usize>) -> Self {
        Self { id, child, scoped_chunks }
    }
}

impl PhysicalOperator for MultiplicityReducer {
    fn name(&self) -> &'static str {
        "MULTIPLICITY_REDUCER"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        for chunk in 0..rs.chunks.len() {
            if self.scoped_chunks.contains(&chunk) {
                continue;
            }
            let state = rs.chunk_state_mut(chunk);
            if !state.is_flat() && state.selected_size() > 0 {
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
            scoped_chunks: self.scoped_chunks.clone(),
        })
    }
}

fn first_unflat_chunk(rs: &ResultSet, scoped: &[usize]) -> Option<usize> {
    scoped.iter().copied().find(|&c| !rs.chunk_state(c).is_flat())
}

/// Drops the first `count` output tuples; the counter is shared across
/// workers.
pub struct Skip {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    count: u64,
    scoped_chunks: Vec<usize>,
    seen: Arc<AtomicU64>,
}

impl Skip {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        count: u64,
        scoped_chunks: Vec<usize>,
        seen: Arc<AtomicU64>,
    ) -> Self {
        Self { id, child, count, scoped_chunks, seen }
    }
}

impl PhysicalOperator for Skip {
    fn name(&self) -> &'static str {
        "SKIP"
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
            let tuples = rs.active_tuple_count();
            let seen = self.seen.fetch_add(tuples, Ordering::AcqRel);
            if seen >= self.count {
                return Ok(true);
            }
            if seen + tuples <= self.count {
                continue;
            }
            // Batch straddles the boundary; drop its leading tuples.
            let to_drop = self.count - seen;
            match first_unflat_chunk(rs, &self.scoped_chunks) {
                Some(chunk) => {
                    let drop_positions = (to_drop / rs.multiplicity.max(1)) as usize;
                    let state = rs.chunk_state_mut(chunk);
                    state.selected_positions.drain(..drop_positions.min(state.selected_size()));
                    if state.selected_size() == 0 {
                        continue;
                    }
                }
                None => {
                    rs.multiplicity = rs.multiplicity.saturating_sub(to_drop).max(1);
                }
            }
            return Ok(true);
        }
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            count: self.count,
            scoped_chunks: self.scoped_chunks.clone(),
            seen: Arc::clone(&self.seen),
        })
    }
}

/// Stops after `count` output tuples and tells every source to stop
/// claiming morsels once satisfied.
pub struct Limit {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    count: u64,
    scoped_chunks: Vec<usize>,
    produced: Arc<AtomicU64>,
}

impl Limit {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        count: u64,
        scoped_chunks: Vec<usize>,
        produced: Arc<AtomicU64>,
    ) -> Self {
        Self { id, child, count, scoped_chunks, produced }
    }
}

impl PhysicalOperator for Limit {
    fn name(&self) -> &'static str {
        "LIMIT"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if self.produced.load(Ordering::Acquire) >= self.count {
            ctx.stop_sources();
            return Ok(false);
        }
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        let tuples = rs.active_tuple_count();
        let prev = self.produced.fetch_add(tuples, Ordering::AcqRel);
        if prev >= self.count {
            ctx.stop_sources();
            return Ok(false);
        }
        if prev + tuples > self.count {
            let allowed = self.count - prev;
            match first_unflat_chunk(rs, &self.scoped_chunks) {
                Some(chunk) => {
                    let keep = ((allowed / rs.multiplicity.max(1)) as usize).max(1);
                    let state = rs.chunk_state_mut(chunk);
                    state.selected_positions.truncate(keep);
                }
                None => {
                    rs.multiplicity = allowed.max(1);
                }
            }
            ctx.stop_sources();
        }
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            count: self.count,
            scoped_chunks: self.scoped_chunks.clone(),
            produced: Arc::clone(&self.produced),
        })
    }
}
