// Pipeline scheduling. Pipelines arrive in topological order (every
// materializer precedes its consumer); each one is run to completion by a
// crew of workers that claim morsels through the operators' shared atomic
// cursors. The first error cancels the crew and surfaces to the caller.

use super::operator::PhysicalOperator;
use super::result_set::ResultSetDescriptor;
use super::{ExecutionContext, ResultSet};
use crate::error::{GraphError, Result};

pub struct Pipeline {
    pub sink: Box<dyn PhysicalOperator>,
    pub descriptor: ResultSetDescriptor,
    /// Writes and ordered rescans refuse parallel workers.
    pub single_threaded: bool,
}

pub struct PhysicalPlan {
    pub pipelines: Vec<Pipeline>,
}

/// Fixed-size worker pool executing one statement's pipelines.
pub struct QueryProcessor {
    max_num_threads: usize,
}

impl QueryProcessor {
    pub fn new(max_num_threads: usize) -> Self {
        tracing::debug!(max_num_threads, "initializing query processor");
        Self { max_num_threads: max_num_threads.max(1) }
    }

    pub fn max_num_threads(&self) -> usize {
        self.max_num_threads
    }

    pub fn execute(&self, plan: &mut PhysicalPlan, ctx: &ExecutionContext) -> Result<()> {
        for pipeline in &mut plan.pipelines {
            // A satisfied LIMIT only stops sources of its own pipeline.
            ctx.reset_source_stop();
            let workers = if pipeline.single_threaded {
                1
            } else {
                ctx.num_threads.min(self.max_num_threads)
            };
            self.run_pipeline(pipeline, workers, ctx)?;
            if let Some(error) = ctx.take_error() {
                return Err(error);
            }
            pipeline.sink.finalize(ctx)?;
        }
        Ok(())
    }

    fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        workers: usize,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let descriptor = &pipeline.descriptor;
        crossbeam::thread::scope(|scope| {
            for _ in 0..workers {
                let mut sink = pipeline.sink.clone_op();
                scope.spawn(move |_| {
                    let mut rs = descriptor.make_result_set();
                    let outcome = run_worker(sink.as_mut(), &mut rs, ctx);
                    if let Err(error) = outcome {
                        ctx.record_error(error);
                    }
                });
            }
        })
        .map_err(|_| GraphError::Runtime("a worker thread panicked".to_string()))
    }
}

fn run_worker(
    sink: &mut dyn PhysicalOperator,
    rs: &mut ResultSet,
    ctx: &ExecutionContext,
) -> Result<()> {
    sink.init(rs, ctx)?;
    while sink.next(rs, ctx)? {
        if ctx.is_cancelled() {
            break;
        }
    }
    Ok(())
}
