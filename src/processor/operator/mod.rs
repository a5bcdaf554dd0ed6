// Physical operators. Everything speaks one interface: init wires the
// operator to its pipeline's result set, next produces one batch (pulling
// from the child for non-sources), clone_op gives each worker its own
// state while Arc-shared descriptors stay common, and finalize runs once
// per pipeline after every worker has drained.

mod aggregate;
mod extend;
mod filter;
mod flatten;
mod hash_join;
mod limit_skip;
mod order_by;
mod projection;
mod recursive_join;
mod result_collector;
mod scan;
mod scan_property;
mod unwind;
mod update;

pub use aggregate::{AggDesc, AggregateBuild, AggregateScan, AggregateSharedState};
pub use extend::Extend;
pub use filter::Filter;
pub use flatten::Flatten;
pub use hash_join::{HashJoinBuild, HashJoinProbe, HashJoinSharedState, ProbePayload};
pub use limit_skip::{Limit, MultiplicityReducer, Skip};
pub use order_by::{OrderByScan, OrderBySink, OrderBySharedState};
pub use projection::{Projection, ProjectionItem};
pub use recursive_join::{RecursiveJoin, RecursiveJoinSharedState, ScanFrontier};
pub use result_collector::{ResultCollector, SharedFactorizedTable};
pub use scan::{IndexScan, ScanNodeId, ScanNodeIdSharedState};
pub use scan_property::ScanNodeProperty;
pub use unwind::Unwind;
pub use update::{
    CreateNode, CreateNodeItem, DeleteNode, DeleteNodeItem, SetProperty, SetPropertyItem,
};

use crate::error::Result;
use crate::processor::{ExecutionContext, ResultSet};

pub trait PhysicalOperator: Send {
    fn name(&self) -> &'static str;

    fn is_source(&self) -> bool {
        false
    }

    /// Wires positions and thread-local state; called once per worker on
    /// its own result set before the first `next`.
    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()>;

    /// Produces the next batch into the result set. False means exhausted;
    /// operators also return false quietly once the context is cancelled.
    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool>;

    /// Runs once per pipeline after all workers joined; sinks publish
    /// shared state (hash directories, merged sort runs) here.
    fn finalize(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator>;
}
