// # Query Processor
//
// Physical execution: result sets and their descriptors, the factorized
// table materialization, the logical-to-physical mapper, the operator set,
// and the morsel-driven pipeline scheduler.

pub mod factorized_table;
pub mod operator;

mod context;
mod mapper;
mod pipeline;
mod result_set;
mod semi_mask;

pub use context::{
    ExecutionContext, OperatorMetrics, Profiler, TransactionType, WatchdogGuard,
};
pub use factorized_table::{ColumnSchema, FactorizedTable, Row, TableSchema};
pub use mapper::{build_evaluator, descriptor_from_schema, PlanMapper, ResultHeader};
pub use pipeline::{PhysicalPlan, Pipeline, QueryProcessor};
pub use result_set::{ChunkDescriptor, DataPos, ResultSet, ResultSetDescriptor, VectorDescriptor};
pub use semi_mask::NodeSemiMask;
