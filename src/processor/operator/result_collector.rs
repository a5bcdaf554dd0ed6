use super::PhysicalOperator;
use crate::error::Result;
use crate::processor::factorized_table::{FactorizedTable, TableSchema};
use crate::processor::{DataPos, ExecutionContext, ResultSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// A factorized table appended to by many workers and read after the
/// pipeline completes.
pub struct SharedFactorizedTable {
    table: Mutex<FactorizedTable>,
}

impl SharedFactorizedTable {
    pub fn new(schema: TableSchema) -> Self {
        Self { table: Mutex::new(FactorizedTable::new(schema)) }
    }

    pub fn append_expanded(&self, rs: &ResultSet, positions: &[DataPos]) -> Result<()> {
        self.table.lock().append_expanded(rs, positions)
    }

    pub fn with_table<R>(&self, f: impl FnOnce(&FactorizedTable) -> R) -> R {
        f(&self.table.lock())
    }

    pub fn take(&self) -> FactorizedTable {
        std::mem::take(&mut self.table.lock())
    }

    pub fn num_rows(&self) -> usize {
        self.table.lock().num_rows()
    }

    /// Clones one row's values and multiplicity; `None` past the end.
    pub fn row_values(&self, idx: usize) -> Option<(Vec<crate::common::Value>, u64)> {
        let table = self.table.lock();
        if idx >= table.num_rows() {
            return None;
        }
        let row = table.row(idx);
        Some((row.values.clone(), row.multiplicity))
    }
}

/// Final sink: flushes every batch into the query's output table.
pub struct ResultCollector {
    id: u32,
    child: Box<dyn PhysicalOperator>,
    payload: Vec<DataPos>,
    shared: Arc<SharedFactorizedTable>,
}

impl ResultCollector {
    pub fn new(
        id: u32,
        child: Box<dyn PhysicalOperator>,
        payload: Vec<DataPos>,
        shared: Arc<SharedFactorizedTable>,
    ) -> Self {
        Self { id, child, payload, shared }
    }
}

impl PhysicalOperator for ResultCollector {
    fn name(&self) -> &'static str {
        "RESULT_COLLECTOR"
    }

    fn init(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<()> {
        self.child.init(rs, ctx)
    }

    fn next(&mut self, rs: &mut ResultSet, ctx: &ExecutionContext) -> Result<bool> {
        if !self.child.next(rs, ctx)? {
            return Ok(false);
        }
        let _timer = ctx.profiler.timer(self.id, self.name());
        self.shared.append_expanded(rs, &self.payload)?;
        Ok(true)
    }

    fn clone_op(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            child: self.child.clone_op(),
            payload: self.payload.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}
