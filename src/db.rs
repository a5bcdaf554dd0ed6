// # Database & Connection
//
// Process-wide database object owning buffer manager, storage, catalog,
// and the query processor, plus the per-connection statement lifecycle:
// parse -> bind -> plan -> map -> schedule, with single-writer statements
// rolled back through the WAL on failure.

use crate::binder::{Binder, BoundQuery};
use crate::buffer::BufferManager;
use crate::catalog::Catalog;
use crate::common::{Cardinality, LabelId, LogicalType, NodeOffset, Value};
use crate::common::{DEFAULT_PAGE_SIZE, LARGE_PAGE_SIZE};
use crate::error::{GraphError, Result};
use crate::parser::Parser;
use crate::planner::{LogicalOperator, LogicalPlan, Planner};
use crate::processor::{
    ExecutionContext, FactorizedTable, PlanMapper, Profiler, QueryProcessor, ResultHeader,
    TransactionType,
};
use crate::storage::{StorageManager, WalRecord};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_path: PathBuf,
    /// Pins every page in memory; pools grow instead of evicting.
    pub in_memory_mode: bool,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { database_path: path.into(), in_memory_mode: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub default_page_buffer_pool_size: usize,
    pub large_page_buffer_pool_size: usize,
    pub max_num_threads: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            default_page_buffer_pool_size: 64 * 1024 * 1024,
            large_page_buffer_pool_size: 64 * 1024 * 1024,
            max_num_threads: num_cpus::get(),
        }
    }
}

// ============================================================================
// Query results
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct QuerySummary {
    pub compiling_time_ms: f64,
    pub execution_time_ms: f64,
    pub is_explain: bool,
    pub is_profile: bool,
    /// Plan rendering for EXPLAIN, plan plus operator metrics for PROFILE.
    pub plan_description: String,
}

pub struct QueryResult {
    pub success: bool,
    pub error_message: String,
    pub header: ResultHeader,
    table: FactorizedTable,
    pub summary: QuerySummary,
}

impl QueryResult {
    fn failure(message: impl Into<String>, summary: QuerySummary) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            header: Vec::new(),
            table: FactorizedTable::default(),
            summary,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.header.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn num_tuples(&self) -> u64 {
        self.table.num_tuples()
    }

    /// Output rows with multiplicities expanded.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        for row in self.table.rows() {
            for _ in 0..row.multiplicity {
                out.push(row.values.clone());
            }
        }
        out
    }
}

pub struct PreparedStatement {
    pub success: bool,
    pub error_message: String,
    bound: Option<BoundQuery>,
    plan: Option<LogicalPlan>,
    header: ResultHeader,
    parameter_names: Vec<String>,
    compiling_time_ms: f64,
    is_explain: bool,
    is_profile: bool,
}

impl PreparedStatement {
    pub fn result_header(&self) -> &ResultHeader {
        &self.header
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

// ============================================================================
// Database
// ============================================================================

pub struct Database {
    config: DatabaseConfig,
    buffer_manager: Arc<BufferManager>,
    catalog: RwLock<Catalog>,
    storage: Arc<StorageManager>,
    processor: QueryProcessor,
    /// Single-writer lock: one WRITE statement at a time.
    writer_lock: Mutex<()>,
}

impl Database {
    pub fn open(config: DatabaseConfig, system_config: SystemConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.database_path)?;
        tracing::info!(path = %config.database_path.display(), "opening database");
        let buffer_manager = Arc::new(BufferManager::new(
            system_config.default_page_buffer_pool_size,
            system_config.large_page_buffer_pool_size,
            DEFAULT_PAGE_SIZE,
            LARGE_PAGE_SIZE,
            config.in_memory_mode,
        ));
        let catalog_path = config.database_path.join("catalog.bin");
        let catalog = if catalog_path.exists() {
            Catalog::load(&catalog_path)?
        } else {
            Catalog::new()
        };
        let storage = Arc::new(StorageManager::open(
            &catalog,
            &config.database_path,
            Arc::clone(&buffer_manager),
        )?);
        let db = Arc::new(Self {
            config,
            buffer_manager,
            catalog: RwLock::new(catalog),
            storage,
            processor: QueryProcessor::new(system_config.max_num_threads),
            writer_lock: Mutex::new(()),
        });
        // An interrupted statement left undo records behind; restore and
        // truncate before serving queries.
        let leftover = db.storage.wal().recover_records()?;
        if !leftover.is_empty() {
            tracing::warn!(records = leftover.len(), "recovering interrupted statement from WAL");
            db.rollback(leftover)?;
            db.storage.wal().truncate()?;
        }
        Ok(db)
    }

    pub fn connect(self: &Arc<Self>) -> Connection {
        Connection {
            database: Arc::clone(self),
            num_threads: self.processor.max_num_threads(),
            timeout: None,
        }
    }

    /// Retunes both buffer pools at runtime.
    pub fn resize_buffer_manager(
        &self,
        default_pool_size: usize,
        large_pool_size: usize,
    ) -> Result<()> {
        self.buffer_manager.resize(default_pool_size, large_pool_size)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.sync_catalog_counts();
        self.storage.flush()?;
        self.catalog.read().save(self.config.database_path.join("catalog.bin"))
    }

    pub fn debug_info(&self) -> serde_json::Value {
        let catalog = self.catalog.read();
        serde_json::json!({
            "path": self.config.database_path.display().to_string(),
            "in_memory_mode": self.config.in_memory_mode,
            "num_node_labels": catalog.node_labels().len(),
            "num_rel_labels": catalog.rel_labels().len(),
            "buffer_pool": {
                "default_frames": self.buffer_manager.default_pool_stats().num_frames,
                "large_frames": self.buffer_manager.large_pool_stats().num_frames,
            },
        })
    }

    // ------------------------------------------------------------------
    // DDL and bulk loading
    // ------------------------------------------------------------------

    pub fn create_node_label(
        &self,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        primary_key: &str,
        has_unstructured: bool,
    ) -> Result<LabelId> {
        let _writer = self.writer_lock.lock();
        let label = {
            let mut catalog = self.catalog.write();
            catalog.add_node_label(name, properties, primary_key, has_unstructured)?
        };
        self.storage.sync_with_catalog(&self.catalog.read())?;
        self.checkpoint()?;
        Ok(label)
    }

    pub fn create_rel_label(
        &self,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        src_label: &str,
        dst_label: &str,
        cardinality: Cardinality,
    ) -> Result<LabelId> {
        let _writer = self.writer_lock.lock();
        let label = {
            let mut catalog = self.catalog.write();
            let src = catalog
                .node_label_by_name(src_label)
                .ok_or_else(|| GraphError::Bind(format!("unknown node label {src_label}")))?
                .label_id;
            let dst = catalog
                .node_label_by_name(dst_label)
                .ok_or_else(|| GraphError::Bind(format!("unknown node label {dst_label}")))?
                .label_id;
            catalog.add_rel_label(name, properties, src, dst, cardinality)?
        };
        self.storage.sync_with_catalog(&self.catalog.read())?;
        self.checkpoint()?;
        Ok(label)
    }

    /// Bulk-loads one node; property values in catalog property order.
    pub fn insert_node(&self, label_name: &str, values: Vec<Value>) -> Result<NodeOffset> {
        let _writer = self.writer_lock.lock();
        let (label, primary_key) = {
            let catalog = self.catalog.read();
            let schema = catalog
                .node_label_by_name(label_name)
                .ok_or_else(|| GraphError::Bind(format!("unknown node label {label_name}")))?;
            (schema.label_id, schema.primary_key)
        };
        let table = self.storage.node_table(label);
        let key = values
            .get(primary_key as usize)
            .cloned()
            .ok_or_else(|| GraphError::Runtime("missing primary key value".to_string()))?;
        if key.is_null() {
            return Err(GraphError::Runtime("primary key cannot be NULL".to_string()));
        }
        let offset = table.insert(&values)?;
        self.storage.index(label).insert(&key, offset)?;
        Ok(offset)
    }

    /// Bulk-loads one rel, addressing endpoints by primary key.
    pub fn insert_rel(
        &self,
        rel_label_name: &str,
        src_key: &Value,
        dst_key: &Value,
        properties: Vec<Value>,
    ) -> Result<()> {
        let _writer = self.writer_lock.lock();
        let (label, src_label, dst_label) = {
            let catalog = self.catalog.read();
            let schema = catalog
                .rel_label_by_name(rel_label_name)
                .ok_or_else(|| GraphError::Bind(format!("unknown rel label {rel_label_name}")))?;
            (schema.label_id, schema.src_label, schema.dst_label)
        };
        let src = self
            .storage
            .index(src_label)
            .lookup(src_key)?
            .ok_or_else(|| GraphError::Runtime(format!("no node with key {src_key}")))?;
        let dst = self
            .storage
            .index(dst_label)
            .lookup(dst_key)?
            .ok_or_else(|| GraphError::Runtime(format!("no node with key {dst_key}")))?;
        self.storage.rel_table(label).insert(src, dst, properties)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Copies runtime node/rel counts into the catalog, which planning and
    /// CSR building read.
    fn sync_catalog_counts(&self) {
        let mut catalog = self.catalog.write();
        for i in 0..catalog.node_labels().len() {
            let label = i as LabelId;
            catalog.node_label_mut(label).num_nodes = self.storage.node_table(label).num_nodes();
        }
        for i in 0..catalog.rel_labels().len() {
            let label = i as LabelId;
            catalog.rel_label_mut(label).num_rels = self.storage.rel_table(label).num_rels();
        }
    }

    /// Applies undo records newest-first.
    fn rollback(&self, records: Vec<WalRecord>) -> Result<()> {
        for record in records.into_iter().rev() {
            match record {
                WalRecord::SetProperty { label, property, offset, before } => {
                    self.storage.node_table(label).column(property).write_value(offset, &before)?;
                }
                WalRecord::CreateNode { label, offset, key } => {
                    self.storage.node_table(label).truncate_to(offset);
                    let _ = self.storage.index(label).delete(&key)?;
                }
                WalRecord::DeleteNode { label, offset, key } => {
                    self.storage.node_table(label).set_deleted(offset, false)?;
                    if !key.is_null() && self.storage.index(label).lookup(&key)?.is_none() {
                        self.storage.index(label).insert(&key, offset)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

pub struct Connection {
    database: Arc<Database>,
    num_threads: usize,
    timeout: Option<Duration>,
}

impl Connection {
    /// Thread count used by subsequent executions on this connection.
    pub fn set_max_num_threads(&mut self, num_threads: usize) {
        self.num_threads = num_threads.max(1);
    }

    pub fn set_query_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn query(&self, text: &str) -> QueryResult {
        let statement = self.prepare(text);
        if !statement.success {
            return QueryResult::failure(
                statement.error_message.clone(),
                QuerySummary {
                    compiling_time_ms: statement.compiling_time_ms,
                    is_explain: statement.is_explain,
                    is_profile: statement.is_profile,
                    ..Default::default()
                },
            );
        }
        self.execute(&statement)
    }

    pub fn prepare(&self, text: &str) -> PreparedStatement {
        let started = Instant::now();
        let compiled = self.compile(text);
        let compiling_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        match compiled {
            Ok((bound, plan, header)) => PreparedStatement {
                success: true,
                error_message: String::new(),
                parameter_names: bound.parameter_names.clone(),
                is_explain: bound.is_explain,
                is_profile: bound.is_profile,
                bound: Some(bound),
                plan: Some(plan),
                header,
                compiling_time_ms,
            },
            Err(error) => PreparedStatement {
                success: false,
                error_message: error.to_string(),
                bound: None,
                plan: None,
                header: Vec::new(),
                parameter_names: Vec::new(),
                compiling_time_ms,
                is_explain: false,
                is_profile: false,
            },
        }
    }

    fn compile(&self, text: &str) -> Result<(BoundQuery, LogicalPlan, ResultHeader)> {
        if text.trim().is_empty() {
            return Err(GraphError::parse(0, "input query is empty"));
        }
        self.database.sync_catalog_counts();
        let parsed = Parser::parse(text)?;
        let catalog = self.database.catalog.read();
        let bound = Binder::new(&catalog).bind(&parsed)?;
        let plan = Planner::best_plan(&catalog, &bound)?;
        let header = plan
            .expressions_to_collect
            .iter()
            .map(|(expr, alias)| (alias.clone(), expr.data_type()))
            .collect();
        Ok((bound, plan, header))
    }

    pub fn execute(&self, statement: &PreparedStatement) -> QueryResult {
        self.execute_with_params(statement, HashMap::new())
    }

    pub fn execute_with_params(
        &self,
        statement: &PreparedStatement,
        params: HashMap<String, Value>,
    ) -> QueryResult {
        let mut summary = QuerySummary {
            compiling_time_ms: statement.compiling_time_ms,
            is_explain: statement.is_explain,
            is_profile: statement.is_profile,
            ..Default::default()
        };
        if !statement.success {
            return QueryResult::failure(statement.error_message.clone(), summary);
        }
        let bound = statement.bound.as_ref().expect("successful statement is bound");
        let plan = statement.plan.as_ref().expect("successful statement is planned");
        for name in &statement.parameter_names {
            if !params.contains_key(name) {
                return QueryResult::failure(format!("parameter ${name} not found"), summary);
            }
        }
        if statement.is_explain {
            summary.plan_description = plan.describe();
            return QueryResult {
                success: true,
                error_message: String::new(),
                header: statement.header.clone(),
                table: FactorizedTable::default(),
                summary,
            };
        }
        match self.run_plan(bound.is_write, statement.is_profile, plan, params, &mut summary) {
            Ok(table) => QueryResult {
                success: true,
                error_message: String::new(),
                header: statement.header.clone(),
                table,
                summary,
            },
            Err(error) => QueryResult::failure(error.to_string(), summary),
        }
    }

    fn run_plan(
        &self,
        is_write: bool,
        is_profile: bool,
        plan: &LogicalPlan,
        params: HashMap<String, Value>,
        summary: &mut QuerySummary,
    ) -> Result<FactorizedTable> {
        let database = &self.database;
        database.sync_catalog_counts();
        {
            let catalog = database.catalog.read();
            database.storage.build_dirty_rel_tables(&catalog)?;
        }
        // WRITE statements hold the single-writer lock end to end.
        let writer_guard = is_write.then(|| database.writer_lock.lock());

        let started = Instant::now();
        let profiler = Arc::new(Profiler::new(is_profile));
        let transaction_type =
            if is_write { TransactionType::Write } else { TransactionType::ReadOnly };
        let ctx = ExecutionContext::new(
            transaction_type,
            self.num_threads,
            params,
            Arc::clone(&profiler),
        );
        let _watchdog = self.timeout.map(|t| ctx.spawn_watchdog(t));

        let result = {
            let catalog = database.catalog.read();
            PlanMapper::map_plan(plan, &database.storage, &catalog).and_then(
                |(mut physical, collected, _header)| {
                    database.processor.execute(&mut physical, &ctx)?;
                    Ok(collected.take())
                },
            )
        };
        summary.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        if is_profile {
            summary.plan_description = plan.describe();
            for (id, metrics) in profiler.report() {
                summary.plan_description.push_str(&format!(
                    "[{id}] {}: {:.3} ms, {} tuples\n",
                    metrics.name,
                    metrics.execution_time.as_secs_f64() * 1000.0,
                    metrics.num_output_tuples
                ));
            }
        }
        match result {
            Ok(table) => {
                if is_write {
                    database.storage.wal().truncate()?;
                    database.checkpoint()?;
                }
                drop(writer_guard);
                Ok(table)
            }
            Err(error) => {
                if is_write {
                    tracing::warn!(error = %error, "write statement failed; rolling back");
                    let records = database.storage.wal().take_records();
                    database.rollback(records)?;
                    database.storage.wal().truncate()?;
                }
                drop(writer_guard);
                Err(error)
            }
        }
    }

    /// Every plan the enumerator kept for the statement, best first.
    pub fn enumerate_plans(&self, text: &str) -> Result<Vec<LogicalPlan>> {
        self.database.sync_catalog_counts();
        let parsed = Parser::parse(text)?;
        let catalog = self.database.catalog.read();
        let bound = Binder::new(&catalog).bind(&parsed)?;
        Planner::enumerate_plans(&catalog, &bound)
    }

    /// Executes a specific plan from `enumerate_plans`.
    pub fn execute_plan(&self, plan: &LogicalPlan) -> QueryResult {
        let mut summary = QuerySummary::default();
        let is_write = plan_has_writes(&plan.root);
        match self.run_plan(is_write, false, plan, HashMap::new(), &mut summary) {
            Ok(table) => QueryResult {
                success: true,
                error_message: String::new(),
                header: plan
                    .expressions_to_collect
                    .iter()
                    .map(|(expr, alias)| (alias.clone(), expr.data_type()))
                    .collect(),
                table,
                summary,
            },
            Err(error) => QueryResult::failure(error.to_string(), summary),
        }
    }
}

fn plan_has_writes(op: &LogicalOperator) -> bool {
    matches!(
        op.kind(),
        crate::planner::LogicalOperatorKind::CreateNode
            | crate::planner::LogicalOperatorKind::SetProperty
            | crate::planner::LogicalOperatorKind::DeleteNode
    ) || op.children().iter().any(|c| plan_has_writes(c))
}
