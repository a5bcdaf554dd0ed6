use crate::common::Value;
use crate::error::{GraphError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Access mode a statement pinned at compile time. WRITE statements hold
/// the database's single-writer lock for their whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ReadOnly,
    Write,
}

// ============================================================================
// Profiler
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OperatorMetrics {
    pub name: String,
    pub execution_time: Duration,
    pub num_output_tuples: u64,
}

/// Per-operator metrics, keyed by physical operator id. Disabled unless the
/// statement ran under PROFILE.
pub struct Profiler {
    enabled: bool,
    metrics: Mutex<BTreeMap<u32, OperatorMetrics>>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, metrics: Mutex::new(BTreeMap::new()) }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Starts a scoped timer for an operator; elapsed time accumulates
    /// when the guard drops.
    pub fn timer(&self, op_id: u32, name: &'static str) -> Option<ProfilerTimer<'_>> {
        if !self.enabled {
            return None;
        }
        Some(ProfilerTimer { profiler: self, op_id, name, start: Instant::now() })
    }

    pub fn add_tuples(&self, op_id: u32, name: &'static str, tuples: u64) {
        if !self.enabled {
            return;
        }
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(op_id).or_default();
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
        entry.num_output_tuples += tuples;
    }

    fn add_time(&self, op_id: u32, name: &'static str, elapsed: Duration) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(op_id).or_default();
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
        entry.execution_time += elapsed;
    }

    pub fn report(&self) -> Vec<(u32, OperatorMetrics)> {
        self.metrics.lock().iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

pub struct ProfilerTimer<'a> {
    profiler: &'a Profiler,
    op_id: u32,
    name: &'static str,
    start: Instant,
}

impl Drop for ProfilerTimer<'_> {
    fn drop(&mut self) {
        self.profiler.add_time(self.op_id, self.name, self.start.elapsed());
    }
}

// ============================================================================
// Execution context
// ============================================================================

/// State shared by every worker of one statement execution.
pub struct ExecutionContext {
    pub transaction_type: TransactionType,
    pub num_threads: usize,
    pub profiler: Arc<Profiler>,
    params: HashMap<String, Value>,
    /// Raised on error or timeout; every operator checks it at morsel
    /// boundaries and unwinds quietly.
    cancelled: Arc<AtomicBool>,
    /// Raised by LIMIT once satisfied; sources stop claiming morsels but
    /// the statement still succeeds.
    sources_exhausted: Arc<AtomicBool>,
    error: Arc<Mutex<Option<GraphError>>>,
}

impl ExecutionContext {
    pub fn new(
        transaction_type: TransactionType,
        num_threads: usize,
        params: HashMap<String, Value>,
        profiler: Arc<Profiler>,
    ) -> Self {
        Self {
            transaction_type,
            num_threads: num_threads.max(1),
            profiler,
            params,
            cancelled: Arc::new(AtomicBool::new(false)),
            sources_exhausted: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn param(&self, name: &str) -> Result<Value> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::Runtime(format!("parameter ${name} is not bound")))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn stop_sources(&self) {
        self.sources_exhausted.store(true, Ordering::Release);
    }

    /// True when sources should stop producing, for either reason.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.sources_exhausted.load(Ordering::Acquire)
    }

    /// Restarts the benign early-stop flag between dependent pipelines.
    pub fn reset_source_stop(&self) {
        self.sources_exhausted.store(false, Ordering::Release);
    }

    /// Records the first error and cancels peers; later errors are dropped.
    pub fn record_error(&self, error: GraphError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.cancel();
    }

    pub fn take_error(&self) -> Option<GraphError> {
        self.error.lock().take()
    }

    /// Starts a watchdog that raises the cancellation flag (and records a
    /// timeout error) if the statement is still running after `timeout`.
    /// The watchdog stops when the returned guard drops.
    pub fn spawn_watchdog(&self, timeout: Duration) -> WatchdogGuard {
        let cancelled = Arc::clone(&self.cancelled);
        let error = Arc::clone(&self.error);
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            while !done_flag.load(Ordering::Acquire) {
                if start.elapsed() >= timeout {
                    let mut slot = error.lock();
                    if slot.is_none() {
                        *slot = Some(GraphError::Runtime(format!(
                            "query timed out after {} ms",
                            timeout.as_millis()
                        )));
                    }
                    cancelled.store(true, Ordering::Release);
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        WatchdogGuard { done, handle: Some(handle) }
    }
}

pub struct WatchdogGuard {
    done: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let ctx = ExecutionContext::new(
            TransactionType::ReadOnly,
            2,
            HashMap::new(),
            Arc::new(Profiler::new(false)),
        );
        ctx.record_error(GraphError::Runtime("first".to_string()));
        ctx.record_error(GraphError::Runtime("second".to_string()));
        assert!(ctx.is_cancelled());
        match ctx.take_error() {
            Some(GraphError::Runtime(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected error slot: {other:?}"),
        }
    }

    #[test]
    fn missing_parameter_is_a_runtime_error() {
        let ctx = ExecutionContext::new(
            TransactionType::ReadOnly,
            1,
            HashMap::new(),
            Arc::new(Profiler::new(false)),
        );
        assert!(matches!(ctx.param("k"), Err(GraphError::Runtime(_))));
    }
}
