//! Type-check worker pool, per spec.md §4.3.
//!
//! Workers are modelled as OS threads rather than subprocesses: each owns
//! an MPSC request channel and replies on a one-shot channel handed to it
//! per task. That's enough to exercise the pool's real contract (sizing,
//! dispatch, per-task timeouts, recycling, crash/termination semantics)
//! without shelling out to a real `tsc`-equivalent process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{CliMode, WorkerPoolConfig};
use crate::error::{Diagnostic, VersaError};
use crate::typecheck::{TypeCheckOptions, TypeChecker};

fn is_declaration_file(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(".d.ts"))
}

fn is_sfc(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("sfc")
}

/// Dynamic per-task timeout, per spec.md §4.3 "Timeout computation":
/// base 8s, cumulative multiplier clamped to [0.5, 5.0], final timeout
/// clamped to <= 60000ms.
pub fn compute_timeout(source: &str, options: &TypeCheckOptions, filename: &Path) -> Duration {
    const BASE_MS: f64 = 8_000.0;
    let mut multiplier = 1.0f64;

    let len = source.len();
    multiplier += if len > 100_000 {
        1.5
    } else if len > 50_000 {
        1.0
    } else if len > 20_000 {
        0.5
    } else {
        0.0
    };

    let structural = options.structural_count();
    multiplier += if structural > 100.0 {
        2.0
    } else if structural > 50.0 {
        1.0
    } else if structural > 20.0 {
        0.5
    } else {
        0.0
    };

    if options.strict || options.no_implicit_any {
        multiplier += 0.3;
    }
    if is_declaration_file(filename) {
        multiplier += 1.0;
    }
    if is_sfc(filename) {
        multiplier += 0.5;
    }

    multiplier = multiplier.clamp(0.5, 5.0);
    let timeout_ms = (BASE_MS * multiplier).min(60_000.0);
    Duration::from_millis(timeout_ms as u64)
}

enum WorkerRequest {
    TypeCheck {
        task_id: u64,
        filename: PathBuf,
        source: String,
        options: TypeCheckOptions,
        reply: Sender<Vec<Diagnostic>>,
    },
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Starting,
    Idle,
    Busy,
    Recycling,
    Terminated,
}

struct WorkerSlot {
    id: u32,
    sender: Sender<WorkerRequest>,
    handle: Option<JoinHandle<()>>,
    state: WorkerState,
    pending: usize,
    tasks_processed: u32,
    consecutive_timeouts: u32,
    created_at: Instant,
    last_activity: Instant,
    memory_bytes: Arc<AtomicU64>,
}

fn spawn_worker(id: u32, checker: Arc<dyn TypeChecker>) -> (Sender<WorkerRequest>, JoinHandle<()>, Arc<AtomicU64>) {
    let (tx, rx): (Sender<WorkerRequest>, Receiver<WorkerRequest>) = mpsc::channel();
    let memory = Arc::new(AtomicU64::new(0));
    let memory_for_thread = memory.clone();
    let handle = std::thread::Builder::new()
        .name(format!("versa-typecheck-{id}"))
        .spawn(move || {
            debug!(worker = id, "worker ready");
            for request in rx {
                match request {
                    WorkerRequest::TypeCheck { task_id: _, filename, source, options, reply } => {
                        memory_for_thread.fetch_add(source.len() as u64, Ordering::Relaxed);
                        let diagnostics = checker.check(&filename, &source, &options);
                        let _ = reply.send(diagnostics);
                    }
                    WorkerRequest::Terminate => break,
                }
            }
            debug!(worker = id, "worker terminated");
        })
        .expect("spawning a worker thread");
    (tx, handle, memory)
}

/// Aggregate counters, per spec.md §4.3 "Metrics".
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    pub tasks_dispatched: AtomicU64,
    pub tasks_timed_out: AtomicU64,
    pub tasks_fallen_back: AtomicU64,
    pub workers_recycled: AtomicU64,
    pub workers_crashed: AtomicU64,
}

/// Type-check worker pool. Sized per spec.md §4.3 "Sizing":
/// `clamp(cpu_count, min_size, max_size)`, adjusted by the active
/// `CliMode`'s ceiling.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    checker: Arc<dyn TypeChecker>,
    workers: Mutex<Vec<WorkerSlot>>,
    next_task_id: AtomicU64,
    metrics: WorkerPoolMetrics,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, mode: CliMode, checker: Arc<dyn TypeChecker>) -> Self {
        let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let ceiling = config.ceiling_for_mode(mode).min(config.max_size);
        let size = cpu_count.clamp(config.min_size, ceiling.max(config.min_size));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size as u32 {
            let (sender, handle, memory_bytes) = spawn_worker(id, checker.clone());
            workers.push(WorkerSlot {
                id,
                sender,
                handle: Some(handle),
                state: WorkerState::Idle,
                pending: 0,
                tasks_processed: 0,
                consecutive_timeouts: 0,
                created_at: Instant::now(),
                last_activity: Instant::now(),
                memory_bytes,
            });
        }

        Self { config, checker, workers: Mutex::new(workers), next_task_id: AtomicU64::new(0), metrics: WorkerPoolMetrics::default() }
    }

    pub fn metrics(&self) -> &WorkerPoolMetrics {
        &self.metrics
    }

    pub fn size(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Dispatch selection, per spec.md §4.3 "Dispatch": prefer an idle
    /// worker with zero pending tasks, else the worker with the fewest
    /// pending tasks provided it is still under the concurrency cap.
    /// Returns `None` when every worker is saturated, signalling the
    /// caller to fall back to an in-process check.
    fn pick_worker(workers: &mut [WorkerSlot], cap: usize) -> Option<usize> {
        if let Some((idx, _)) = workers.iter().enumerate().find(|(_, w)| w.state == WorkerState::Idle && w.pending == 0) {
            return Some(idx);
        }
        workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.state != WorkerState::Recycling && w.state != WorkerState::Terminated && w.pending < cap)
            .min_by_key(|(_, w)| w.pending)
            .map(|(idx, _)| idx)
    }

    /// Type-check one file, per spec.md §4.3 and §4.4 step 5.
    pub fn type_check(&self, filename: &Path, source: &str, options: &TypeCheckOptions) -> Result<Vec<Diagnostic>, VersaError> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let timeout = compute_timeout(source, options, filename);

        let worker_idx = {
            let mut workers = self.workers.lock().unwrap();
            let cap = self.config.dispatch_concurrency_cap;
            Self::pick_worker(&mut *workers, cap).inspect(|&idx| {
                workers[idx].pending += 1;
                workers[idx].state = WorkerState::Busy;
            })
        };

        let Some(worker_idx) = worker_idx else {
            debug!(file = %filename.display(), "worker pool saturated, falling back in-process");
            self.metrics.tasks_fallen_back.fetch_add(1, Ordering::Relaxed);
            return Ok(self.checker.check(filename, source, options));
        };

        self.metrics.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = mpsc::channel();
        let sent = {
            let workers = self.workers.lock().unwrap();
            workers[worker_idx]
                .sender
                .send(WorkerRequest::TypeCheck { task_id, filename: filename.to_path_buf(), source: source.to_string(), options: options.clone(), reply: reply_tx })
                .is_ok()
        };

        if !sent {
            self.finish_dispatch(worker_idx, false);
            self.metrics.workers_crashed.fetch_add(1, Ordering::Relaxed);
            return Err(VersaError::WorkerCrash { worker_id: worker_idx as u32, message: "request channel closed".into() });
        }

        let result = match reply_rx.recv_timeout(timeout) {
            Ok(diagnostics) => {
                self.finish_dispatch(worker_idx, false);
                self.maybe_recycle(worker_idx);
                Ok(diagnostics)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.metrics.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
                let recycle = self.finish_dispatch(worker_idx, true);
                if recycle {
                    self.recycle_worker(worker_idx);
                }
                warn!(file = %filename.display(), elapsed_ms = timeout.as_millis() as u64, "worker timed out, retrying in-process");
                self.metrics.tasks_fallen_back.fetch_add(1, Ordering::Relaxed);
                Ok(self.checker.check(filename, source, options))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finish_dispatch(worker_idx, false);
                self.metrics.workers_crashed.fetch_add(1, Ordering::Relaxed);
                Err(VersaError::WorkerCrash { worker_id: worker_idx as u32, message: "worker disconnected mid-task".into() })
            }
        };
        result
    }

    /// Decrements pending/updates bookkeeping for `idx`; returns whether
    /// the worker crossed its consecutive-timeout recycling threshold.
    fn finish_dispatch(&self, idx: usize, timed_out: bool) -> bool {
        let mut workers = self.workers.lock().unwrap();
        let Some(worker) = workers.get_mut(idx) else { return false };
        worker.pending = worker.pending.saturating_sub(1);
        worker.last_activity = Instant::now();
        if timed_out {
            worker.consecutive_timeouts += 1;
        } else {
            worker.consecutive_timeouts = 0;
            worker.tasks_processed += 1;
        }
        if worker.pending == 0 && worker.state == WorkerState::Busy {
            worker.state = WorkerState::Idle;
        }
        worker.consecutive_timeouts >= self.config.max_consecutive_timeouts
    }

    /// Recycling triggers, per spec.md §4.3 "Recycling": memory over
    /// limit, age over TTL, task count over cap, or idle past timeout.
    fn maybe_recycle(&self, idx: usize) {
        let should_recycle = {
            let workers = self.workers.lock().unwrap();
            let Some(worker) = workers.get(idx) else { return };
            worker.memory_bytes.load(Ordering::Relaxed) > self.config.memory_limit_bytes
                || worker.created_at.elapsed() > self.config.ttl()
                || worker.tasks_processed >= self.config.max_tasks_per_worker
                || (worker.pending == 0 && worker.last_activity.elapsed() > self.config.idle_timeout())
        };
        if should_recycle {
            self.recycle_worker(idx);
        }
    }

    /// Terminates the worker at `idx` and replaces it in place with a
    /// freshly spawned one carrying the same slot id.
    fn recycle_worker(&self, idx: usize) {
        let mut workers = self.workers.lock().unwrap();
        let Some(worker) = workers.get_mut(idx) else { return };
        worker.state = WorkerState::Recycling;
        let _ = worker.sender.send(WorkerRequest::Terminate);
        if let Some(handle) = worker.handle.take() {
            wait_for_exit(handle, Duration::from_secs(2));
        }

        let id = worker.id;
        let (sender, handle, memory_bytes) = spawn_worker(id, self.checker.clone());
        *worker = WorkerSlot {
            id,
            sender,
            handle: Some(handle),
            state: WorkerState::Idle,
            pending: 0,
            tasks_processed: 0,
            consecutive_timeouts: 0,
            created_at: Instant::now(),
            last_activity: Instant::now(),
            memory_bytes,
        };
        self.metrics.workers_recycled.fetch_add(1, Ordering::Relaxed);
    }

    /// Stops every worker, per spec.md §4.3 "Termination semantics":
    /// pending tasks are left to reject via their own channel drop, each
    /// worker gets a bounded grace period before being abandoned.
    pub fn shutdown(self) {
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.iter_mut() {
            worker.state = WorkerState::Terminated;
            let _ = worker.sender.send(WorkerRequest::Terminate);
        }
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                wait_for_exit(handle, Duration::from_secs(2));
            }
        }
    }
}

/// Joins `handle` for up to `budget`, otherwise abandons it (the thread
/// keeps running detached; we've already told it to stop).
fn wait_for_exit(handle: JoinHandle<()>, budget: Duration) {
    if handle.is_finished() {
        let _ = handle.join();
        return;
    }
    let start = Instant::now();
    let mut handle = Some(handle);
    while start.elapsed() < budget {
        if handle.as_ref().is_some_and(|h| h.is_finished()) {
            let _ = handle.take().unwrap().join();
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if let Some(h) = handle {
        warn!("worker thread did not exit within grace period, abandoning");
        drop(h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typecheck::{BalancedBracketsChecker, NullTypeChecker};

    fn pool(config: WorkerPoolConfig) -> WorkerPool {
        WorkerPool::new(config, CliMode::Watch, Arc::new(NullTypeChecker))
    }

    #[test]
    fn sizes_between_min_and_mode_ceiling() {
        let config = WorkerPoolConfig { min_size: 4, max_size: 16, ..Default::default() };
        let pool = pool(config);
        assert!(pool.size() >= 4);
        assert!(pool.size() <= 12);
    }

    #[test]
    fn dispatches_and_returns_clean_diagnostics() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), CliMode::Watch, Arc::new(BalancedBracketsChecker));
        let diags = pool.type_check(Path::new("a.ts"), "const x = [1, 2];", &TypeCheckOptions::default()).unwrap();
        assert!(diags.is_empty());
    }

    #[test]
    fn dispatches_and_surfaces_syntax_diagnostics() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), CliMode::Watch, Arc::new(BalancedBracketsChecker));
        let diags = pool.type_check(Path::new("a.ts"), "const x = [1, 2;", &TypeCheckOptions::default()).unwrap();
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn falls_back_in_process_when_saturated() {
        let config = WorkerPoolConfig { min_size: 1, max_size: 1, dispatch_concurrency_cap: 1, ..Default::default() };
        let pool = WorkerPool::new(config, CliMode::LintOnly, Arc::new(BalancedBracketsChecker));
        {
            let mut workers = pool.workers.lock().unwrap();
            workers[0].pending = 1;
            workers[0].state = WorkerState::Busy;
        }
        let diags = pool.type_check(Path::new("a.ts"), "const x = 1;", &TypeCheckOptions::default()).unwrap();
        assert!(diags.is_empty());
        assert_eq!(pool.metrics().tasks_fallen_back.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn timeout_grows_with_source_size_and_declaration_files() {
        let small = compute_timeout("x", &TypeCheckOptions::default(), Path::new("a.ts"));
        let big_source = "x".repeat(200_000);
        let big = compute_timeout(&big_source, &TypeCheckOptions::default(), Path::new("a.ts"));
        assert!(big > small);

        let dts = compute_timeout("x", &TypeCheckOptions::default(), Path::new("a.d.ts"));
        assert!(dts > small);
        assert!(small.as_millis() <= 60_000);
        assert!(big.as_millis() <= 60_000);
    }

    #[test]
    fn recycles_worker_after_max_tasks() {
        let config = WorkerPoolConfig { min_size: 1, max_size: 1, max_tasks_per_worker: 2, ..Default::default() };
        let pool = WorkerPool::new(config, CliMode::LintOnly, Arc::new(NullTypeChecker));
        for _ in 0..2 {
            pool.type_check(Path::new("a.ts"), "const x = 1;", &TypeCheckOptions::default()).unwrap();
        }
        assert_eq!(pool.metrics().workers_recycled.load(Ordering::Relaxed), 1);
    }
}
