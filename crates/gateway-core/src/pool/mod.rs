//! Per-backend process pool: a bounded-concurrency executor with a shared
//! FIFO admission queue and age-based rejection.

use crate::error::PoolError;
use crate::executor::{CliExecutor, ExecutionRequest, ExecutionResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

/// Point-in-time counters for a pool, used by the `/queue/status` route.
#[derive(Debug, Clone, Default)]
pub struct PoolCounters {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub processed_total: u64,
    pub queued_total: u64,
    pub failed_total: u64,
}

struct QueueItem {
    request: ExecutionRequest,
    queued_at: Instant,
    resolve: oneshot::Sender<Result<ExecutionResult, PoolError>>,
}

/// Outcome of the admission decision in `execute()`: either a reserved
/// slot to run on now, or a receiver for a queued item's eventual result.
enum Admission {
    Immediate(ExecutionRequest),
    Queued(oneshot::Receiver<Result<ExecutionResult, PoolError>>),
}

struct Inner {
    queue: std::collections::VecDeque<QueueItem>,
}

/// Bounded-concurrency process pool for one CLI backend.
pub struct ProcessPool {
    executor: Arc<CliExecutor>,
    max_concurrent: usize,
    max_queue: usize,
    queue_timeout: Duration,
    active_count: Arc<AtomicU64>,
    processed_total: Arc<AtomicU64>,
    queued_total: Arc<AtomicU64>,
    failed_total: Arc<AtomicU64>,
    shutting_down: Arc<AtomicBool>,
    dispatch_guard: Arc<Mutex<()>>,
    inner: Arc<std::sync::Mutex<Inner>>,
}

impl ProcessPool {
    pub fn new(executor: CliExecutor, max_concurrent: usize, max_queue: usize, queue_timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            executor: Arc::new(executor),
            max_concurrent,
            max_queue,
            queue_timeout: Duration::from_millis(queue_timeout_ms),
            active_count: Arc::new(AtomicU64::new(0)),
            processed_total: Arc::new(AtomicU64::new(0)),
            queued_total: Arc::new(AtomicU64::new(0)),
            failed_total: Arc::new(AtomicU64::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            dispatch_guard: Arc::new(Mutex::new(())),
            inner: Arc::new(std::sync::Mutex::new(Inner {
                queue: std::collections::VecDeque::new(),
            })),
        })
    }

    /// Submit one request. Runs immediately if a slot is free, queues if
    /// the queue has room, otherwise rejects with `QueueFull`.
    ///
    /// The capacity check and the reservation (either claiming a slot or
    /// enqueueing) happen under the same `inner` lock, so two concurrent
    /// callers can never both observe a free slot and both proceed to
    /// `run_immediately` — one of them will see the other's reservation
    /// and queue or reject instead.
    pub async fn execute(self: &Arc<Self>, request: ExecutionRequest) -> Result<ExecutionResult, PoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::Shutdown);
        }

        let admission = {
            let mut inner = self.inner.lock().expect("pool mutex poisoned");
            let active = self.active_count.load(Ordering::SeqCst) as usize;
            if active < self.max_concurrent {
                self.active_count.fetch_add(1, Ordering::SeqCst);
                Admission::Immediate(request)
            } else if inner.queue.len() < self.max_queue {
                let (tx, rx) = oneshot::channel();
                inner.queue.push_back(QueueItem {
                    request,
                    queued_at: Instant::now(),
                    resolve: tx,
                });
                self.queued_total.fetch_add(1, Ordering::SeqCst);
                Admission::Queued(rx)
            } else {
                return Err(PoolError::QueueFull);
            }
        };

        match admission {
            Admission::Immediate(request) => self.run_immediately(request).await,
            Admission::Queued(rx) => rx.await.unwrap_or(Err(PoolError::Shutdown)),
        }
    }

    /// Runs `request` now. The caller must have already reserved a slot by
    /// incrementing `active_count` under the `inner` lock.
    async fn run_immediately(self: &Arc<Self>, request: ExecutionRequest) -> Result<ExecutionResult, PoolError> {
        self.processed_total.fetch_add(1, Ordering::SeqCst);

        let result = self.executor.execute(&request).await.map_err(PoolError::from);

        self.active_count.fetch_sub(1, Ordering::SeqCst);
        if result.is_err() {
            self.failed_total.fetch_add(1, Ordering::SeqCst);
        }

        self.process_next().await;

        result
    }

    /// Reentrancy-guarded dispatch loop: while under capacity and the
    /// queue is non-empty, dequeue one item and run it immediately,
    /// looping until either condition fails. The guard prevents a cascade
    /// of finishing workers from concurrently re-entering the loop and
    /// exceeding `max_concurrent`.
    async fn process_next(self: &Arc<Self>) {
        let Ok(_guard) = self.dispatch_guard.try_lock() else {
            return;
        };

        loop {
            // The capacity check and the `active_count` reservation happen
            // under the same lock `execute()` uses, so a request admitted
            // directly by `execute()` and one dispatched from here can
            // never both claim the same slot.
            let item = {
                let mut inner = self.inner.lock().expect("pool mutex poisoned");
                let active = self.active_count.load(Ordering::SeqCst) as usize;
                if active >= self.max_concurrent {
                    None
                } else {
                    match inner.queue.pop_front() {
                        Some(item) => {
                            self.active_count.fetch_add(1, Ordering::SeqCst);
                            Some(item)
                        }
                        None => None,
                    }
                }
            };

            let Some(item) = item else {
                break;
            };

            let pool = Arc::clone(self);
            tokio::spawn(async move {
                pool.processed_total.fetch_add(1, Ordering::SeqCst);

                let result = pool.executor.execute(&item.request).await.map_err(PoolError::from);

                pool.active_count.fetch_sub(1, Ordering::SeqCst);
                if result.is_err() {
                    pool.failed_total.fetch_add(1, Ordering::SeqCst);
                }

                let _ = item.resolve.send(result);
                pool.process_next().await;
            });
        }
    }

    /// Periodic sweep removing queue items older than the configured
    /// queue timeout, rejecting each with `QueueTimeout`.
    pub async fn sweep_aged_items(&self) {
        let expired: Vec<QueueItem> = {
            let mut inner = self.inner.lock().expect("pool mutex poisoned");
            let now = Instant::now();
            let mut kept = std::collections::VecDeque::new();
            let mut expired = Vec::new();
            while let Some(item) = inner.queue.pop_front() {
                if now.duration_since(item.queued_at) > self.queue_timeout {
                    expired.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            inner.queue = kept;
            expired
        };

        for item in expired {
            self.failed_total.fetch_add(1, Ordering::SeqCst);
            let _ = item.resolve.send(Err(PoolError::QueueTimeout));
        }
    }

    /// Begin shutdown: stop accepting new work, reject every queued item
    /// with `Shutdown`, then wait up to `timeout` for in-flight work to
    /// drain.
    pub async fn shutdown(&self, timeout: Duration) -> (usize, bool) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let rejected: Vec<QueueItem> = {
            let mut inner = self.inner.lock().expect("pool mutex poisoned");
            inner.queue.drain(..).collect()
        };
        let rejected_count = rejected.len();
        for item in rejected {
            let _ = item.resolve.send(Err(PoolError::Shutdown));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.active_count.load(Ordering::SeqCst) == 0 {
                return (rejected_count, false);
            }
            if Instant::now() >= deadline {
                return (rejected_count, true);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Current point-in-time counters.
    pub fn counters(&self) -> PoolCounters {
        let queued = self.inner.lock().expect("pool mutex poisoned").queue.len();
        PoolCounters {
            active: self.active_count.load(Ordering::SeqCst) as usize,
            queued,
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
            processed_total: self.processed_total.load(Ordering::SeqCst),
            queued_total: self.queued_total.load(Ordering::SeqCst),
            failed_total: self.failed_total.load(Ordering::SeqCst),
        }
    }

    /// True if the pool has a free slot or queue room for one more item.
    pub fn has_capacity(&self) -> bool {
        let counters = self.counters();
        counters.active < counters.max_concurrent || counters.queued < counters.max_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn pool_with(max_concurrent: usize, max_queue: usize) -> Arc<ProcessPool> {
        let executor = CliExecutor::new("sleep", 5_000);
        ProcessPool::new(executor, max_concurrent, max_queue, 30_000)
    }

    /// A pool backed by a real subprocess that sleeps `sleep_ms` before
    /// emitting a valid success envelope, so concurrent `execute()` calls
    /// genuinely overlap in-flight instead of resolving before the next
    /// caller reaches the admission check. The returned `NamedTempFile`
    /// must be kept alive for the pool's lifetime.
    fn slow_script_pool(max_concurrent: usize, max_queue: usize, sleep_ms: u64) -> (Arc<ProcessPool>, tempfile::NamedTempFile) {
        let mut script = tempfile::Builder::new().suffix(".sh").tempfile().expect("create fixture script");
        writeln!(
            script,
            "#!/bin/sh\nsleep {}\necho '{{\"is_error\":false,\"result\":\"ok\"}}'",
            sleep_ms as f64 / 1000.0
        )
        .expect("write fixture script");
        let mut perms = script.as_file().metadata().expect("script metadata").permissions();
        perms.set_mode(0o755);
        script.as_file().set_permissions(perms).expect("chmod fixture script");

        let executor = CliExecutor::new(script.path().to_string_lossy().to_string(), 5_000);
        let pool = ProcessPool::new(executor, max_concurrent, max_queue, 30_000);
        (pool, script)
    }

    // Multi-threaded so the four `execute()` calls can genuinely run on
    // separate OS threads at once — a single-threaded runtime never
    // preempts mid-admission and would pass even without the fix.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn execute_never_exceeds_max_concurrent_under_concurrent_callers() {
        let (pool, _script) = slow_script_pool(1, 2, 100);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.execute(ExecutionRequest {
                    query: "x".to_string(),
                    ..Default::default()
                })
                .await
            }));
        }

        // Give all four callers a chance to reach the admission check
        // before the first one completes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let counters = pool.counters();
        assert!(counters.active <= 1, "active_count exceeded max_concurrent: {counters:?}");
        assert!(counters.queued <= 2, "queue exceeded max_queue: {counters:?}");

        let mut ok = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PoolError::QueueFull) => full += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(ok, 3, "exactly one immediate run plus two queued runs should succeed");
        assert_eq!(full, 1, "the fourth concurrent call should be rejected with QueueFull");
    }

    #[tokio::test]
    async fn queue_full_rejects_excess_items() {
        let pool = pool_with(0, 0);
        let req = ExecutionRequest {
            query: "x".to_string(),
            ..Default::default()
        };
        let err = pool.execute(req).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueFull));
    }

    #[tokio::test]
    async fn shutdown_rejects_queued_items() {
        let pool = pool_with(0, 5);
        let req = ExecutionRequest {
            query: "x".to_string(),
            ..Default::default()
        };

        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move { pool_clone.execute(req).await });
        tokio::task::yield_now().await;

        let (rejected, timed_out) = pool.shutdown(Duration::from_millis(100)).await;
        assert_eq!(rejected, 1);
        assert!(!timed_out);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PoolError::Shutdown)));
    }

    #[tokio::test]
    async fn shutdown_then_execute_rejected() {
        let pool = pool_with(1, 1);
        pool.shutdown(Duration::from_millis(10)).await;
        let req = ExecutionRequest {
            query: "x".to_string(),
            ..Default::default()
        };
        let err = pool.execute(req).await.unwrap_err();
        assert!(matches!(err, PoolError::Shutdown));
    }

    #[test]
    fn counters_start_at_zero() {
        let pool = pool_with(2, 10);
        let counters = pool.counters();
        assert_eq!(counters.active, 0);
        assert_eq!(counters.queued, 0);
        assert_eq!(counters.max_concurrent, 2);
        assert_eq!(counters.max_queue, 10);
    }

    #[test]
    fn has_capacity_true_when_below_caps() {
        let pool = pool_with(1, 1);
        assert!(pool.has_capacity());
    }
}
