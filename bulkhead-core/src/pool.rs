//! Fixed worker pool for OS-thread reuse.
//!
//! [`FixedPool`] manages up to a fixed number of worker threads that execute
//! queued tasks. Workers are started lazily: scheduling prefers an enqueue,
//! then spins up one extra worker when the queue is full, and finally blocks
//! the caller once the worker limit is reached.
//!
//! The task queue is a bounded [`flume`] channel and the worker-count limit
//! is a token channel used as a counting semaphore, so the hot path needs no
//! external locking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{CoreError, Result};

/// A unit of work accepted by the pools.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Run one task, containing any panic to the task itself.
///
/// A panicking task must not take its worker down with it; losing the worker
/// would silently shrink pool capacity for the rest of the process lifetime.
pub(crate) fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("scheduled task panicked; worker kept alive");
    }
}

struct PoolShared {
    queue_rx: flume::Receiver<Task>,
    slots_tx: flume::Sender<()>,
    slots_rx: flume::Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Fixed-limit worker pool.
///
/// # Shutdown
///
/// [`FixedPool::close`] stops the queue and waits for every worker to drain
/// it. Scheduling after `close` is a precondition violation: the task is
/// logged and dropped rather than executed. Callers must stop submitting
/// before (or concurrently with, never after) closing.
pub struct FixedPool {
    queue_tx: Mutex<Option<flume::Sender<Task>>>,
    shared: Arc<PoolShared>,
}

impl FixedPool {
    /// Create a pool with at most `max_workers` workers and a task queue of
    /// `queue_size` entries.
    ///
    /// `prealloc_workers` worker threads (capped at `max_workers`) are
    /// started eagerly; the rest are created on demand.
    #[must_use]
    pub fn new(max_workers: usize, queue_size: usize, prealloc_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (queue_tx, queue_rx) = flume::bounded(queue_size);
        let (slots_tx, slots_rx) = flume::bounded(max_workers);

        let pool = Self {
            queue_tx: Mutex::new(Some(queue_tx)),
            shared: Arc::new(PoolShared {
                queue_rx,
                slots_tx,
                slots_rx,
                handles: Mutex::new(Vec::new()),
            }),
        };

        for _ in 0..prealloc_workers.min(max_workers) {
            if pool.shared.slots_tx.try_send(()).is_ok() {
                pool.start_worker();
            }
        }

        pool
    }

    /// Schedule a task for execution. Never fails, but blocks the caller when
    /// the pool is saturated and the queue is full.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        let Some(queue_tx) = self.sender() else {
            warn!("schedule on closed pool; task dropped");
            return;
        };

        // Fast path: enqueue without blocking.
        let task: Task = Box::new(task);
        let task = match queue_tx.try_send(task) {
            Ok(()) => return,
            Err(flume::TrySendError::Full(task)) => task,
            Err(flume::TrySendError::Disconnected(_)) => {
                warn!("schedule raced with close; task dropped");
                return;
            }
        };

        // Queue is full: start one more worker if the limit allows, then
        // enqueue (a consumer now exists). Otherwise block until the queue
        // has room.
        if self.shared.slots_tx.try_send(()).is_ok() {
            self.start_worker();
        }
        let _ = queue_tx.send(task);
    }

    /// Schedule a task, giving up with [`CoreError::ScheduleTimeout`] if it
    /// cannot be accepted within `timeout`.
    pub fn schedule_timeout(
        &self,
        timeout: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let Some(queue_tx) = self.sender() else {
            return Err(CoreError::PoolClosed);
        };

        let task: Task = Box::new(task);
        let task = match queue_tx.try_send(task) {
            Ok(()) => return Ok(()),
            Err(flume::TrySendError::Full(task)) => task,
            Err(flume::TrySendError::Disconnected(_)) => return Err(CoreError::PoolClosed),
        };

        if self.shared.slots_tx.try_send(()).is_ok() {
            self.start_worker();
            queue_tx.send(task).map_err(|_| CoreError::PoolClosed)?;
            return Ok(());
        }

        match queue_tx.send_timeout(task, timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(_)) => Err(CoreError::ScheduleTimeout(timeout)),
            Err(flume::SendTimeoutError::Disconnected(_)) => Err(CoreError::PoolClosed),
        }
    }

    /// Number of tasks currently waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.queue_rx.len()
    }

    /// Close the queue and wait until every worker has drained it and exited.
    ///
    /// All tasks scheduled before `close` are executed; no new tasks are
    /// accepted afterwards. Idempotent.
    pub fn close(&self) {
        drop(self.queue_tx.lock().take());
        let handles: Vec<_> = self.shared.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn sender(&self) -> Option<flume::Sender<Task>> {
        self.queue_tx.lock().clone()
    }

    /// Launch one worker. The caller must already hold a semaphore slot.
    fn start_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let id = shared.handles.lock().len();
        let spawned = thread::Builder::new()
            .name(format!("bulkhead-worker-{id}"))
            .spawn(move || {
                while let Ok(task) = shared.queue_rx.recv() {
                    run_task(task);
                }
                // Queue closed and drained: release the worker slot.
                let _ = shared.slots_rx.try_recv();
            });

        match spawned {
            Ok(handle) => self.shared.handles.lock().push(handle),
            Err(e) => {
                error!("failed to spawn worker thread: {e}");
                let _ = self.shared.slots_rx.try_recv();
            }
        }
    }
}
