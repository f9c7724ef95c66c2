//! Adaptive worker pool with auto-scaling.
//!
//! [`AdaptivePool`] keeps a permanent set of `min_workers` threads alive for
//! the lifetime of the pool and elastically grows up to `max_workers` under
//! load. The elastic workers self-terminate after `idle_timeout` without
//! work, but never below the permanent minimum.
//!
//! Unlike [`FixedPool`](crate::pool::FixedPool), task placement prefers
//! starting a new worker over queueing while capacity remains: bursty load
//! reaches a running thread sooner, at the cost of more worker churn.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{CoreError, Result};
use crate::pool::{run_task, Task};

struct AdaptiveShared {
    queue_rx: flume::Receiver<Task>,
    slots_tx: flume::Sender<()>,
    slots_rx: flume::Receiver<()>,
    /// Current number of live workers.
    active: AtomicUsize,
    min_workers: usize,
    idle_timeout: Duration,
    /// Serializes the scale-down decision so two idle workers cannot both
    /// pass the `active > min` check and shrink below the minimum.
    scale_lock: Mutex<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AdaptiveShared {
    /// Check-and-decrement for an idle worker that wants to exit.
    ///
    /// The decrement happens under the same lock as the comparison; the
    /// caller must not decrement again on this exit path.
    fn try_retire(&self) -> bool {
        let _guard = self.scale_lock.lock();
        if self.active.load(Ordering::SeqCst) > self.min_workers {
            self.active.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Auto-scaling worker pool.
///
/// The live worker count always stays within `[min_workers, max_workers]`
/// once the permanent set has been established.
pub struct AdaptivePool {
    queue_tx: Mutex<Option<flume::Sender<Task>>>,
    shared: Arc<AdaptiveShared>,
}

impl AdaptivePool {
    /// Create a pool scaling between `min_workers` and `max_workers`, with a
    /// task queue of `queue_size` entries.
    ///
    /// The `min_workers` permanent workers (capped at `max_workers`) are
    /// spawned before this returns. Elastic workers exit after
    /// `idle_timeout` without work.
    #[must_use]
    pub fn new(
        max_workers: usize,
        min_workers: usize,
        queue_size: usize,
        idle_timeout: Duration,
    ) -> Self {
        let max_workers = max_workers.max(1);
        let min_workers = min_workers.min(max_workers);
        let (queue_tx, queue_rx) = flume::bounded(queue_size);
        let (slots_tx, slots_rx) = flume::bounded(max_workers);

        let pool = Self {
            queue_tx: Mutex::new(Some(queue_tx)),
            shared: Arc::new(AdaptiveShared {
                queue_rx,
                slots_tx,
                slots_rx,
                active: AtomicUsize::new(0),
                min_workers,
                idle_timeout,
                scale_lock: Mutex::new(()),
                handles: Mutex::new(Vec::new()),
            }),
        };

        for _ in 0..min_workers {
            pool.start_permanent_worker();
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

        let task: Task = Box::new(task);

        // Prefer waking up a fresh worker over parking the task in the
        // queue: a consumer is then guaranteed to exist for the enqueue.
        if self.shared.slots_tx.try_send(()).is_ok() {
            self.start_adaptive_worker();
            let _ = queue_tx.send(task);
            return;
        }

        let task = match queue_tx.try_send(task) {
            Ok(()) => return,
            Err(flume::TrySendError::Full(task)) => task,
            Err(flume::TrySendError::Disconnected(_)) => {
                warn!("schedule raced with close; task dropped");
                return;
            }
        };

        // Worker limit reached and queue full: block until space frees up.
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

        if self.shared.slots_tx.try_send(()).is_ok() {
            self.start_adaptive_worker();
            queue_tx.send(task).map_err(|_| CoreError::PoolClosed)?;
            return Ok(());
        }

        let task = match queue_tx.try_send(task) {
            Ok(()) => return Ok(()),
            Err(flume::TrySendError::Full(task)) => task,
            Err(flume::TrySendError::Disconnected(_)) => return Err(CoreError::PoolClosed),
        };

        match queue_tx.send_timeout(task, timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(_)) => Err(CoreError::ScheduleTimeout(timeout)),
            Err(flume::SendTimeoutError::Disconnected(_)) => Err(CoreError::PoolClosed),
        }
    }

    /// Current number of live workers. Read-only, no side effects.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of tasks currently waiting in the queue. Read-only.
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

    /// Launch a worker that lives until the pool closes. Forms the permanent
    /// minimum that is always available.
    fn start_permanent_worker(&self) {
        // The slot must be held before the thread exists: a concurrent
        // schedule that won it in the meantime would stack an extra adaptive
        // worker on top of the permanent set, pushing the live count past
        // the maximum. min <= max, so the slot is always free here.
        let _ = self.shared.slots_tx.try_send(());

        let shared = Arc::clone(&self.shared);
        shared.active.fetch_add(1, Ordering::SeqCst);

        let id = shared.handles.lock().len();
        let spawned = thread::Builder::new()
            .name(format!("bulkhead-worker-{id}"))
            .spawn(move || {
                while let Ok(task) = shared.queue_rx.recv() {
                    run_task(task);
                }
                shared.active.fetch_sub(1, Ordering::SeqCst);
                let _ = shared.slots_rx.try_recv();
            });

        if let Err(e) = self.store_handle(spawned) {
            error!("failed to spawn permanent worker: {e}");
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            let _ = self.shared.slots_rx.try_recv();
        }
    }

    /// Launch a worker that may retire after idling. The caller must already
    /// hold a semaphore slot.
    fn start_adaptive_worker(&self) {
        let shared = Arc::clone(&self.shared);
        shared.active.fetch_add(1, Ordering::SeqCst);

        let id = shared.handles.lock().len();
        let spawned = thread::Builder::new()
            .name(format!("bulkhead-worker-{id}"))
            .spawn(move || {
                loop {
                    match shared.queue_rx.recv_timeout(shared.idle_timeout) {
                        Ok(task) => run_task(task),
                        Err(flume::RecvTimeoutError::Timeout) => {
                            if shared.try_retire() {
                                debug!("idle worker retired");
                                let _ = shared.slots_rx.try_recv();
                                return;
                            }
                        }
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
                shared.active.fetch_sub(1, Ordering::SeqCst);
                let _ = shared.slots_rx.try_recv();
            });

        if let Err(e) = self.store_handle(spawned) {
            error!("failed to spawn adaptive worker: {e}");
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            let _ = self.shared.slots_rx.try_recv();
        }
    }

    fn store_handle(&self, spawned: std::io::Result<JoinHandle<()>>) -> std::io::Result<()> {
        let handle = spawned?;
        self.shared.handles.lock().push(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Poll `cond` for up to one second before giving up.
    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_minimum_workers_are_prespawned() {
        let pool = AdaptivePool::new(4, 2, 16, Duration::from_millis(10));
        assert_eq!(pool.active_workers(), 2);
        // Idle time passes, permanent workers never retire.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.active_workers(), 2);
        pool.close();
    }

    #[test]
    fn test_worker_count_stays_within_bounds() {
        let pool = AdaptivePool::new(3, 1, 16, Duration::from_millis(20));
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);

        for _ in 0..8 {
            let gate_rx = gate_rx.clone();
            pool.schedule(move || {
                let _ = gate_rx.recv();
            });
            assert!(pool.active_workers() <= 3);
        }
        assert!(pool.active_workers() >= 1);

        drop(gate_tx);
        pool.close();
    }

    #[test]
    fn test_startup_burst_never_exceeds_max_workers() {
        // Permanent workers own their slots before `new` returns. A burst
        // landing right after construction must reuse those workers, not
        // win the slots first and stack adaptive workers on top.
        for _ in 0..200 {
            let pool = AdaptivePool::new(2, 2, 0, Duration::from_millis(50));
            let (gate_tx, gate_rx) = flume::bounded::<()>(0);

            for _ in 0..2 {
                let gate_rx = gate_rx.clone();
                pool.schedule(move || {
                    let _ = gate_rx.recv();
                });
            }
            assert!(
                pool.active_workers() <= 2,
                "active workers peaked at {} with max=2",
                pool.active_workers()
            );

            drop(gate_tx);
            pool.close();
        }
    }

    #[test]
    fn test_burst_scales_up_then_settles_to_minimum() {
        // max=2, min=1, rendezvous queue, 50ms idle timeout: three 100ms
        // tasks run at a concurrency of two, and the pool shrinks back to
        // one worker after idling out.
        let pool = AdaptivePool::new(2, 1, 0, Duration::from_millis(50));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.schedule(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(wait_for(|| done.load(Ordering::SeqCst) == 3));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(pool.active_workers() <= 2);

        // The elastic worker idles out; the permanent one stays.
        assert!(wait_for(|| pool.active_workers() == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.active_workers(), 1);

        pool.close();
    }

    #[test]
    fn test_schedule_timeout_fires_when_saturated() {
        let pool = AdaptivePool::new(1, 1, 0, Duration::from_millis(50));
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        pool.schedule(move || {
            let _ = gate_rx.recv();
        });
        thread::sleep(Duration::from_millis(20));

        let result = pool.schedule_timeout(Duration::from_millis(30), || {});
        assert!(matches!(result, Err(CoreError::ScheduleTimeout(_))));

        gate_tx.send(()).unwrap();
        pool.close();
    }

    #[test]
    fn test_pending_tasks_all_execute_on_close() {
        let pool = AdaptivePool::new(2, 1, 64, Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..24 {
            let counter = Arc::clone(&counter);
            pool.schedule(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.close();
        assert_eq!(counter.load(Ordering::SeqCst), 24);
    }

    #[test]
    fn test_queue_depth_reports_waiting_tasks() {
        let pool = AdaptivePool::new(1, 1, 8, Duration::from_millis(50));
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        pool.schedule(move || {
            let _ = gate_rx.recv();
        });
        thread::sleep(Duration::from_millis(20));

        pool.schedule(|| {});
        pool.schedule(|| {});
        assert_eq!(pool.queue_depth(), 2);

        gate_tx.send(()).unwrap();
        pool.close();
        assert_eq!(pool.queue_depth(), 0);
    }
}
