//! Background worker queue for CPU-bound audio work.
//!
//! Encode/decode never runs on the real-time audio path or the scheduler
//! thread; it is pushed here and executed in submission order on one
//! dedicated worker. [`BackgroundQueue::wait_for_completion`] is the drain
//! barrier the state machine takes before applying side effects that free
//! shared buffers.

use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Progress {
    submitted: AtomicU64,
    completed: Mutex<u64>,
    drained: Condvar,
}

/// Single-consumer work queue with a point-in-time drain barrier.
pub struct BackgroundQueue {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    progress: Arc<Progress>,
}

impl BackgroundQueue {
    /// Spawns the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Job>();
        let progress = Arc::new(Progress {
            submitted: AtomicU64::new(0),
            completed: Mutex::new(0),
            drained: Condvar::new(),
        });

        let worker_progress = Arc::clone(&progress);
        let worker = thread::Builder::new()
            .name("background".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    // One faulty item must not stop the ones behind it.
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("background job panicked; continuing with next item");
                    }
                    let mut completed = worker_progress
                        .completed
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    *completed += 1;
                    worker_progress.drained.notify_all();
                }
            })
            .expect("failed to spawn background worker");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            progress,
        }
    }

    /// Enqueues a unit of work for asynchronous execution.
    ///
    /// Items run in submission order. Each item is responsible for its own
    /// error handling; failures are isolated per unit.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.progress.submitted.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.tx {
            // Send only fails after shutdown, when nothing waits on the work.
            let _ = tx.send(Box::new(job));
        }
    }

    /// Blocks until every item enqueued strictly before this call has
    /// finished, including the one currently executing.
    ///
    /// This is a point-in-time barrier: items enqueued concurrently with or
    /// after the call are not waited for.
    pub fn wait_for_completion(&self) {
        let target = self.progress.submitted.load(Ordering::SeqCst);
        let mut completed = self
            .progress
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *completed < target {
            completed = self
                .progress
                .drained
                .wait(completed)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for BackgroundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = BackgroundQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let order = Arc::clone(&order);
            queue.schedule(move || {
                order.lock().unwrap().push(i);
            });
        }
        queue.wait_for_completion();

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_for_completion_covers_in_flight_work() {
        let queue = BackgroundQueue::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let done = Arc::clone(&done);
            queue.schedule(move || {
                thread::sleep(Duration::from_millis(20));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.wait_for_completion();

        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_panicking_job_does_not_stall_queue() {
        let queue = BackgroundQueue::new();
        let done = Arc::new(AtomicUsize::new(0));

        queue.schedule(|| panic!("faulty item"));
        let after = Arc::clone(&done);
        queue.schedule(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        queue.wait_for_completion();

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_barrier_is_point_in_time() {
        // A waiter must be released once the items enqueued before its call
        // complete, even while another thread keeps feeding the queue.
        let queue = Arc::new(BackgroundQueue::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let feeder_queue = Arc::clone(&queue);
        let feeder_stop = Arc::clone(&stop);
        let feeder = thread::spawn(move || {
            while !feeder_stop.load(Ordering::SeqCst) {
                feeder_queue.schedule(|| thread::sleep(Duration::from_millis(1)));
                thread::sleep(Duration::from_millis(1));
            }
        });

        for _ in 0..5 {
            queue.schedule(|| thread::sleep(Duration::from_millis(5)));
        }
        // Must return in bounded time despite the concurrent feeder.
        queue.wait_for_completion();

        stop.store(true, Ordering::SeqCst);
        feeder.join().unwrap();
    }

    #[test]
    fn test_wait_with_empty_queue_returns_immediately() {
        let queue = BackgroundQueue::new();
        queue.wait_for_completion();
    }

    #[test]
    fn test_drop_joins_worker() {
        let queue = BackgroundQueue::new();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        queue.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(queue);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
