//! Main-thread event loop primitive.
//!
//! One consumer thread blocks on a set of event flags: audio input ready,
//! audio output ready, deferred task available. Hardware callbacks and
//! protocol threads only ever set flags or append tasks through a cloneable
//! [`SchedulerHandle`]; everything else — state transitions, protocol calls,
//! UI updates — runs on the consumer thread, which removes the need for
//! locks around those operations.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A deferred unit of work, run with exclusive access to the consumer's
/// context (the application core).
pub type Task<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Flags returned from one wait: which event sources need servicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Wakeup {
    pub input_ready: bool,
    pub output_ready: bool,
    pub tasks_ready: bool,
}

impl Wakeup {
    pub fn any(&self) -> bool {
        self.input_ready || self.output_ready || self.tasks_ready
    }
}

struct Inner<C> {
    input_ready: bool,
    output_ready: bool,
    tasks: VecDeque<Task<C>>,
}

struct Shared<C> {
    inner: Mutex<Inner<C>>,
    wake: Condvar,
}

/// The consumer side of the event loop.
pub struct Scheduler<C> {
    shared: Arc<Shared<C>>,
}

/// Producer handle: safe to clone into interrupt-style callbacks and other
/// threads. Signal methods do minimal work (flag-set plus notify).
pub struct SchedulerHandle<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for SchedulerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    input_ready: false,
                    output_ready: false,
                    tasks: VecDeque::new(),
                }),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> SchedulerHandle<C> {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until at least one event source is pending, then consumes the
    /// input/output flags and reports what needs servicing. Tasks are left
    /// queued for [`Scheduler::take_tasks`].
    pub fn wait(&self) -> Wakeup {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let wakeup = Wakeup {
                input_ready: inner.input_ready,
                output_ready: inner.output_ready,
                tasks_ready: !inner.tasks.is_empty(),
            };
            if wakeup.any() {
                inner.input_ready = false;
                inner.output_ready = false;
                return wakeup;
            }
            inner = self
                .shared
                .wake
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`Scheduler::wait`] but gives up after `timeout`, returning an
    /// empty wakeup. Lets the loop interleave periodic work.
    pub fn wait_timeout(&self, timeout: Duration) -> Wakeup {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let wakeup = Wakeup {
                input_ready: inner.input_ready,
                output_ready: inner.output_ready,
                tasks_ready: !inner.tasks.is_empty(),
            };
            if wakeup.any() {
                inner.input_ready = false;
                inner.output_ready = false;
                return wakeup;
            }
            let (guard, result) = self
                .shared
                .wake
                .wait_timeout(inner, timeout)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() {
                return Wakeup::default();
            }
        }
    }

    /// Atomically swaps out the entire deferred-task queue.
    ///
    /// The caller runs the returned tasks to completion in FIFO order; tasks
    /// scheduled while they run land in the next swap.
    pub fn take_tasks(&self) -> VecDeque<Task<C>> {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut inner.tasks)
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SchedulerHandle<C> {
    /// Appends a task and wakes the consumer. The only thread-safe way for
    /// callback contexts to get work onto the consumer thread.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tasks.push_back(Box::new(task));
        drop(inner);
        self.shared.wake.notify_one();
    }

    /// Marks capture data as available. Callable from hardware callback
    /// contexts; does nothing but set a flag and notify.
    pub fn signal_input_ready(&self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.input_ready = true;
        drop(inner);
        self.shared.wake.notify_one();
    }

    /// Marks the playback path as writable.
    pub fn signal_output_ready(&self) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.output_ready = true;
        drop(inner);
        self.shared.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Ctx {
        log: Vec<&'static str>,
    }

    #[test]
    fn test_schedule_wakes_waiter() {
        let scheduler: Scheduler<Ctx> = Scheduler::new();
        let handle = scheduler.handle();

        let signaler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.schedule(|ctx: &mut Ctx| ctx.log.push("task"));
        });

        let wakeup = scheduler.wait();
        assert!(wakeup.tasks_ready);
        assert!(!wakeup.input_ready);

        let mut ctx = Ctx { log: Vec::new() };
        for task in scheduler.take_tasks() {
            task(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["task"]);
        signaler.join().unwrap();
    }

    #[test]
    fn test_input_output_flags_are_consumed_by_wait() {
        let scheduler: Scheduler<Ctx> = Scheduler::new();
        let handle = scheduler.handle();

        handle.signal_input_ready();
        handle.signal_output_ready();

        let wakeup = scheduler.wait();
        assert!(wakeup.input_ready);
        assert!(wakeup.output_ready);

        // Flags were consumed; next wait times out.
        let next = scheduler.wait_timeout(Duration::from_millis(10));
        assert!(!next.any());
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let scheduler: Scheduler<Ctx> = Scheduler::new();
        let handle = scheduler.handle();

        handle.schedule(|ctx: &mut Ctx| ctx.log.push("first"));
        handle.schedule(|ctx: &mut Ctx| ctx.log.push("second"));
        handle.schedule(|ctx: &mut Ctx| ctx.log.push("third"));

        let mut ctx = Ctx { log: Vec::new() };
        for task in scheduler.take_tasks() {
            task(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_task_scheduled_during_drain_lands_in_next_swap() {
        let scheduler: Scheduler<Ctx> = Scheduler::new();
        let handle = scheduler.handle();

        let late = scheduler.handle();
        handle.schedule(move |ctx: &mut Ctx| {
            ctx.log.push("first");
            late.schedule(|ctx: &mut Ctx| ctx.log.push("late"));
        });

        let mut ctx = Ctx { log: Vec::new() };
        for task in scheduler.take_tasks() {
            task(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["first"]);

        for task in scheduler.take_tasks() {
            task(&mut ctx);
        }
        assert_eq!(ctx.log, vec!["first", "late"]);
    }

    #[test]
    fn test_wait_timeout_returns_empty_wakeup() {
        let scheduler: Scheduler<Ctx> = Scheduler::new();
        let wakeup = scheduler.wait_timeout(Duration::from_millis(5));
        assert!(!wakeup.any());
    }
}
