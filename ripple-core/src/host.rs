//! Host Scheduling
//!
//! The runtime never owns an event loop. Whenever it needs something to
//! happen "later" (a deferred flush, an async fetch) it hands the work to a
//! [`HostScheduler`]. Two implementations ship with the crate:
//!
//! - [`ManualHost`]: a plain message queue drained by
//!   [`ManualHost::run_pending`]. Deterministic, and usable where no async
//!   runtime exists.
//! - [`TokioHost`]: hands work to `tokio::task::spawn_local`, so it must be
//!   used from inside a `tokio::task::LocalSet`.
//!
//! Without an installed host the runtime picks [`TokioHost`] when a tokio
//! runtime is entered and an undrained [`ManualHost`] otherwise.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use futures_util::task::noop_waker;
use tracing::warn;

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Future spawned on the host. Never sent across threads.
pub type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// The event-loop abstraction the runtime schedules through.
pub trait HostScheduler {
    /// Run `task` at the next opportunity, after the current call stack.
    fn queue_task(&self, task: Task);

    /// Drive `future` to completion in the background.
    fn spawn(&self, future: LocalFuture);
}

#[derive(Default)]
struct ManualQueue {
    tasks: RefCell<VecDeque<Task>>,
    futures: RefCell<Vec<LocalFuture>>,
}

/// A host that only makes progress when told to.
///
/// Clones share the same queue, so a test can keep one handle and install
/// another with [`crate::Runtime::set_host`].
#[derive(Clone, Default)]
pub struct ManualHost {
    inner: Rc<ManualQueue>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks and futures still waiting.
    pub fn pending(&self) -> usize {
        self.inner.tasks.borrow().len() + self.inner.futures.borrow().len()
    }

    /// Run queued tasks and poll spawned futures until nothing makes
    /// progress. Returns the number of tasks run plus futures completed.
    ///
    /// Futures are polled with a no-op waker, so a future that is still
    /// pending is simply polled again on the next call.
    pub fn run_pending(&self) -> usize {
        let waker = noop_waker();
        let mut cx = TaskContext::from_waker(&waker);
        let mut total = 0;

        loop {
            let mut progressed = 0;

            loop {
                let task = self.inner.tasks.borrow_mut().pop_front();
                match task {
                    Some(task) => {
                        task();
                        progressed += 1;
                    }
                    None => break,
                }
            }

            let futures = std::mem::take(&mut *self.inner.futures.borrow_mut());
            let mut waiting = Vec::with_capacity(futures.len());
            for mut future in futures {
                match future.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => progressed += 1,
                    Poll::Pending => waiting.push(future),
                }
            }
            // Futures spawned while polling were pushed behind our back.
            let mut slot = self.inner.futures.borrow_mut();
            waiting.append(&mut slot);
            *slot = waiting;
            drop(slot);

            total += progressed;
            if progressed == 0 {
                return total;
            }
        }
    }
}

impl HostScheduler for ManualHost {
    fn queue_task(&self, task: Task) {
        self.inner.tasks.borrow_mut().push_back(task);
    }

    fn spawn(&self, future: LocalFuture) {
        self.inner.futures.borrow_mut().push(future);
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("pending", &self.pending())
            .finish()
    }
}

/// A host backed by tokio's local task set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioHost;

impl HostScheduler for TokioHost {
    fn queue_task(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }

    fn spawn(&self, future: LocalFuture) {
        tokio::task::spawn_local(future);
    }
}

/// Host used when none was installed with [`crate::Runtime::set_host`].
pub(crate) fn default_host() -> Rc<dyn HostScheduler> {
    if tokio::runtime::Handle::try_current().is_ok() {
        Rc::new(TokioHost)
    } else {
        warn!("no tokio runtime entered; deferred work waits until flushed by hand");
        Rc::new(ManualHost::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn default_host_outside_tokio_queues_instead_of_panicking() {
        let host = default_host();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        host.queue_task(Box::new(move || flag.set(true)));
        host.spawn(Box::pin(async {}));
        assert!(!ran.get());
    }

    #[test]
    fn manual_host_runs_tasks_in_order() {
        let host = ManualHost::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            host.queue_task(Box::new(move || log.borrow_mut().push(i)));
        }

        assert_eq!(host.pending(), 3);
        assert_eq!(host.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn tasks_queued_by_tasks_run_in_the_same_drain() {
        let host = ManualHost::new();
        let ran = Rc::new(Cell::new(false));

        let inner_host = host.clone();
        let inner_ran = ran.clone();
        host.queue_task(Box::new(move || {
            inner_host.queue_task(Box::new(move || inner_ran.set(true)));
        }));

        assert_eq!(host.run_pending(), 2);
        assert!(ran.get());
    }

    #[test]
    fn pending_futures_are_repolled() {
        let host = ManualHost::new();
        let gate = Rc::new(Cell::new(false));
        let done = Rc::new(Cell::new(false));

        let poll_gate = gate.clone();
        let poll_done = done.clone();
        host.spawn(Box::pin(async move {
            std::future::poll_fn(|_| {
                if poll_gate.get() {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            })
            .await;
            poll_done.set(true);
        }));

        assert_eq!(host.run_pending(), 0);
        assert!(!done.get());
        assert_eq!(host.pending(), 1);

        gate.set(true);
        assert_eq!(host.run_pending(), 1);
        assert!(done.get());
    }
}
