//! Task barrier.
//!
//! A process-wide counter of in-flight asynchronous operations with a FIFO
//! queue of continuations. Pipeline stages raise the barrier for every I/O
//! they start; when the count drops to zero, queued continuations run in
//! registration order, and each may raise the barrier again. The barrier is
//! the sole process-level liveness signal: [`TaskBarrier::wait_idle`]
//! resolves once nothing is in flight and nothing is queued.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Identifier for one in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(u64);

/// A continuation queued behind the barrier.
///
/// The async form receives a [`TaskHold`] and keeps the barrier raised
/// until the hold is finished (or dropped).
pub enum Continuation {
    Sync(Box<dyn FnOnce() + Send>),
    Async(Box<dyn FnOnce(TaskHold) + Send>),
}

/// Keeps the barrier raised on behalf of an async continuation.
///
/// Dropping the hold without calling [`TaskHold::finish`] still lowers the
/// barrier, so a panicking continuation cannot wedge the process.
pub struct TaskHold {
    barrier: TaskBarrier,
    id: Option<TaskId>,
}

impl TaskHold {
    /// Lower the barrier for this continuation.
    pub fn finish(mut self) {
        if let Some(id) = self.id.take() {
            self.barrier.end(id);
        }
    }
}

impl Drop for TaskHold {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.barrier.end(id);
        }
    }
}

struct BarrierState {
    count: usize,
    next_id: u64,
    queue: VecDeque<Continuation>,
    draining: bool,
}

struct BarrierInner {
    state: Mutex<BarrierState>,
    idle: Notify,
}

/// See the module docs.
#[derive(Clone)]
pub struct TaskBarrier {
    inner: Arc<BarrierInner>,
}

impl Default for TaskBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                state: Mutex::new(BarrierState {
                    count: 0,
                    next_id: 0,
                    queue: VecDeque::new(),
                    draining: false,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Raise the barrier for one operation.
    pub fn begin(&self, label: &str) -> TaskId {
        let id = {
            let mut state = self.inner.state.lock();
            state.count += 1;
            let id = TaskId(state.next_id);
            state.next_id += 1;
            id
        };
        tracing::debug!(task = label, id = id.0, "task begin");
        id
    }

    /// Lower the barrier for one operation. At zero, queued continuations
    /// run in FIFO order.
    pub fn end(&self, id: TaskId) {
        let reached_zero = {
            let mut state = self.inner.state.lock();
            state.count = state.count.saturating_sub(1);
            state.count == 0
        };
        tracing::trace!(id = id.0, "task end");
        if reached_zero {
            self.drain();
        }
    }

    /// Number of operations currently in flight.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().count
    }

    /// Queue a continuation, or run it immediately when nothing is in
    /// flight.
    pub fn then(&self, continuation: Continuation) {
        let run_now = {
            let mut state = self.inner.state.lock();
            if state.count == 0 && !state.draining && state.queue.is_empty() {
                true
            } else {
                state.queue.push_back(continuation);
                return;
            }
        };
        if run_now {
            self.run_continuation(continuation);
            self.notify_if_idle();
        }
    }

    /// Queue a synchronous continuation.
    pub fn then_sync(&self, f: impl FnOnce() + Send + 'static) {
        self.then(Continuation::Sync(Box::new(f)));
    }

    /// Queue an asynchronous continuation; it keeps the barrier raised
    /// until its [`TaskHold`] is finished.
    pub fn then_async(&self, f: impl FnOnce(TaskHold) + Send + 'static) {
        self.then(Continuation::Async(Box::new(f)));
    }

    /// Resolve once the count is zero and the queue is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock();
                if state.count == 0 && state.queue.is_empty() && !state.draining {
                    return;
                }
            }
            notified.await;
        }
    }

    fn drain(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.count != 0 {
                    state.draining = false;
                    return;
                }
                match state.queue.pop_front() {
                    Some(c) => c,
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };
            self.run_continuation(next);
        }
        self.notify_if_idle();
    }

    fn run_continuation(&self, continuation: Continuation) {
        match continuation {
            Continuation::Sync(f) => {
                if catch_unwind(AssertUnwindSafe(f)).is_err() {
                    tracing::error!("continuation panicked");
                }
            }
            Continuation::Async(f) => {
                let id = self.begin("continuation");
                let hold = TaskHold {
                    barrier: self.clone(),
                    id: Some(id),
                };
                // The hold's Drop lowers the barrier even on panic.
                if catch_unwind(AssertUnwindSafe(move || f(hold))).is_err() {
                    tracing::error!("continuation panicked");
                }
            }
        }
    }

    fn notify_if_idle(&self) {
        let idle = {
            let state = self.inner.state.lock();
            state.count == 0 && state.queue.is_empty() && !state.draining
        };
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for TaskBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskBarrier")
            .field("count", &state.count)
            .field("queued", &state.queue.len())
            .finish()
    }
}
