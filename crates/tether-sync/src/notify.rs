//! Notification coalescing.
//!
//! Observers report through callbacks wrapped by
//! [`NotifyManager::batch_calls`]. Outside a batch a wrapped callback runs
//! immediately. Inside one, repeated calls collapse to the latest argument
//! and the callback runs once when the outermost batch ends.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct BatchState {
    depth: usize,
    queue: Vec<Task>,
}

/// Batches and coalesces listener notifications.
#[derive(Default)]
pub struct NotifyManager {
    state: Mutex<BatchState>,
}

impl NotifyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one batch. Queued deliveries flush, in the order they were
    /// first queued, once the outermost batch ends, even if `f` panics.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock().depth += 1;
        let _scope = BatchScope { manager: self };
        f()
    }

    pub fn is_batching(&self) -> bool {
        self.lock().depth > 0
    }

    /// Wrap `callback` so calls made during a batch collapse into a single
    /// delivery of the most recent argument.
    pub fn batch_calls<T, F>(self: &Arc<Self>, callback: F) -> Arc<dyn Fn(T) + Send + Sync>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let manager = Arc::clone(self);
        let callback = Arc::new(callback);
        let pending: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        Arc::new(move |arg: T| {
            let mut state = manager.lock();
            if state.depth == 0 {
                drop(state);
                callback(arg);
                return;
            }
            let already_queued = pending
                .lock()
                .expect("notify lock poisoned")
                .replace(arg)
                .is_some();
            if !already_queued {
                let pending = Arc::clone(&pending);
                let callback = Arc::clone(&callback);
                state.queue.push(Box::new(move || {
                    let latest = pending.lock().expect("notify lock poisoned").take();
                    if let Some(arg) = latest {
                        callback(arg);
                    }
                }));
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().expect("notify lock poisoned")
    }
}

/// Closes one batch level when dropped, flushing the queue at the
/// outermost level.
struct BatchScope<'a> {
    manager: &'a NotifyManager,
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        let flushed = {
            let mut state = self
                .manager
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.depth -= 1;
            if state.depth == 0 {
                std::mem::take(&mut state.queue)
            } else {
                Vec::new()
            }
        };
        flush(flushed);
    }
}

/// Run every task. A panicking task does not stop the rest; the first
/// panic is resumed afterwards unless the thread is already unwinding.
fn flush(tasks: Vec<Task>) {
    let unwinding = std::thread::panicking();
    let mut first_panic = None;
    for task in tasks {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            warn!("listener panicked during batch flush");
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        if !unwinding {
            panic::resume_unwind(payload);
        }
    }
}
