//! Minimal fine-grained tracking: signals, observers and batches.
//!
//! Reading a [`Signal`] with [`Signal::get`] inside an [`observe`] callback
//! subscribes that observer; writing the signal re-runs every subscribed
//! observer synchronously, or once at the end of the enclosing [`batch`].
//! Tracking state is per thread.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError, Weak};

type Effect = Box<dyn FnMut() + Send>;

struct Computation {
    effect: Mutex<Effect>,
    disposed: AtomicBool,
}

impl Computation {
    fn run(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        // A computation whose effect writes one of its own dependencies
        // does not re-enter itself. A previous panic leaves the effect usable.
        let mut effect = match self.effect.try_lock() {
            Ok(effect) => effect,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        TRACKING.with(|stack| stack.borrow_mut().push(Arc::clone(self)));
        let _tracking = TrackingScope;
        (*effect)();
    }

    fn is_live(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    pending: Vec<Arc<Computation>>,
}

thread_local! {
    static TRACKING: RefCell<Vec<Arc<Computation>>> = const { RefCell::new(Vec::new()) };
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Pops the running computation when dropped.
struct TrackingScope;

impl Drop for TrackingScope {
    fn drop(&mut self) {
        TRACKING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Closes one batch level when dropped, running deferred observers at the
/// outermost level.
struct BatchScope;

impl Drop for BatchScope {
    fn drop(&mut self) {
        let pending = BATCH.with(|b| {
            let mut b = b.borrow_mut();
            b.depth -= 1;
            if b.depth == 0 {
                std::mem::take(&mut b.pending)
            } else {
                Vec::new()
            }
        });
        // Observers deferred by an aborted batch are dropped.
        if std::thread::panicking() {
            return;
        }
        for c in pending {
            c.run();
        }
    }
}

fn current_computation() -> Option<Arc<Computation>> {
    TRACKING.with(|stack| stack.borrow().last().cloned())
}

fn schedule(computations: Vec<Arc<Computation>>) {
    let immediate = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        if batch.depth == 0 {
            return computations;
        }
        for c in computations {
            if !batch.pending.iter().any(|p| Arc::ptr_eq(p, &c)) {
                batch.pending.push(c);
            }
        }
        Vec::new()
    });
    for c in immediate {
        c.run();
    }
}

/// Run `f`, deferring observer re-runs until the outermost batch ends.
/// Each observer runs at most once per batch.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH.with(|b| b.borrow_mut().depth += 1);
    let _scope = BatchScope;
    f()
}

/// A handle keeping an [`observe`] callback alive. Dropping it disposes the
/// observer.
#[must_use = "the observer stops when its Observation is dropped"]
pub struct Observation {
    computation: Arc<Computation>,
}

impl Observation {
    pub fn dispose(&self) {
        self.computation.disposed.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        !self.computation.is_live()
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Run `effect` now and again whenever a signal it read changes.
pub fn observe(effect: impl FnMut() + Send + 'static) -> Observation {
    let computation = Arc::new(Computation {
        effect: Mutex::new(Box::new(effect)),
        disposed: AtomicBool::new(false),
    });
    computation.run();
    Observation { computation }
}

struct SignalInner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<Weak<Computation>>>,
}

/// A tracked value cell.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Read the value and subscribe the running observer, if any.
    pub fn get(&self) -> T {
        self.track();
        self.peek()
    }

    /// Read the value without subscribing.
    pub fn peek(&self) -> T {
        self.inner.value.read().expect("signal lock poisoned").clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.value.write().expect("signal lock poisoned") = value;
        self.notify();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.write().expect("signal lock poisoned"));
        self.notify();
    }

    fn track(&self) {
        let Some(current) = current_computation() else {
            return;
        };
        let mut subs = self.inner.subscribers.lock().expect("signal lock poisoned");
        if !subs.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&current))) {
            subs.push(Arc::downgrade(&current));
        }
    }

    fn notify(&self) {
        let live: Vec<Arc<Computation>> = {
            let mut subs = self.inner.subscribers.lock().expect("signal lock poisoned");
            subs.retain(|w| w.upgrade().is_some_and(|c| c.is_live()));
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        schedule(live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn observe_runs_immediately_and_on_change() {
        let count = Signal::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _obs = observe({
            let count = count.clone();
            let seen = Arc::clone(&seen);
            move || seen.lock().unwrap().push(count.get())
        });
        count.set(2);
        count.set(3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn peek_does_not_subscribe() {
        let s = Signal::new(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _obs = observe({
            let s = s.clone();
            let runs = Arc::clone(&runs);
            move || {
                s.peek();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        s.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_coalesces_reruns() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _obs = observe({
            let (a, b) = (a.clone(), b.clone());
            let runs = Arc::clone(&runs);
            move || {
                a.get();
                b.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        batch(|| {
            a.set(1);
            b.set(1);
            a.set(2);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_observation_stops_reruns() {
        let s = Signal::new(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let obs = observe({
            let s = s.clone();
            let runs = Arc::clone(&runs);
            move || {
                s.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(obs);
        s.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_writing_observer_does_not_recurse() {
        let s = Signal::new(0);
        let _obs = observe({
            let s = s.clone();
            move || {
                let v = s.get();
                if v < 5 {
                    s.set(v + 1);
                }
            }
        });
        assert_eq!(s.peek(), 1);
    }

    #[test]
    fn panicking_batch_does_not_leave_batching_on() {
        let s = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _obs = observe({
            let s = s.clone();
            let seen = Arc::clone(&seen);
            move || seen.lock().unwrap().push(s.get())
        });
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            batch(|| {
                s.set(1);
                panic!("effect bug");
            })
        }));
        assert!(outcome.is_err());

        s.set(2);
        assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn panicking_effect_keeps_running_later() {
        let s = Signal::new(0);
        let other = Signal::new(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _obs = observe({
            let s = s.clone();
            let runs = Arc::clone(&runs);
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if s.get() == 1 {
                    panic!("effect bug");
                }
            }
        });
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| s.set(1)));
        assert!(outcome.is_err());

        // An untracked read after the panic must not subscribe the failed run.
        other.get();
        other.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        s.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        other.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
