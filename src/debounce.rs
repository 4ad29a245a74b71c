//! Trailing-edge debouncer.
//!
//! Collapses a burst of [`Debouncer::schedule`] calls into a single callback
//! invocation that fires `delay` after the last call in the burst. A worker
//! thread owns the timer; the callback runs on that thread outside the lock,
//! so `schedule` and `cancel` never wait on a running callback.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Pending<T> {
    value: T,
    deadline: Instant,
}

struct Slot<T> {
    pending: Option<Pending<T>>,
    shutdown: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    wake: Condvar,
}

/// Delays a callback until input has been quiet for a while.
///
/// ```
/// use std::sync::mpsc;
/// use std::time::Duration;
/// use username_avail::debounce::Debouncer;
///
/// let (tx, rx) = mpsc::channel();
/// let debouncer = Debouncer::new(move |v: String| tx.send(v).unwrap());
/// debouncer.schedule("a".to_string(), Duration::from_millis(20));
/// debouncer.schedule("ab".to_string(), Duration::from_millis(20));
/// assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "ab");
/// ```
pub struct Debouncer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Start a debouncer that hands each surviving value to `callback`.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                pending: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("debouncer".into())
                .spawn(move || run(&shared, callback))
                .expect("failed to spawn debouncer thread")
        };
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Replace any pending invocation with `value`, firing `delay` from now.
    pub fn schedule(&self, value: T, delay: Duration) {
        let mut slot = self.shared.slot.lock();
        slot.pending = Some(Pending {
            value,
            deadline: Instant::now() + delay,
        });
        self.shared.wake.notify_one();
    }

    /// Drop any pending invocation. No-op if nothing is pending.
    pub fn cancel(&self) {
        let mut slot = self.shared.slot.lock();
        if slot.pending.take().is_some() {
            self.shared.wake.notify_one();
        }
    }

    /// Whether an invocation is scheduled and has not fired yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.slot.lock().pending.is_some()
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        {
            let mut slot = self.shared.slot.lock();
            slot.shutdown = true;
            slot.pending = None;
            self.shared.wake.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            // The last owner may be dropped from inside the callback.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn run<T, F>(shared: &Shared<T>, mut callback: F)
where
    F: FnMut(T),
{
    let mut slot = shared.slot.lock();
    loop {
        if slot.shutdown {
            return;
        }
        let Some(deadline) = slot.pending.as_ref().map(|p| p.deadline) else {
            shared.wake.wait(&mut slot);
            continue;
        };
        if Instant::now() < deadline {
            // Woken early by schedule/cancel or timed out; re-inspect either way.
            let _ = shared.wake.wait_until(&mut slot, deadline);
            continue;
        }
        let Some(fired) = slot.pending.take() else {
            continue;
        };
        drop(slot);
        callback(fired.value);
        slot = shared.slot.lock();
    }
}
