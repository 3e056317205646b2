//! Process-wide hold-open shim.
//!
//! Some platform resources must be initialized once, kept alive while any
//! number of concurrent operations run, and torn down only after the last
//! one finishes (the canonical case is a COM apartment on Windows, which is
//! bound to the thread that opened it). [`HoldOpen`] implements that
//! lifetime: the first [`HoldOpen::add`] spawns a dedicated thread that runs
//! the init closure and then parks on a condition variable until the counter
//! drops back to zero, at which point the teardown closure runs on that same
//! thread and the thread exits.

use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

struct Inner {
    count: Mutex<u64>,
    zero: Condvar,
}

/// A reference-counted, thread-pinned process resource.
pub struct HoldOpen {
    inner: Arc<Inner>,
    init: Mutex<Option<Box<dyn FnMut() + Send>>>,
    teardown: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl HoldOpen {
    /// Creates a shim around an init/teardown pair. Neither runs until the
    /// first [`add`](Self::add).
    pub fn new(
        init: impl FnMut() + Send + 'static,
        teardown: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner { count: Mutex::new(0), zero: Condvar::new() }),
            init: Mutex::new(Some(Box::new(init))),
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Increments the hold count. The first increment spawns the keeper
    /// thread, runs init on it, and leaves the thread blocked until the
    /// count returns to zero.
    pub fn add(&self, n: u64) {
        let mut count = self.inner.count.lock().expect("shim poisoned");
        let was_zero = *count == 0;
        *count += n;
        drop(count);

        if was_zero {
            let inner = Arc::clone(&self.inner);
            let mut init = self.init.lock().expect("shim poisoned").take();
            let mut teardown = self.teardown.lock().expect("shim poisoned").take();

            std::thread::spawn(move || {
                debug!("hold-open keeper starting");
                if let Some(init) = init.as_mut() {
                    init();
                }

                let mut count = inner.count.lock().expect("shim poisoned");
                while *count > 0 {
                    count = inner.zero.wait(count).expect("shim poisoned");
                }
                drop(count);

                if let Some(teardown) = teardown.as_mut() {
                    teardown();
                }
                debug!("hold-open keeper done");
            });
        }
    }

    /// Decrements the hold count; the keeper thread tears down and exits
    /// when it reaches zero.
    pub fn done(&self) {
        let mut count = self.inner.count.lock().expect("shim poisoned");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.zero.notify_all();
        }
    }
}
