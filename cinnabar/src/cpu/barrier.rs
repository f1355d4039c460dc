//! Shutdown latch for the core worker threads.

use parking_lot::{Condvar, Mutex};

/// A one-way latch coordinating core threads at the end of a session.
///
/// Starts closed; [`notify_end`] opens it permanently. Worker threads park
/// on [`wait`] once their outer loop exits so that teardown happens only
/// after every core has reached a slice boundary.
///
/// [`notify_end`]: Barrier::notify_end
/// [`wait`]: Barrier::wait
#[derive(Default)]
pub struct Barrier {
    ending: Mutex<bool>,
    condvar: Condvar,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the session as ending and wakes every waiter. Idempotent.
    pub fn notify_end(&self) {
        let mut ending = self.ending.lock();
        *ending = true;
        self.condvar.notify_all();
    }

    /// Blocks until [`notify_end`] has been called. Returns immediately if
    /// the session has already ended.
    ///
    /// [`notify_end`]: Barrier::notify_end
    pub fn wait(&self) {
        let mut ending = self.ending.lock();
        while !*ending {
            self.condvar.wait(&mut ending);
        }
    }

    pub fn is_ending(&self) -> bool {
        *self.ending.lock()
    }
}
