//! Interfaces to the kernel thread scheduler.

use parking_lot::{Mutex, MutexGuard};

/// Identity of a guest thread. Opaque to the driver: the scheduler owns the
/// thread objects and hands out ids, the driver only compares and stores them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// The lock serializing every mutation of scheduler state.
///
/// Held across the reschedule sequence at slice boundaries and by service
/// call handlers that manipulate threads from other cores. Must never be
/// held while an execution engine is running guest code.
#[derive(Default)]
pub struct KernelLock(Mutex<()>);

impl KernelLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// Trait for the kernel thread scheduler, as seen by the core run loops.
///
/// [`select_thread`] and [`try_do_context_switch`] must only be called with
/// the [`KernelLock`] held.
///
/// [`select_thread`]: Scheduler::select_thread
/// [`try_do_context_switch`]: Scheduler::try_do_context_switch
pub trait Scheduler: Send + Sync {
    /// Picks the thread that should run next on the given core.
    fn select_thread(&self, core: usize);

    /// Performs the context switch chosen by [`select_thread`] on the given
    /// core, if there is one pending.
    ///
    /// [`select_thread`]: Scheduler::select_thread
    fn try_do_context_switch(&self, core: usize);

    /// The thread currently resident on the given core, if any.
    fn current_thread(&self, core: usize) -> Option<ThreadId>;
}
