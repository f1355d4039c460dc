//! Interface to the timing subsystem.

/// Trait for the timing subsystem that hands out execution budget to cores.
///
/// The driver rotates a "current context" through the cores; the timing
/// subsystem decides how many cycles each context may burn before the next
/// event is due.
pub trait CoreTiming: Send + Sync {
    /// Prepares a new pass over all cores.
    fn reset_run(&self);

    /// Makes the given core the current timing context.
    fn switch_context(&self, core: usize);

    /// Whether the current context still has cycles left this pass.
    fn can_current_context_run(&self) -> bool;

    /// Accounts for the cycles executed by the slice that just ran.
    fn advance(&self);

    /// Skips the current context ahead to the next scheduled event.
    fn idle(&self);
}
