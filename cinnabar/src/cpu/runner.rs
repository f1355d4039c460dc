//! The per-core run loop.

use crate::{arch::ArchCore, gdb::SIGTRAP, system::System};
use tracing::{error, trace};

/// Drives one virtual core through its execution engine, one scheduling
/// slice at a time.
///
/// Exactly one host thread drives a given runner at any time: its own
/// worker thread in multi-core mode, the manager's thread otherwise.
pub struct CoreRunner {
    core_index: usize,
    arch: Box<dyn ArchCore>,
    system: System,
}

impl CoreRunner {
    pub(crate) fn new(core_index: usize, arch: Box<dyn ArchCore>, system: System) -> Self {
        Self {
            core_index,
            arch,
            system,
        }
    }

    pub fn core_index(&self) -> usize {
        self.core_index
    }

    /// The execution engine behind this core.
    pub fn arch(&mut self) -> &mut dyn ArchCore {
        &mut *self.arch
    }

    /// Executes one scheduling slice on this core.
    pub fn run_loop(&mut self, mut tight_loop: bool) {
        self.reschedule();

        match self.system.scheduler.current_thread(self.core_index) {
            // no runnable thread: skip ahead to the next event and try to
            // yield to whatever it wakes up
            None => {
                trace!(core = self.core_index, "core idling");
                self.system.timing.idle();
                self.prepare_reschedule();
            }
            // a debugger break halts every core while keeping the server
            // responsive. Idle cycles must not be advanced here: the guest
            // would see its timers fire while it is supposedly frozen.
            Some(_) if self.system.gdb.cpu_halt_flag() => {
                self.reschedule();
                return;
            }
            Some(thread) => {
                let mut stepped = None;
                if self.system.gdb.thread_step_flag(thread) {
                    self.system.gdb.break_execution(false);
                    tight_loop = false;
                    stepped = Some(thread);
                }

                let result = if tight_loop {
                    self.arch.run()
                } else {
                    self.arch.step()
                };

                match result {
                    Ok(()) => {
                        if let Some(thread) = stepped {
                            self.system.gdb.send_trap(thread, SIGTRAP);
                        }
                    }
                    Err(fault) => {
                        error!(core = self.core_index, "execution fault: {fault}");
                        self.system.gdb.break_execution(false);
                        self.system.gdb.send_trap(thread, fault.signal());
                    }
                }
            }
        }

        self.system.timing.advance();
        self.reschedule();
    }

    /// Executes exactly one instruction on this core.
    pub fn single_step(&mut self) {
        self.run_loop(false)
    }

    /// Requests that the engine exit its inner loop at the next safe point.
    pub fn prepare_reschedule(&mut self) {
        self.arch.stop();
    }

    /// Runs the scheduler for this core at a slice boundary.
    fn reschedule(&mut self) {
        // scheduler state may be manipulated by service calls running on
        // other cores; the kernel lock serializes all of it
        let _guard = self.system.kernel_lock.lock();

        self.system.scheduler.select_thread(self.core_index);
        self.system.scheduler.try_do_context_switch(self.core_index);
    }

    /// Winds down the execution engine at the end of a session. The engine
    /// must not be entered again afterwards.
    pub fn shutdown(&mut self) {
        self.arch.stop();
        self.arch.clear_exclusive_state();
    }
}
