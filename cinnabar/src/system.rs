//! State shared by the driver and the external collaborators.

use crate::{
    gdb::GdbServer,
    kernel::{KernelLock, Scheduler},
    settings::Settings,
    timing::CoreTiming,
};
use common::Address;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Guest memory access, as needed by the debugger.
///
/// The memory subsystem behind this also consults the breakpoint table on
/// its emulated access paths; the driver itself only moves raw blocks.
pub trait Memory: Send + Sync {
    /// Reads `buf.len()` bytes at `addr`. Returns `false` if any part of
    /// the range is unmapped.
    fn read_block(&self, addr: Address, buf: &mut [u8]) -> bool;

    /// Writes `data` at `addr`. Returns `false` if any part of the range is
    /// unmapped.
    fn write_block(&self, addr: Address, data: &[u8]) -> bool;
}

/// Handle to the state every component shares: configuration, power state,
/// the collaborator interfaces and the debug server. Clones refer to the
/// same underlying state.
#[derive(Clone)]
pub struct System {
    pub settings: Settings,
    pub timing: Arc<dyn CoreTiming>,
    pub scheduler: Arc<dyn Scheduler>,
    pub memory: Arc<dyn Memory>,
    pub gdb: Arc<GdbServer>,
    pub kernel_lock: Arc<KernelLock>,
    powered_on: Arc<AtomicBool>,
}

impl System {
    pub fn new(
        settings: Settings,
        timing: Arc<dyn CoreTiming>,
        scheduler: Arc<dyn Scheduler>,
        memory: Arc<dyn Memory>,
    ) -> Self {
        let gdb = Arc::new(GdbServer::new());
        gdb.set_server_port(settings.gdbstub_port);
        gdb.toggle_server(settings.gdbstub_enabled);

        Self {
            settings,
            timing,
            scheduler,
            memory,
            gdb,
            kernel_lock: Arc::new(KernelLock::new()),
            powered_on: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the session is still live. Core worker threads exit their
    /// outer loop at the first slice boundary where this reads `false`.
    pub fn is_powered_on(&self) -> bool {
        self.powered_on.load(Ordering::Acquire)
    }

    pub fn set_powered_on(&self, on: bool) {
        self.powered_on.store(on, Ordering::Release);
    }
}
