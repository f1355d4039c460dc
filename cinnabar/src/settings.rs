//! Runtime configuration of the execution driver.

use serde::{Deserialize, Serialize};

/// Settings controlling core scheduling and the debug server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether cores 1-3 each get their own host thread. When disabled, a
    /// single host thread rotates through all cores cooperatively.
    pub use_multi_core: bool,
    /// Whether the debug server is enabled at startup.
    pub gdbstub_enabled: bool,
    /// TCP port the debug server listens on.
    pub gdbstub_port: u16,
    /// Upper bound on run-loop passes while a debugger is connected, so that
    /// a runnable guest cannot starve the packet pump.
    pub gdbstub_loops: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_multi_core: true,
            gdbstub_enabled: false,
            gdbstub_port: 24689,
            gdbstub_loops: 10_000,
        }
    }
}
