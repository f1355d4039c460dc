//! Multi-core execution driver of the cinnabar console emulator.
//!
//! The driver owns the four virtual CPU cores and runs each of them through
//! an architecture-specific execution engine, cooperating with the kernel
//! thread scheduler, the timing subsystem and a remote debug server that can
//! halt, step and inspect the cores.

pub mod arch;
pub mod cpu;
pub mod gdb;
pub mod kernel;
pub mod settings;
pub mod system;
pub mod timing;

pub use common::Address;
pub use cpu::{CpuManager, NUM_CORES};
pub use settings::Settings;
pub use system::System;
