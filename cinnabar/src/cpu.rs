//! The multi-core execution driver.

pub mod barrier;
pub mod runner;

use crate::{
    arch::{ArchCore, Registers, exclusive::ExclusiveMonitor},
    gdb::target::Target,
    kernel::ThreadId,
    system::System,
};
use barrier::Barrier;
use common::Address;
use parking_lot::{FairMutex, RwLock};
use runner::CoreRunner;
use rustc_hash::FxHashMap;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info};

/// Number of virtual CPU cores.
pub const NUM_CORES: usize = 4;

/// A core runner shared between the manager and the worker thread that
/// drives it.
pub type SharedRunner = Arc<FairMutex<CoreRunner>>;

/// Owns the four core runners and the machinery shared between them: the
/// exclusive monitor, the shutdown latch and the mapping from host threads
/// to the runner they drive.
pub struct CpuManager {
    cores: [SharedRunner; NUM_CORES],
    monitor: Arc<ExclusiveMonitor>,
    barrier: Arc<Barrier>,

    thread_to_core: Arc<RwLock<FxHashMap<thread::ThreadId, usize>>>,
    core_threads: Vec<JoinHandle<()>>,

    /// Which core the manager thread is currently driving. Only meaningful
    /// in single-core mode; written by the manager thread alone.
    active_core: AtomicUsize,

    system: System,
}

impl CpuManager {
    /// Builds the runners, handing each core its execution engine through
    /// `make_core`.
    pub fn new(
        system: System,
        mut make_core: impl FnMut(usize, &Arc<ExclusiveMonitor>) -> Box<dyn ArchCore>,
    ) -> Self {
        let monitor = Arc::new(ExclusiveMonitor::new());
        let cores = std::array::from_fn(|index| {
            let arch = make_core(index, &monitor);
            Arc::new(FairMutex::new(CoreRunner::new(index, arch, system.clone())))
        });

        Self {
            cores,
            monitor,
            barrier: Arc::new(Barrier::new()),
            thread_to_core: Arc::new(RwLock::new(FxHashMap::default())),
            core_threads: Vec::new(),
            active_core: AtomicUsize::new(0),
            system,
        }
    }

    pub fn core(&self, index: usize) -> &SharedRunner {
        &self.cores[index]
    }

    pub fn exclusive_monitor(&self) -> &Arc<ExclusiveMonitor> {
        &self.monitor
    }

    /// The host threads currently bound to a core, and which core each one
    /// drives.
    pub fn thread_bindings(&self) -> Vec<(thread::ThreadId, usize)> {
        self.thread_to_core
            .read()
            .iter()
            .map(|(&thread, &core)| (thread, core))
            .collect()
    }

    /// Binds the calling thread to core 0 and, in multi-core mode, spawns a
    /// worker thread for each of the remaining cores.
    pub fn start_threads(&mut self) {
        self.thread_to_core
            .write()
            .insert(thread::current().id(), 0);

        if !self.system.settings.use_multi_core {
            return;
        }

        for index in 1..NUM_CORES {
            let runner = self.cores[index].clone();
            let system = self.system.clone();
            let barrier = self.barrier.clone();
            let bindings = self.thread_to_core.clone();

            let handle = thread::Builder::new()
                .name(format!("cinnabar-core-{index}"))
                .spawn(move || {
                    bindings.write().insert(thread::current().id(), index);
                    run_core(system, runner, barrier);
                })
                .expect("failed to spawn core thread");

            self.core_threads.push(handle);
        }

        info!(cores = NUM_CORES, "core threads started");
    }

    /// Powers the session off and tears the driver down: ends the latch,
    /// joins the workers and clears the thread bindings.
    pub fn shutdown(&mut self) {
        self.system.set_powered_on(false);
        self.barrier.notify_end();

        for handle in self.core_threads.drain(..) {
            if handle.join().is_err() {
                error!("core thread panicked during shutdown");
            }
        }

        self.thread_to_core.write().clear();
        for core in &self.cores {
            core.lock().shutdown();
        }

        debug!("cpu manager shut down");
    }

    /// The runner driven by the calling thread.
    ///
    /// In multi-core mode the calling thread must be one that
    /// [`start_threads`] bound to a core; anything else is a bug in the
    /// caller.
    ///
    /// [`start_threads`]: CpuManager::start_threads
    pub fn current_core_runner(&self) -> SharedRunner {
        if self.system.settings.use_multi_core {
            let bindings = self.thread_to_core.read();
            let index = bindings
                .get(&thread::current().id())
                .copied()
                .expect("host thread is not bound to a core runner");

            self.cores[index].clone()
        } else {
            self.cores[self.active_core.load(Ordering::Relaxed)].clone()
        }
    }

    /// Drives execution from the manager thread.
    ///
    /// In single-core mode this rotates through all cores cooperatively
    /// until the timing subsystem runs out of work for every context, or
    /// until the pass bound is hit while a debugger is connected. In
    /// multi-core mode the worker threads drive cores 1-3 and this drives
    /// core 0 only.
    pub fn run_loop(&mut self, tight_loop: bool) {
        // core 0 may be driven by a different host thread each session
        self.thread_to_core
            .write()
            .insert(thread::current().id(), 0);

        if self.system.gdb.is_server_enabled() {
            let gdb = self.system.gdb.clone();
            gdb.handle_packet(self);
        }

        if self.system.settings.use_multi_core {
            self.cores[0].lock().run_loop(tight_loop);
            return;
        }

        let timing = self.system.timing.clone();
        timing.reset_run();

        let max_loops = self.system.settings.gdbstub_loops;
        let mut num_loops = 0;
        loop {
            let mut keep_running = false;
            for index in 0..NUM_CORES {
                self.active_core.store(index, Ordering::Relaxed);
                timing.switch_context(index);

                if timing.can_current_context_run() {
                    self.cores[index].lock().run_loop(tight_loop);
                }

                keep_running |= timing.can_current_context_run();
            }

            if self.system.gdb.is_connected() {
                num_loops += 1;
            }

            if !keep_running || num_loops >= max_loops {
                break;
            }
        }
    }

    /// Drops cached guest-code translations on every core. Required after
    /// anything other than the guest itself writes to guest memory.
    pub fn invalidate_all_instruction_caches(&self) {
        for core in &self.cores {
            core.lock().arch().clear_instruction_cache();
        }
    }

    fn core_of(&self, thread: ThreadId) -> Option<usize> {
        (0..NUM_CORES).find(|&core| self.system.scheduler.current_thread(core) == Some(thread))
    }
}

impl Target for CpuManager {
    fn active_threads(&mut self) -> Vec<ThreadId> {
        (0..NUM_CORES)
            .filter_map(|core| self.system.scheduler.current_thread(core))
            .collect()
    }

    fn read_registers(&mut self, thread: ThreadId) -> Option<Registers> {
        let core = self.core_of(thread)?;
        let mut runner = self.cores[core].lock();
        Some(runner.arch().registers())
    }

    fn write_registers(&mut self, thread: ThreadId, regs: &Registers) -> bool {
        let Some(core) = self.core_of(thread) else {
            return false;
        };

        let mut runner = self.cores[core].lock();
        runner.arch().set_registers(regs);
        true
    }

    fn read_memory(&mut self, addr: Address, buf: &mut [u8]) -> bool {
        self.system.memory.read_block(addr, buf)
    }

    fn write_memory(&mut self, addr: Address, data: &[u8]) -> bool {
        if !self.system.memory.write_block(addr, data) {
            return false;
        }

        self.invalidate_all_instruction_caches();
        true
    }
}

fn run_core(system: System, runner: SharedRunner, barrier: Arc<Barrier>) {
    while system.is_powered_on() {
        runner.lock().run_loop(true);
    }

    // hold the slice boundary until the manager tears the session down
    barrier.wait();
}
