//! Stand-in machine components for driving the core loop from the command
//! line: flat memory, slice-based timing, a pinned scheduler and a trivial
//! fetch-execute engine.

use cinnabar::{
    NUM_CORES,
    arch::{ArchCore, ExecError, Registers},
    gdb::{GdbServer, SIGTRAP, breakpoints::BreakpointType},
    kernel::{Scheduler, ThreadId},
    system::Memory,
    timing::CoreTiming,
};
use common::Address;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, trace};

/// The only instruction the demo guest knows.
const NOP: u32 = 0xD503_201F;

/// How many instructions a tight slice may execute.
const INSTRUCTIONS_PER_SLICE: u32 = 4096;

/// Flat guest memory backed by a plain vector.
pub struct FlatMemory {
    data: Mutex<Vec<u8>>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0; size]),
        })
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Fills the whole address space with no-ops so every core has
    /// something to chew on.
    pub fn fill_code(&self) {
        let mut data = self.data.lock();
        for word in data.chunks_exact_mut(4) {
            word.copy_from_slice(&NOP.to_le_bytes());
        }
    }
}

impl Memory for FlatMemory {
    fn read_block(&self, addr: Address, buf: &mut [u8]) -> bool {
        let data = self.data.lock();
        let Some(end) = (addr.value() as usize).checked_add(buf.len()) else {
            return false;
        };

        match data.get(addr.value() as usize..end) {
            Some(block) => {
                buf.copy_from_slice(block);
                true
            }
            None => false,
        }
    }

    fn write_block(&self, addr: Address, data: &[u8]) -> bool {
        let mut mem = self.data.lock();
        let Some(end) = (addr.value() as usize).checked_add(data.len()) else {
            return false;
        };

        match mem.get_mut(addr.value() as usize..end) {
            Some(block) => {
                block.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// Timing that hands every core one slice per pass.
pub struct SliceTiming {
    credits: Mutex<[u32; NUM_CORES]>,
    current: AtomicUsize,
}

impl SliceTiming {
    pub fn new() -> Self {
        Self {
            credits: Mutex::new([0; NUM_CORES]),
            current: AtomicUsize::new(0),
        }
    }
}

impl CoreTiming for SliceTiming {
    fn reset_run(&self) {
        *self.credits.lock() = [1; NUM_CORES];
    }

    fn switch_context(&self, core: usize) {
        self.current.store(core, Ordering::SeqCst);
    }

    fn can_current_context_run(&self) -> bool {
        self.credits.lock()[self.current.load(Ordering::SeqCst)] > 0
    }

    fn advance(&self) {
        let mut credits = self.credits.lock();
        let current = self.current.load(Ordering::SeqCst);
        credits[current] = credits[current].saturating_sub(1);
    }

    fn idle(&self) {
        self.credits.lock()[self.current.load(Ordering::SeqCst)] = 0;
    }
}

/// A scheduler with one thread pinned to each of the first `runnable` cores.
pub struct PinnedScheduler {
    threads: [Option<ThreadId>; NUM_CORES],
}

impl PinnedScheduler {
    pub fn new(runnable: usize) -> Self {
        let threads =
            std::array::from_fn(|core| (core < runnable).then(|| ThreadId(0x100 + core as u64)));

        Self { threads }
    }

    pub fn thread_for(&self, core: usize) -> Option<ThreadId> {
        self.threads[core]
    }
}

impl Scheduler for PinnedScheduler {
    fn select_thread(&self, core: usize) {
        trace!(core, "selecting thread");
    }

    fn try_do_context_switch(&self, _core: usize) {
        // threads never migrate, there is nothing to switch
    }

    fn current_thread(&self, core: usize) -> Option<ThreadId> {
        self.threads[core]
    }
}

/// A minimal execution engine: fetches words from flat memory and treats
/// everything except zero as a no-op. The zero word faults, which is what a
/// debugger poking a cleared range will hit.
pub struct FetchCore {
    core_index: usize,
    thread: Option<ThreadId>,
    regs: Registers,
    memory: Arc<FlatMemory>,
    gdb: Arc<GdbServer>,
    stop: bool,
}

impl FetchCore {
    pub fn new(
        core_index: usize,
        thread: Option<ThreadId>,
        memory: Arc<FlatMemory>,
        gdb: Arc<GdbServer>,
    ) -> Self {
        Self {
            core_index,
            thread,
            regs: Registers::default(),
            memory,
            gdb,
            stop: false,
        }
    }

    fn fetch(&self) -> Result<u32, ExecError> {
        let mut word = [0; 4];
        if !self.memory.read_block(Address(self.regs.pc), &mut word) {
            return Err(ExecError::MemoryFault {
                addr: Address(self.regs.pc),
            });
        }

        Ok(u32::from_le_bytes(word))
    }

    fn exec_one(&mut self) -> Result<(), ExecError> {
        let word = self.fetch()?;
        if word == 0 {
            return Err(ExecError::IllegalInstruction {
                addr: Address(self.regs.pc),
            });
        }

        self.regs.pc = self.regs.pc.wrapping_add(4) % self.memory.len() as u64;
        Ok(())
    }
}

impl ArchCore for FetchCore {
    fn run(&mut self) -> Result<(), ExecError> {
        self.stop = false;

        for _ in 0..INSTRUCTIONS_PER_SLICE {
            if self.stop {
                break;
            }

            self.exec_one()?;

            if self
                .gdb
                .check_breakpoint(Address(self.regs.pc), BreakpointType::Execute)
            {
                debug!(core = self.core_index, pc = self.regs.pc, "hit breakpoint");
                self.gdb.break_execution(false);
                if let Some(thread) = self.thread {
                    self.gdb.send_trap(thread, SIGTRAP);
                }

                break;
            }
        }

        Ok(())
    }

    fn step(&mut self) -> Result<(), ExecError> {
        self.exec_one()
    }

    fn stop(&mut self) {
        self.stop = true;
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn set_registers(&mut self, regs: &Registers) {
        self.regs = *regs;
    }

    fn page_table_changed(&mut self) {
        trace!(core = self.core_index, "page table changed");
    }

    fn clear_instruction_cache(&mut self) {
        trace!(core = self.core_index, "instruction cache cleared");
    }

    fn clear_exclusive_state(&mut self) {}
}
