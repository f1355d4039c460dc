//! Mock collaborators for driving the execution driver in tests.

#![allow(dead_code)]

use cinnabar::{
    NUM_CORES,
    arch::{ArchCore, ExecError, Registers},
    cpu::CpuManager,
    kernel::{Scheduler, ThreadId},
    settings::Settings,
    system::{Memory, System},
    timing::CoreTiming,
};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Observable state of a [`MockCore`].
#[derive(Default)]
pub struct CoreProbe {
    pub runs: AtomicUsize,
    pub steps: AtomicUsize,
    pub stops: AtomicUsize,
    pub icache_clears: AtomicUsize,
    pub fault: Mutex<Option<ExecError>>,
    pub regs: Mutex<Registers>,
}

impl CoreProbe {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.runs() + self.steps()
    }
}

/// An execution engine that only counts what is asked of it.
pub struct MockCore {
    pub probe: Arc<CoreProbe>,
}

impl ArchCore for MockCore {
    fn run(&mut self) -> Result<(), ExecError> {
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        match self.probe.fault.lock().take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn step(&mut self) -> Result<(), ExecError> {
        self.probe.steps.fetch_add(1, Ordering::SeqCst);
        match self.probe.fault.lock().take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn registers(&self) -> Registers {
        *self.probe.regs.lock()
    }

    fn set_registers(&mut self, regs: &Registers) {
        *self.probe.regs.lock() = *regs;
    }

    fn page_table_changed(&mut self) {}

    fn clear_instruction_cache(&mut self) {
        self.probe.icache_clears.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_exclusive_state(&mut self) {}
}

/// Timing that gives each core a fixed budget of slices per test.
pub struct MockTiming {
    pub credits: Mutex<[u32; NUM_CORES]>,
    pub current: AtomicUsize,
    pub switch_log: Mutex<Vec<usize>>,
    pub resets: AtomicUsize,
    pub advances: AtomicUsize,
    pub idles: AtomicUsize,
}

impl MockTiming {
    pub fn with_credits(credits: [u32; NUM_CORES]) -> Arc<Self> {
        Arc::new(Self {
            credits: Mutex::new(credits),
            current: AtomicUsize::new(0),
            switch_log: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            advances: AtomicUsize::new(0),
            idles: AtomicUsize::new(0),
        })
    }

    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn idles(&self) -> usize {
        self.idles.load(Ordering::SeqCst)
    }
}

impl CoreTiming for MockTiming {
    fn reset_run(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn switch_context(&self, core: usize) {
        self.current.store(core, Ordering::SeqCst);
        self.switch_log.lock().push(core);
    }

    fn can_current_context_run(&self) -> bool {
        self.credits.lock()[self.current.load(Ordering::SeqCst)] > 0
    }

    fn advance(&self) {
        self.advances.fetch_add(1, Ordering::SeqCst);
        let mut credits = self.credits.lock();
        let current = self.current.load(Ordering::SeqCst);
        credits[current] = credits[current].saturating_sub(1);
    }

    fn idle(&self) {
        self.idles.fetch_add(1, Ordering::SeqCst);
        self.credits.lock()[self.current.load(Ordering::SeqCst)] = 0;
    }
}

/// A scheduler with threads pinned per core by the test.
pub struct MockScheduler {
    pub threads: Mutex<[Option<ThreadId>; NUM_CORES]>,
    pub selects: Mutex<Vec<usize>>,
    pub switches: AtomicUsize,
}

impl MockScheduler {
    pub fn with_threads(threads: [Option<ThreadId>; NUM_CORES]) -> Arc<Self> {
        Arc::new(Self {
            threads: Mutex::new(threads),
            selects: Mutex::new(Vec::new()),
            switches: AtomicUsize::new(0),
        })
    }
}

impl Scheduler for MockScheduler {
    fn select_thread(&self, core: usize) {
        self.selects.lock().push(core);
    }

    fn try_do_context_switch(&self, _core: usize) {
        self.switches.fetch_add(1, Ordering::SeqCst);
    }

    fn current_thread(&self, core: usize) -> Option<ThreadId> {
        self.threads.lock()[core]
    }
}

/// Flat guest memory backed by a plain vector.
pub struct ArrayMemory {
    pub data: Mutex<Vec<u8>>,
}

impl ArrayMemory {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0; size]),
        })
    }
}

impl Memory for ArrayMemory {
    fn read_block(&self, addr: cinnabar::Address, buf: &mut [u8]) -> bool {
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

    fn write_block(&self, addr: cinnabar::Address, data: &[u8]) -> bool {
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

/// Everything a test needs to drive the manager and inspect its effects.
pub struct Fixture {
    pub system: System,
    pub timing: Arc<MockTiming>,
    pub scheduler: Arc<MockScheduler>,
    pub memory: Arc<ArrayMemory>,
}

pub fn fixture(
    settings: Settings,
    credits: [u32; NUM_CORES],
    threads: [Option<ThreadId>; NUM_CORES],
) -> Fixture {
    let timing = MockTiming::with_credits(credits);
    let scheduler = MockScheduler::with_threads(threads);
    let memory = ArrayMemory::new(0x10000);
    let system = System::new(settings, timing.clone(), scheduler.clone(), memory.clone());

    Fixture {
        system,
        timing,
        scheduler,
        memory,
    }
}

pub fn manager_with_probes(fixture: &Fixture) -> (CpuManager, [Arc<CoreProbe>; NUM_CORES]) {
    let probes: [Arc<CoreProbe>; NUM_CORES] =
        std::array::from_fn(|_| Arc::new(CoreProbe::default()));

    let cores = probes.clone();
    let manager = CpuManager::new(fixture.system.clone(), move |index, _| {
        Box::new(MockCore {
            probe: cores[index].clone(),
        })
    });

    (manager, probes)
}
