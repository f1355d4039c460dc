mod emu;

use anyhow::Result;
use cinnabar::{Address, CpuManager, NUM_CORES, Settings, System};
use clap::Parser;
use emu::{FetchCore, FlatMemory, PinnedScheduler, SliceTiming};
use std::sync::Arc;
use tracing::info;

/// Cinnabar: console emulator execution driver
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArgs {
    /// Whether cores 1-3 get their own host threads
    #[arg(short, long, default_value_t = false)]
    multi_core: bool,
    /// Whether to start the debug server
    #[arg(short, long, default_value_t = false)]
    gdb: bool,
    /// Port the debug server listens on
    #[arg(long, default_value_t = 24689)]
    port: u16,
    /// Bound on run-loop passes while a debugger is connected
    #[arg(long, default_value_t = 10_000)]
    gdb_loops: u32,
    /// How many cores start with a runnable thread
    #[arg(long, default_value_t = NUM_CORES)]
    runnable: usize,
    /// How many run-loop passes to drive before shutting down (0 = forever)
    #[arg(short, long, default_value_t = 0)]
    passes: u64,
}

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("cli=info,cinnabar=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    setup_tracing();

    anyhow::ensure!(
        args.runnable <= NUM_CORES,
        "at most {NUM_CORES} cores can have a runnable thread"
    );

    let settings = Settings {
        use_multi_core: args.multi_core,
        gdbstub_enabled: args.gdb,
        gdbstub_port: args.port,
        gdbstub_loops: args.gdb_loops,
    };

    let memory = FlatMemory::new(0x10000);
    memory.fill_code();

    let scheduler = Arc::new(PinnedScheduler::new(args.runnable));
    let system = System::new(
        settings,
        Arc::new(SliceTiming::new()),
        scheduler.clone(),
        memory.clone(),
    );

    if args.gdb {
        // the socket comes up on the first packet pump, not here
        system.gdb.defer_start();
        system
            .gdb
            .register_module("main", Address(0), Address(memory.len() as u64), true);
    }

    let mut manager = CpuManager::new(system.clone(), {
        let memory = memory.clone();
        let gdb = system.gdb.clone();
        let scheduler = scheduler.clone();

        move |index, _monitor| {
            Box::new(FetchCore::new(
                index,
                scheduler.thread_for(index),
                memory.clone(),
                gdb.clone(),
            ))
        }
    });

    manager.start_threads();
    info!(
        multi_core = args.multi_core,
        runnable = args.runnable,
        "execution started"
    );

    let mut pass = 0u64;
    while system.is_powered_on() && (args.passes == 0 || pass < args.passes) {
        manager.run_loop(true);
        pass += 1;
    }

    info!(passes = pass, "shutting down");
    manager.shutdown();
    system.gdb.shutdown(0);

    Ok(())
}
