//! End-to-end debug server tests over a real TCP connection.

mod support;

use cinnabar::{Address, Settings, cpu::CpuManager, gdb::GdbServer, kernel::ThreadId};
use support::{Fixture, fixture, manager_with_probes};
use std::{
    io::{Read, Write},
    net::TcpStream,
    time::{Duration, Instant},
};

fn checksum(data: &str) -> String {
    let sum = data
        .as_bytes()
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    format!("{sum:02x}")
}

fn send_packet(client: &mut TcpStream, payload: &str) {
    let packet = format!("${}#{}", payload, checksum(payload));
    client.write_all(packet.as_bytes()).unwrap();
    client.flush().unwrap();
}

/// Pumps the server and reads until a complete `$...#ck` frame arrives,
/// returning its payload. Acks are skipped.
fn read_reply(gdb: &GdbServer, target: &mut CpuManager, client: &mut TcpStream) -> String {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut response = String::new();
    let mut buf = [0u8; 2048];

    loop {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for a reply, got {response:?}"
        );

        gdb.handle_packet(target);

        match client.read(&mut buf) {
            Ok(0) => panic!("server closed the connection, got {response:?}"),
            Ok(read) => response.push_str(&String::from_utf8_lossy(&buf[..read])),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => panic!("client read failed: {err}"),
        }

        if let Some(start) = response.find('$')
            && let Some(hash) = response[start..].find('#')
            && response.len() >= start + hash + 3
        {
            return response[start + 1..start + hash].to_owned();
        }
    }
}

fn transact(
    gdb: &GdbServer,
    target: &mut CpuManager,
    client: &mut TcpStream,
    payload: &str,
) -> String {
    send_packet(client, payload);
    read_reply(gdb, target, client)
}

/// Spins the pump until `cond` holds, or fails the test.
fn pump_until(gdb: &GdbServer, target: &mut CpuManager, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition never became true");
        gdb.handle_packet(target);
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn debug_fixture(threads: [Option<ThreadId>; 4]) -> Fixture {
    let settings = Settings {
        use_multi_core: false,
        gdbstub_enabled: true,
        gdbstub_port: 0,
        ..Settings::default()
    };

    fixture(settings, [1; 4], threads)
}

fn connect(fix: &Fixture, manager: &mut CpuManager) -> TcpStream {
    fix.system.gdb.init();
    let addr = fix.system.gdb.local_addr().unwrap();

    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(10)))
        .unwrap();

    let gdb = fix.system.gdb.clone();
    pump_until(&gdb, manager, || gdb.is_connected());
    client
}

#[test]
fn protocol_session() {
    let fix = debug_fixture([Some(ThreadId(0x100)), Some(ThreadId(0x101)), None, None]);
    let (mut manager, probes) = manager_with_probes(&fix);
    let gdb = fix.system.gdb.clone();

    let mut client = connect(&fix, &mut manager);

    // a fresh session begins halted
    assert!(gdb.cpu_halt_flag());

    let reply = transact(&gdb, &mut manager, &mut client, "qSupported");
    assert!(reply.contains("PacketSize="), "got {reply:?}");
    assert!(reply.contains("qXfer:libraries:read+"), "got {reply:?}");

    let reply = transact(&gdb, &mut manager, &mut client, "?");
    assert_eq!(reply, "T05thread:100;");

    let reply = transact(&gdb, &mut manager, &mut client, "qfThreadInfo");
    assert_eq!(reply, "m100,101");

    // breakpoint round trip, including the duplicate error path
    assert_eq!(transact(&gdb, &mut manager, &mut client, "Z0,4000,4"), "OK");
    assert_eq!(transact(&gdb, &mut manager, &mut client, "Z0,4000,4"), "E01");
    assert!(gdb.check_breakpoint(
        Address(0x4000),
        cinnabar::gdb::breakpoints::BreakpointType::Execute
    ));
    assert_eq!(transact(&gdb, &mut manager, &mut client, "z0,4000,4"), "OK");
    assert_eq!(transact(&gdb, &mut manager, &mut client, "z0,4000,4"), "E01");

    // memory write-then-read through the target
    assert_eq!(
        transact(&gdb, &mut manager, &mut client, "M3000,4:deadbeef"),
        "OK"
    );
    assert_eq!(transact(&gdb, &mut manager, &mut client, "m3000,4"), "deadbeef");
    // writes to guest code require dropping cached translations everywhere
    assert!(probes.iter().all(|p| p.icache_clears.load(std::sync::atomic::Ordering::SeqCst) > 0));

    // registers of the current thread
    probes[0].regs.lock().x[0] = 0x1122_3344_5566_7788;
    let reply = transact(&gdb, &mut manager, &mut client, "g");
    assert_eq!(reply.len(), 33 * 16 + 8);
    assert!(reply.starts_with("8877665544332211"), "got {reply:?}");

    let reply = transact(&gdb, &mut manager, &mut client, "p0");
    assert_eq!(reply, "8877665544332211");

    assert_eq!(
        transact(&gdb, &mut manager, &mut client, "P1=0f00000000000000"),
        "OK"
    );
    assert_eq!(probes[0].regs.lock().x[1], 0xf);

    assert_eq!(
        transact(&gdb, &mut manager, &mut client, "vCont?"),
        "vCont;c;C;s;S"
    );

    // continue consumes the stop: the halt flag drops
    send_packet(&mut client, "c");
    pump_until(&gdb, &mut manager, || !gdb.cpu_halt_flag());

    // Ctrl-C halts again and reports SIGINT
    client.write_all(&[0x03]).unwrap();
    client.flush().unwrap();
    let reply = read_reply(&gdb, &mut manager, &mut client);
    assert_eq!(reply, "T02thread:100;");
    assert!(gdb.cpu_halt_flag());

    // detaching resumes the guest and drops the connection
    send_packet(&mut client, "D");
    pump_until(&gdb, &mut manager, || !gdb.is_connected());
    assert!(!gdb.cpu_halt_flag());
}

#[test]
fn single_step_delivers_a_trap() {
    let step_thread = ThreadId(0x333);
    let fix = debug_fixture([Some(ThreadId(0x100)), None, Some(step_thread), None]);
    let (mut manager, probes) = manager_with_probes(&fix);
    let gdb = fix.system.gdb.clone();

    let mut client = connect(&fix, &mut manager);
    assert!(gdb.cpu_halt_flag());

    // ask for a single step of the thread on core 2
    send_packet(&mut client, "vCont;s:333");
    pump_until(&gdb, &mut manager, || gdb.thread_step_flag(step_thread));
    assert!(!gdb.cpu_halt_flag());

    manager.core(2).lock().run_loop(true);

    // exactly one instruction ran, the system is halted again and the stop
    // was reported against the stepped thread
    assert_eq!(probes[2].steps(), 1);
    assert_eq!(probes[2].runs(), 0);
    assert!(gdb.cpu_halt_flag());

    let reply = read_reply(&gdb, &mut manager, &mut client);
    assert_eq!(reply, "T05thread:333;");
}

#[test]
fn memory_break_reads_and_clears() {
    let fix = debug_fixture([None; 4]);
    let gdb = fix.system.gdb.clone();

    gdb.break_execution(true);
    assert!(gdb.cpu_halt_flag());
    assert!(gdb.is_memory_break());
    assert!(!gdb.is_memory_break());
}

#[test]
fn socket_setup_failure_disables_the_server() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let gdb = GdbServer::new();
    gdb.set_server_port(port);
    gdb.toggle_server(true);
    gdb.init();

    assert!(!gdb.is_server_enabled());
    assert!(gdb.local_addr().is_none());
}

#[test]
fn modules_show_up_in_the_library_list() {
    let fix = debug_fixture([Some(ThreadId(0x100)), None, None, None]);
    let (mut manager, _probes) = manager_with_probes(&fix);
    let gdb = fix.system.gdb.clone();

    gdb.register_module("main", Address(0x8000_0000), Address(0x8010_0000), true);
    gdb.register_module("sdk.elf", Address(0x9000_0000), Address(0x9001_0000), true);

    let mut client = connect(&fix, &mut manager);
    let reply = transact(
        &gdb,
        &mut manager,
        &mut client,
        "qXfer:libraries:read::0,1000",
    );

    assert!(reply.starts_with('l'), "got {reply:?}");
    assert!(reply.contains("main.elf"), "got {reply:?}");
    assert!(reply.contains("sdk.elf"), "got {reply:?}");
    assert!(reply.contains("0x80000000"), "got {reply:?}");
}
