//! Remote debug server speaking the GDB remote serial protocol over TCP.
//!
//! The server is process-wide state with an explicit lifecycle: the system
//! creates it, the driver pumps [`handle_packet`] from the thread that owns
//! the run loop, and the core run loops consult [`cpu_halt_flag`] and
//! [`thread_step_flag`] before every execution slice.
//!
//! [`handle_packet`]: GdbServer::handle_packet
//! [`cpu_halt_flag`]: GdbServer::cpu_halt_flag
//! [`thread_step_flag`]: GdbServer::thread_step_flag

pub mod breakpoints;
pub mod packet;
pub mod target;

use crate::{arch::Registers, kernel::ThreadId};
use breakpoints::{Breakpoint, BreakpointTable, BreakpointType};
use common::Address;
use easyerr::{Error, ResultExt};
use packet::{Decoder, Event};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering},
};
use target::Target;
use tracing::{debug, error, info, warn};

pub const SIGINT: u8 = 2;
pub const SIGILL: u8 = 4;
pub const SIGTRAP: u8 = 5;
pub const SIGSEGV: u8 = 11;

/// How much guest memory a single `m` packet may ask for.
const MAX_MEMORY_READ: u64 = 0x1000;

#[derive(Debug, Error)]
enum InitError {
    #[error("failed to open the listening socket")]
    Bind { source: io::Error },
}

/// A module advertised to the debugger through the library list.
#[derive(Debug, Clone)]
struct Module {
    name: String,
    beg: Address,
    end: Address,
}

struct Connection {
    stream: TcpStream,
    decoder: Decoder,
    peer: SocketAddr,
}

/// The debug server.
///
/// All methods take `&self`: flags are atomics read by the core run loops on
/// every slice, and the heavier state sits behind its own lock so that
/// packet handling on the driver thread never blocks a core for long.
pub struct GdbServer {
    enabled: AtomicBool,
    deferred: AtomicBool,
    port: AtomicU16,

    listener: Mutex<Option<TcpListener>>,
    connection: Mutex<Option<Connection>>,

    halt: AtomicBool,
    memory_break: AtomicBool,
    last_signal: AtomicU8,
    steps: Mutex<FxHashSet<ThreadId>>,
    selected: Mutex<Option<ThreadId>>,

    breakpoints: RwLock<BreakpointTable>,
    modules: Mutex<Vec<Module>>,
}

enum Dispatch {
    Reply(Vec<u8>),
    Silent,
    Disconnect(Option<Vec<u8>>),
}

impl Default for GdbServer {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbServer {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            port: AtomicU16::new(0),
            listener: Mutex::new(None),
            connection: Mutex::new(None),
            halt: AtomicBool::new(false),
            memory_break: AtomicBool::new(false),
            last_signal: AtomicU8::new(SIGTRAP),
            steps: Mutex::new(FxHashSet::default()),
            selected: Mutex::new(None),
            breakpoints: RwLock::new(BreakpointTable::default()),
            modules: Mutex::new(Vec::new()),
        }
    }

    /// Sets the port to listen for connections on.
    pub fn set_server_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    /// Enables or disables the server.
    pub fn toggle_server(&self, status: bool) {
        self.enabled.store(status, Ordering::SeqCst);
    }

    pub fn is_server_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Opens the listening socket. On failure the error is logged and the
    /// server is left disabled; the emulator keeps running without it.
    pub fn init(&self) {
        if let Err(err) = self.try_init() {
            error!(
                port = self.port.load(Ordering::SeqCst),
                "debug server failed to start: {err}"
            );
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    fn try_init(&self) -> Result<(), InitError> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Ok(());
        }

        let port = self.port.load(Ordering::SeqCst);
        let socket = TcpListener::bind(("127.0.0.1", port)).context(InitCtx::Bind)?;
        socket.set_nonblocking(true).context(InitCtx::Bind)?;

        if let Ok(addr) = socket.local_addr() {
            info!("debug server listening on {addr}");
        }

        *listener = Some(socket);
        Ok(())
    }

    /// Defers opening the listening socket to the first [`handle_packet`]
    /// call, so that startup never blocks on a host thread that is not yet
    /// pumping packets.
    ///
    /// [`handle_packet`]: GdbServer::handle_packet
    pub fn defer_start(&self) {
        self.deferred.store(true, Ordering::SeqCst);
    }

    /// The address the server is listening on, once [`init`] succeeded.
    ///
    /// [`init`]: GdbServer::init
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref()?.local_addr().ok()
    }

    /// Closes the connection and the listening socket and frees all
    /// debugger state. `status` is reported to the debugger as the exit
    /// status of the session.
    pub fn shutdown(&self, status: i32) {
        {
            let mut connection = self.connection.lock();
            if let Some(conn) = connection.as_mut() {
                let reply = format!("W{:02x}", status as u8);
                _ = send(&mut conn.stream, &packet::frame(reply.as_bytes()));
                info!(
                    "debug server shutting down, closing connection to {}",
                    conn.peer
                );
            }
            *connection = None;
        }
        *self.listener.lock() = None;

        self.breakpoints.write().clear();
        self.steps.lock().clear();
        self.modules.lock().clear();
        *self.selected.lock() = None;
        self.halt.store(false, Ordering::SeqCst);
        self.memory_break.store(false, Ordering::SeqCst);
        self.deferred.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Advertises a loaded module's address range to the debugger.
    pub fn register_module(&self, name: &str, beg: Address, end: Address, add_elf_ext: bool) {
        let mut name = name.to_owned();
        if add_elf_ext && !name.ends_with(".elf") {
            name.push_str(".elf");
        }

        debug!("registered module {name} at {beg}..{end}");
        self.modules.lock().push(Module { name, beg, end });
    }

    /// Halts every core at its next slice boundary.
    pub fn break_execution(&self, is_memory_break: bool) {
        if is_memory_break {
            self.memory_break.store(true, Ordering::SeqCst);
        }

        self.halt.store(true, Ordering::SeqCst);
    }

    /// Whether the latest break came from a memory breakpoint. Reading
    /// clears the flag.
    pub fn is_memory_break(&self) -> bool {
        self.memory_break.swap(false, Ordering::SeqCst)
    }

    /// Whether every core shall skip execution at its next slice.
    pub fn cpu_halt_flag(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Whether the debugger asked for a single-step of the given thread.
    pub fn thread_step_flag(&self, thread: ThreadId) -> bool {
        self.steps.lock().contains(&thread)
    }

    /// The breakpoint of the given type with the lowest address at or above
    /// `addr`, if any. Execution engines use this to bound their inner loop.
    pub fn next_breakpoint_from(&self, addr: Address, ty: BreakpointType) -> Option<Breakpoint> {
        self.breakpoints.read().next_from(addr, ty)
    }

    /// Whether a breakpoint of the given type exists at the given address.
    pub fn check_breakpoint(&self, addr: Address, ty: BreakpointType) -> bool {
        self.breakpoints.read().check(addr, ty)
    }

    /// Delivers a stop reply identifying `thread` and the signal `trap` to
    /// the debugger, if one is connected.
    pub fn send_trap(&self, thread: ThreadId, trap: u8) {
        *self.selected.lock() = Some(thread);
        self.last_signal.store(trap, Ordering::SeqCst);

        let mut connection = self.connection.lock();
        let Some(conn) = connection.as_mut() else {
            return;
        };

        let reply = format!("T{trap:02x}thread:{:x};", thread.0);
        if send(&mut conn.stream, &packet::frame(reply.as_bytes())).is_err() {
            warn!("failed to deliver trap, dropping debugger connection");
            *connection = None;
        }
    }

    /// Services whatever the debugger sent since the last call. Performs
    /// only non-blocking socket I/O; never suspends the calling thread.
    pub fn handle_packet(&self, target: &mut dyn Target) {
        if !self.is_server_enabled() {
            return;
        }

        if self.deferred.swap(false, Ordering::SeqCst) {
            self.init();
        }

        self.accept_pending();

        // drain the socket first; dispatching happens with the connection
        // unlocked so that cores delivering traps are never blocked on it
        let mut events = Vec::new();
        {
            let mut connection = self.connection.lock();
            let Some(conn) = connection.as_mut() else {
                return;
            };

            let mut closed = false;
            let mut buf = [0u8; 4096];
            loop {
                match conn.stream.read(&mut buf) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(read) => conn.decoder.extend(&buf[..read]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("debugger connection error: {err}");
                        closed = true;
                        break;
                    }
                }
            }

            if closed {
                info!("debugger disconnected from {}", conn.peer);
                *connection = None;
                return;
            }

            while let Some(event) = conn.decoder.next_event() {
                events.push(event);
            }
        }

        for event in events {
            match event {
                Event::BadPacket => {
                    debug!("received packet with bad checksum");
                    self.send_to_connection(b"-");
                }
                Event::Interrupt => {
                    self.break_execution(false);
                    self.last_signal.store(SIGINT, Ordering::SeqCst);

                    let reply = self.stop_reason(target);
                    self.send_frame(reply.as_bytes());
                }
                Event::Packet(payload) => {
                    self.send_to_connection(b"+");

                    match self.dispatch(&payload, target) {
                        Dispatch::Reply(reply) => self.send_frame(&reply),
                        Dispatch::Silent => (),
                        Dispatch::Disconnect(reply) => {
                            if let Some(reply) = reply {
                                self.send_frame(&reply);
                            }

                            self.drop_connection();
                        }
                    }
                }
            }
        }
    }

    fn send_to_connection(&self, bytes: &[u8]) {
        let mut connection = self.connection.lock();
        let Some(conn) = connection.as_mut() else {
            return;
        };

        if send(&mut conn.stream, bytes).is_err() {
            warn!("debugger connection lost");
            *connection = None;
        }
    }

    fn send_frame(&self, payload: &[u8]) {
        self.send_to_connection(&packet::frame(payload));
    }

    fn drop_connection(&self) {
        if let Some(conn) = self.connection.lock().take() {
            info!("debugger disconnected from {}", conn.peer);
        }
    }

    fn accept_pending(&self) {
        let listener = self.listener.lock();
        let Some(socket) = listener.as_ref() else {
            return;
        };

        match socket.accept() {
            Ok((stream, peer)) => {
                let mut connection = self.connection.lock();
                if connection.is_some() {
                    // only one debugger at a time
                    warn!("rejecting second debugger connection from {peer}");
                    return;
                }

                if let Err(err) = stream.set_nonblocking(true) {
                    warn!("failed to configure debugger socket: {err}");
                    return;
                }
                _ = stream.set_nodelay(true);

                info!("debugger connected from {peer}");

                // sessions begin with the target stopped
                self.break_execution(false);
                *connection = Some(Connection {
                    stream,
                    decoder: Decoder::default(),
                    peer,
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => (),
            Err(err) => debug!("failed to accept debugger connection: {err}"),
        }
    }

    /// The thread stop replies should name: the selected one, or whatever is
    /// currently resident on the lowest core.
    fn reply_thread(&self, target: &mut dyn Target) -> Option<ThreadId> {
        let mut selected = self.selected.lock();
        if selected.is_none() {
            *selected = target.active_threads().first().copied();
        }

        *selected
    }

    fn stop_reason(&self, target: &mut dyn Target) -> String {
        let signal = self.last_signal.load(Ordering::SeqCst);
        match self.reply_thread(target) {
            Some(thread) => format!("T{signal:02x}thread:{:x};", thread.0),
            None => format!("S{signal:02x}"),
        }
    }

    /// Clears the stop state consumed by a resume packet and installs the
    /// new set of single-step requests.
    fn resume(&self, steps: Vec<ThreadId>) {
        let mut set = self.steps.lock();
        set.clear();
        set.extend(steps);

        self.halt.store(false, Ordering::SeqCst);
    }

    fn dispatch(&self, payload: &[u8], target: &mut dyn Target) -> Dispatch {
        let Some((&first, body)) = payload.split_first() else {
            return Dispatch::Reply(Vec::new());
        };

        let reply = match first {
            b'?' => self.stop_reason(target).into_bytes(),
            b'g' => self.read_general_registers(target),
            b'G' => self.write_general_registers(body, target),
            b'p' => self.read_register(body, target),
            b'P' => self.write_register(body, target),
            b'm' => self.read_memory(body, target),
            b'M' => self.write_memory(body, target),
            b'c' => {
                self.resume(Vec::new());
                return Dispatch::Silent;
            }
            b's' => {
                let steps = self.reply_thread(target).into_iter().collect();
                self.resume(steps);
                return Dispatch::Silent;
            }
            b'v' => return self.dispatch_v(payload, target),
            b'Z' => self.insert_breakpoint(body),
            b'z' => self.remove_breakpoint(body),
            b'q' => self.dispatch_query(payload, target),
            b'H' => self.select_thread(body),
            b'T' => self.thread_alive(body, target),
            b'!' => b"OK".to_vec(),
            b'D' => {
                info!("debugger detached");
                self.breakpoints.write().clear();
                self.resume(Vec::new());
                return Dispatch::Disconnect(Some(b"OK".to_vec()));
            }
            b'k' => {
                info!("debugger killed the session");
                return Dispatch::Disconnect(None);
            }
            _ => {
                debug!(
                    "unhandled debugger packet: {}",
                    String::from_utf8_lossy(payload)
                );
                Vec::new()
            }
        };

        Dispatch::Reply(reply)
    }

    fn dispatch_v(&self, payload: &[u8], target: &mut dyn Target) -> Dispatch {
        if payload == b"vCont?" {
            return Dispatch::Reply(b"vCont;c;C;s;S".to_vec());
        }

        if let Some(actions) = payload.strip_prefix(b"vCont;") {
            let mut steps = Vec::new();
            for action in actions.split(|&b| b == b';') {
                let (kind, thread) = match action.iter().position(|&b| b == b':') {
                    Some(colon) => (&action[..colon], packet::parse_hex(&action[colon + 1..])),
                    None => (action, None),
                };

                match kind.first() {
                    Some(&b'c' | &b'C') => (),
                    Some(&b's' | &b'S') => {
                        let thread = thread.map(ThreadId).or_else(|| self.reply_thread(target));
                        steps.extend(thread);
                    }
                    _ => return Dispatch::Reply(b"E01".to_vec()),
                }
            }

            self.resume(steps);
            return Dispatch::Silent;
        }

        Dispatch::Reply(Vec::new())
    }

    fn dispatch_query(&self, payload: &[u8], target: &mut dyn Target) -> Vec<u8> {
        if payload.starts_with(b"qSupported") {
            return b"PacketSize=1000;qXfer:libraries:read+".to_vec();
        }

        if payload == b"qC" {
            return match self.reply_thread(target) {
                Some(thread) => format!("QC{:x}", thread.0).into_bytes(),
                None => b"QC0".to_vec(),
            };
        }

        if payload == b"qfThreadInfo" {
            let threads = target.active_threads();
            if threads.is_empty() {
                return b"l".to_vec();
            }

            let ids: Vec<String> = threads.iter().map(|t| format!("{:x}", t.0)).collect();
            return format!("m{}", ids.join(",")).into_bytes();
        }

        if payload == b"qsThreadInfo" {
            return b"l".to_vec();
        }

        if payload == b"qAttached" {
            return b"1".to_vec();
        }

        if let Some(args) = payload.strip_prefix(b"qXfer:libraries:read::") {
            return self.read_library_list(args);
        }

        Vec::new()
    }

    fn read_library_list(&self, args: &[u8]) -> Vec<u8> {
        let mut fields = args.split(|&b| b == b',');
        let (Some(offset), Some(length)) = (
            fields.next().and_then(packet::parse_hex),
            fields.next().and_then(packet::parse_hex),
        ) else {
            return b"E01".to_vec();
        };

        let mut xml = String::from("<library-list>");
        for module in self.modules.lock().iter() {
            xml.push_str(&format!(
                "<library name=\"{}\"><segment address=\"{:#x}\"/></library>",
                module.name,
                module.beg.value(),
            ));
        }
        xml.push_str("</library-list>");

        let bytes = xml.as_bytes();
        let offset = (offset as usize).min(bytes.len());
        let end = offset.saturating_add(length as usize).min(bytes.len());

        let mut reply = Vec::with_capacity(end - offset + 1);
        reply.push(if end < bytes.len() { b'm' } else { b'l' });
        reply.extend_from_slice(&bytes[offset..end]);
        reply
    }

    fn read_general_registers(&self, target: &mut dyn Target) -> Vec<u8> {
        let Some(regs) = self
            .reply_thread(target)
            .and_then(|thread| target.read_registers(thread))
        else {
            return b"E01".to_vec();
        };

        registers_to_hex(&regs).into_bytes()
    }

    fn write_general_registers(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let (Some(thread), Some(regs)) = (self.reply_thread(target), registers_from_hex(body))
        else {
            return b"E01".to_vec();
        };

        if target.write_registers(thread, &regs) {
            b"OK".to_vec()
        } else {
            b"E01".to_vec()
        }
    }

    fn read_register(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let (Some(id), Some(regs)) = (
            packet::parse_hex(body),
            self.reply_thread(target)
                .and_then(|thread| target.read_registers(thread)),
        ) else {
            return b"E01".to_vec();
        };

        match id {
            0..=30 => packet::encode_hex(&regs.x[id as usize].to_le_bytes()).into_bytes(),
            31 => packet::encode_hex(&regs.sp.to_le_bytes()).into_bytes(),
            32 => packet::encode_hex(&regs.pc.to_le_bytes()).into_bytes(),
            33 => packet::encode_hex(&regs.pstate.to_le_bytes()).into_bytes(),
            _ => b"E01".to_vec(),
        }
    }

    fn write_register(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let Some(equals) = body.iter().position(|&b| b == b'=') else {
            return b"E01".to_vec();
        };

        let (Some(id), Some(value)) = (
            packet::parse_hex(&body[..equals]),
            packet::decode_hex(&body[equals + 1..]),
        ) else {
            return b"E01".to_vec();
        };

        let Some((thread, mut regs)) = self
            .reply_thread(target)
            .and_then(|thread| Some((thread, target.read_registers(thread)?)))
        else {
            return b"E01".to_vec();
        };

        match (id, value.len()) {
            (0..=30, 8) => {
                regs.x[id as usize] = u64::from_le_bytes(value.try_into().unwrap_or_default())
            }
            (31, 8) => regs.sp = u64::from_le_bytes(value.try_into().unwrap_or_default()),
            (32, 8) => regs.pc = u64::from_le_bytes(value.try_into().unwrap_or_default()),
            (33, 4) => regs.pstate = u32::from_le_bytes(value.try_into().unwrap_or_default()),
            _ => return b"E01".to_vec(),
        }

        if target.write_registers(thread, &regs) {
            b"OK".to_vec()
        } else {
            b"E01".to_vec()
        }
    }

    fn read_memory(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let mut fields = body.split(|&b| b == b',');
        let (Some(addr), Some(length)) = (
            fields.next().and_then(packet::parse_hex),
            fields.next().and_then(packet::parse_hex),
        ) else {
            return b"E01".to_vec();
        };

        if length > MAX_MEMORY_READ {
            return b"E01".to_vec();
        }

        let mut buf = vec![0; length as usize];
        if !target.read_memory(Address(addr), &mut buf) {
            return b"E01".to_vec();
        }

        packet::encode_hex(&buf).into_bytes()
    }

    fn write_memory(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let Some(colon) = body.iter().position(|&b| b == b':') else {
            return b"E01".to_vec();
        };

        let mut fields = body[..colon].split(|&b| b == b',');
        let (Some(addr), Some(length), Some(data)) = (
            fields.next().and_then(packet::parse_hex),
            fields.next().and_then(packet::parse_hex),
            packet::decode_hex(&body[colon + 1..]),
        ) else {
            return b"E01".to_vec();
        };

        if data.len() as u64 != length || !target.write_memory(Address(addr), &data) {
            return b"E01".to_vec();
        }

        b"OK".to_vec()
    }

    fn breakpoint_args(body: &[u8]) -> Option<(BreakpointType, Address, u64)> {
        let mut fields = body.split(|&b| b == b',');

        let ty = match fields.next()? {
            b"0" => BreakpointType::Execute,
            b"2" => BreakpointType::Write,
            b"3" => BreakpointType::Read,
            b"4" => BreakpointType::Access,
            _ => return None,
        };

        let addr = fields.next().and_then(packet::parse_hex)?;
        let len = fields.next().and_then(packet::parse_hex)?;
        Some((ty, Address(addr), len))
    }

    fn insert_breakpoint(&self, body: &[u8]) -> Vec<u8> {
        let Some((ty, addr, len)) = Self::breakpoint_args(body) else {
            // unsupported breakpoint kinds get the empty response
            return Vec::new();
        };

        match self.breakpoints.write().insert(Breakpoint { addr, len, ty }) {
            Ok(()) => {
                debug!("inserted {ty:?} breakpoint at {addr}");
                b"OK".to_vec()
            }
            Err(err) => {
                warn!("debugger breakpoint rejected: {err}");
                b"E01".to_vec()
            }
        }
    }

    fn remove_breakpoint(&self, body: &[u8]) -> Vec<u8> {
        let Some((ty, addr, _)) = Self::breakpoint_args(body) else {
            return Vec::new();
        };

        if self.breakpoints.write().remove(addr, ty) {
            debug!("removed {ty:?} breakpoint at {addr}");
            b"OK".to_vec()
        } else {
            b"E01".to_vec()
        }
    }

    fn select_thread(&self, body: &[u8]) -> Vec<u8> {
        // body is the operation ('c' or 'g') followed by a thread id; 0 and
        // -1 mean "any" and "all" and leave the selection untouched
        let Some((_, id)) = body.split_first() else {
            return b"E01".to_vec();
        };

        if !matches!(id, b"0" | b"-1")
            && let Some(thread) = packet::parse_hex(id)
        {
            *self.selected.lock() = Some(ThreadId(thread));
        }

        b"OK".to_vec()
    }

    fn thread_alive(&self, body: &[u8], target: &mut dyn Target) -> Vec<u8> {
        let alive = packet::parse_hex(body)
            .map(ThreadId)
            .is_some_and(|thread| target.active_threads().contains(&thread));

        if alive { b"OK".to_vec() } else { b"E01".to_vec() }
    }
}

fn send(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(count) => written += count,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => std::hint::spin_loop(),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

/// Serializes the register file the way the debugger expects the `g` packet:
/// x0-x30, sp and pc as little-endian u64, then the 32-bit processor state.
fn registers_to_hex(regs: &Registers) -> String {
    let mut out = String::with_capacity(33 * 16 + 8);
    for x in &regs.x {
        out.push_str(&packet::encode_hex(&x.to_le_bytes()));
    }
    out.push_str(&packet::encode_hex(&regs.sp.to_le_bytes()));
    out.push_str(&packet::encode_hex(&regs.pc.to_le_bytes()));
    out.push_str(&packet::encode_hex(&regs.pstate.to_le_bytes()));
    out
}

fn registers_from_hex(text: &[u8]) -> Option<Registers> {
    let bytes = packet::decode_hex(text)?;
    if bytes.len() < 33 * 8 + 4 {
        return None;
    }

    let mut regs = Registers::default();
    let mut chunks = bytes[..33 * 8].chunks_exact(8);
    for x in &mut regs.x {
        *x = u64::from_le_bytes(chunks.next()?.try_into().ok()?);
    }
    regs.sp = u64::from_le_bytes(chunks.next()?.try_into().ok()?);
    regs.pc = u64::from_le_bytes(chunks.next()?.try_into().ok()?);
    regs.pstate = u32::from_le_bytes(bytes[33 * 8..33 * 8 + 4].try_into().ok()?);

    Some(regs)
}

#[cfg(test)]
mod test {
    use super::{Registers, registers_from_hex, registers_to_hex};

    #[test]
    fn register_hex_round_trip() {
        let mut regs = Registers::default();
        regs.x[0] = 0x1122_3344_5566_7788;
        regs.x[30] = 42;
        regs.sp = 0xFFFF_0000;
        regs.pc = 0x8000_4000;
        regs.pstate = 0x6000_0000;

        let hex = registers_to_hex(&regs);
        assert_eq!(hex.len(), 33 * 16 + 8);
        assert_eq!(registers_from_hex(hex.as_bytes()), Some(regs));
    }

    #[test]
    fn register_hex_rejects_short_input() {
        assert_eq!(registers_from_hex(b"0011"), None);
    }
}
