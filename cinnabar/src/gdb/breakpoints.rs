//! Breakpoint bookkeeping for the debug server.

use common::Address;
use easyerr::Error;
use std::collections::BTreeMap;

/// What kind of guest activity a breakpoint watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointType {
    /// Instruction fetch.
    Execute,
    /// Memory read.
    Read,
    /// Memory write.
    Write,
    /// Memory read or write.
    Access,
}

/// A breakpoint registered by the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub addr: Address,
    pub len: u64,
    pub ty: BreakpointType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    #[error("a breakpoint of the same type already exists at {addr}")]
    Duplicate { addr: Address },
}

/// Breakpoints of every type, ordered by address within each type.
///
/// Access breakpoints are stored once, not as a read/write pair; the
/// aliasing between access and read/write is resolved at query time.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    execute: BTreeMap<u64, Breakpoint>,
    read: BTreeMap<u64, Breakpoint>,
    write: BTreeMap<u64, Breakpoint>,
    access: BTreeMap<u64, Breakpoint>,
}

impl BreakpointTable {
    fn map(&self, ty: BreakpointType) -> &BTreeMap<u64, Breakpoint> {
        match ty {
            BreakpointType::Execute => &self.execute,
            BreakpointType::Read => &self.read,
            BreakpointType::Write => &self.write,
            BreakpointType::Access => &self.access,
        }
    }

    fn map_mut(&mut self, ty: BreakpointType) -> &mut BTreeMap<u64, Breakpoint> {
        match ty {
            BreakpointType::Execute => &mut self.execute,
            BreakpointType::Read => &mut self.read,
            BreakpointType::Write => &mut self.write,
            BreakpointType::Access => &mut self.access,
        }
    }

    /// Registers a breakpoint. Fails if one of the same type already exists
    /// at that address.
    pub fn insert(&mut self, bp: Breakpoint) -> Result<(), InsertError> {
        let map = self.map_mut(bp.ty);
        if map.contains_key(&bp.addr.value()) {
            return Err(InsertError::Duplicate { addr: bp.addr });
        }

        map.insert(bp.addr.value(), bp);
        Ok(())
    }

    /// Removes the breakpoint of the given type at the given address.
    /// Returns whether one existed.
    pub fn remove(&mut self, addr: Address, ty: BreakpointType) -> bool {
        self.map_mut(ty).remove(&addr.value()).is_some()
    }

    /// Whether a breakpoint of the given type exists at the given address.
    ///
    /// Memory accesses alias: a read query matches read and access entries,
    /// a write query matches write and access entries, and an access query
    /// matches all three.
    pub fn check(&self, addr: Address, ty: BreakpointType) -> bool {
        let addr = addr.value();
        match ty {
            BreakpointType::Execute => self.execute.contains_key(&addr),
            BreakpointType::Read => {
                self.read.contains_key(&addr) || self.access.contains_key(&addr)
            }
            BreakpointType::Write => {
                self.write.contains_key(&addr) || self.access.contains_key(&addr)
            }
            BreakpointType::Access => {
                self.read.contains_key(&addr)
                    || self.write.contains_key(&addr)
                    || self.access.contains_key(&addr)
            }
        }
    }

    /// The lowest-addressed breakpoint of the given type at or above `addr`.
    pub fn next_from(&self, addr: Address, ty: BreakpointType) -> Option<Breakpoint> {
        self.map(ty)
            .range(addr.value()..)
            .next()
            .map(|(_, bp)| *bp)
    }

    /// Drops every breakpoint.
    pub fn clear(&mut self) {
        self.execute.clear();
        self.read.clear();
        self.write.clear();
        self.access.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.execute.is_empty()
            && self.read.is_empty()
            && self.write.is_empty()
            && self.access.is_empty()
    }
}
