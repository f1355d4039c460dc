//! Reservation tracking for load-linked/store-conditional emulation.

use crate::cpu::NUM_CORES;
use common::Address;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    addr: u64,
    width: u64,
}

impl Reservation {
    fn overlaps(&self, addr: u64, width: u64) -> bool {
        self.addr < addr + width && addr < self.addr + self.width
    }
}

/// Tracks the address reservation each core holds between an exclusive load
/// and the matching exclusive store.
///
/// A single lock covers all reservations, so a successful
/// [`check_and_clear`] and the invalidations it causes are one atomic step:
/// no core can observe an exclusive store succeed against a reservation that
/// another store already broke.
///
/// [`check_and_clear`]: ExclusiveMonitor::check_and_clear
#[derive(Debug, Default)]
pub struct ExclusiveMonitor {
    reservations: Mutex<[Option<Reservation>; NUM_CORES]>,
}

impl ExclusiveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reservation for `core`, replacing any previous one.
    pub fn reserve(&self, core: usize, addr: Address, width: u64) {
        let mut reservations = self.reservations.lock();
        reservations[core] = Some(Reservation {
            addr: addr.value(),
            width,
        });
    }

    /// Attempts the exclusive-store side of a reservation.
    ///
    /// Returns whether `core` held a reservation matching `addr` and `width`.
    /// On success the reservation is consumed and, since the store went
    /// through, every other core's reservation overlapping the written range
    /// is invalidated.
    pub fn check_and_clear(&self, core: usize, addr: Address, width: u64) -> bool {
        let mut reservations = self.reservations.lock();
        let hit = matches!(
            reservations[core],
            Some(res) if res.addr == addr.value() && res.width == width
        );

        if hit {
            reservations[core] = None;
            for (index, slot) in reservations.iter_mut().enumerate() {
                if index != core
                    && matches!(*slot, Some(res) if res.overlaps(addr.value(), width))
                {
                    *slot = None;
                }
            }
        }

        hit
    }

    /// Invalidates every reservation overlapping a plain store to
    /// `[addr, addr + width)`. Called by the memory system on write paths.
    pub fn notify_store(&self, addr: Address, width: u64) {
        let mut reservations = self.reservations.lock();
        for slot in reservations.iter_mut() {
            if matches!(*slot, Some(res) if res.overlaps(addr.value(), width)) {
                *slot = None;
            }
        }
    }

    /// Drops the reservation held by `core`, if any.
    pub fn clear_all(&self, core: usize) {
        let mut reservations = self.reservations.lock();
        reservations[core] = None;
    }
}
