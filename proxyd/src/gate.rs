//! Readers/writers gate for the shared cache.
//!
//! The classic readers-preferred formulation: a reader counter behind a
//! mutex plus a write semaphore. The first reader in acquires the write
//! semaphore on behalf of all readers, the last reader out releases it;
//! writers take the semaphore directly. Sustained read traffic can starve
//! writers; that is the intended discipline, not an oversight.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// P: blocks until a permit is available, then takes it.
    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// V: returns a permit and wakes one waiter.
    pub(crate) fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }
}

/// The gate. Shared (read) tickets may overlap freely; the exclusive
/// (write) ticket excludes everything.
pub struct RwGate {
    readers: Mutex<usize>,
    write_m: Semaphore,
}

impl RwGate {
    pub fn new() -> Self {
        RwGate {
            readers: Mutex::new(0),
            write_m: Semaphore::new(1),
        }
    }

    /// Takes a shared ticket. The counter mutex is held across the write
    /// semaphore acquisition, so a blocked first reader also queues every
    /// reader behind it.
    pub fn read(&self) -> ReadTicket<'_> {
        let mut count = self.readers.lock();
        *count += 1;
        if *count == 1 {
            self.write_m.acquire();
        }
        ReadTicket { gate: self }
    }

    /// Takes the exclusive ticket.
    pub fn write(&self) -> WriteTicket<'_> {
        self.write_m.acquire();
        WriteTicket { gate: self }
    }
}

impl Default for RwGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadTicket<'a> {
    gate: &'a RwGate,
}

impl Drop for ReadTicket<'_> {
    fn drop(&mut self) {
        let mut count = self.gate.readers.lock();
        *count -= 1;
        if *count == 0 {
            self.gate.write_m.release();
        }
    }
}

pub struct WriteTicket<'a> {
    gate: &'a RwGate,
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        self.gate.write_m.release();
    }
}
