//! Bounded pool of reusable packets
//!
//! Shared by both encode paths and the container writer so the
//! capture-rate loop never allocates once the pool is warm.

use log::warn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::Packet;

/// Number of packets pre-allocated when no capacity is configured
pub const DEFAULT_POOL_CAPACITY: usize = 2000;

/// Payload capacity reserved for every pooled packet
const PACKET_RESERVE: usize = 4 * 1024;

/// Packet pool with a fixed population.
///
/// # Invariants
/// - all packets are allocated in `new`, `acquire` never allocates
/// - `in_flight() = acquired - released` stays within `capacity()`
/// - the free list never holds more than `capacity()` packets
pub struct PacketPool {
    free: Mutex<Vec<Packet>>,
    capacity: usize,
    in_flight: AtomicUsize,
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Packet::with_capacity(PACKET_RESERVE));
        }

        Self {
            free: Mutex::new(free),
            capacity,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Take a free packet, or `None` when every packet is in use.
    #[inline]
    pub fn acquire(&self) -> Option<Packet> {
        let packet = self.free.lock().pop()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(packet)
    }

    /// Put a packet back after it was used.
    #[inline]
    pub fn release(&self, mut packet: Packet) {
        packet.reset();
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            // Not one of ours; keeping it would grow the pool.
            warn!("Packet pool full, discarding foreign packet");
            return;
        }
        free.push(packet);
        drop(free);
        // Saturating: a foreign packet may be released into a drained pool.
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Return many packets at once
    pub fn release_all(&self, packets: impl IntoIterator<Item = Packet>) {
        for packet in packets {
            self.release(packet);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets currently available
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Packets currently owned by a pipeline stage
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl std::fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
