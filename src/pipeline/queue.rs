//! FIFO of timestamp-corrected packets awaiting the container writer

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use super::pool::PacketPool;
use super::types::Packet;

/// Unbounded, order-preserving ready queue.
///
/// Packets leave in arrival order across both streams; nothing here sorts
/// by timestamp. Multiple producers, one consumer.
pub struct ReadyQueue {
    packets: Mutex<VecDeque<Packet>>,
    available: Condvar,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, packet: Packet) {
        self.packets.lock().push_back(packet);
        self.available.notify_one();
    }

    /// Non-blocking pop of the oldest packet
    pub fn pop(&self) -> Option<Packet> {
        self.packets.lock().pop_front()
    }

    /// Pop the oldest packet, waiting at most `timeout` for one to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        let mut packets = self.packets.lock();
        if packets.is_empty() {
            // Spurious wakeups only cost one extra poll iteration.
            let _ = self.available.wait_for(&mut packets, timeout);
        }
        packets.pop_front()
    }

    /// Take the oldest queued packet away from the writer.
    ///
    /// Used by producers when the pool is exhausted; the stolen packet's
    /// content is lost.
    pub fn steal_oldest(&self) -> Option<Packet> {
        self.pop()
    }

    /// Move every queued packet back to the pool, returning how many moved
    pub fn drain_into(&self, pool: &PacketPool) -> usize {
        let drained: Vec<Packet> = self.packets.lock().drain(..).collect();
        let count = drained.len();
        pool.release_all(drained);
        count
    }

    /// Wake a consumer blocked in `pop_timeout`
    pub fn notify(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
