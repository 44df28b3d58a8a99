//! Packet hand-off between the pool, the encode workers and the ready queue

use log::warn;
use std::sync::Arc;

use crate::config::ExhaustionPolicy;

use super::health::PipelineHealth;
use super::pool::PacketPool;
use super::queue::ReadyQueue;
use super::types::{MediaKind, Packet};

/// Producer-side view of the pipeline's packet plumbing
///
/// Owns the exhaustion policy so both encode paths degrade the same way.
#[derive(Clone)]
pub struct PacketExchange {
    pool: Arc<PacketPool>,
    ready: Arc<ReadyQueue>,
    health: Arc<PipelineHealth>,
    policy: ExhaustionPolicy,
}

impl PacketExchange {
    pub fn new(
        pool: Arc<PacketPool>,
        ready: Arc<ReadyQueue>,
        health: Arc<PipelineHealth>,
        policy: ExhaustionPolicy,
    ) -> Self {
        Self {
            pool,
            ready,
            health,
            policy,
        }
    }

    /// Get an empty packet for the next encoder call.
    ///
    /// Falls back to the exhaustion policy when the pool is empty. `None`
    /// means the caller has to skip this encode call.
    pub fn acquire(&self, kind: MediaKind) -> Option<Packet> {
        if let Some(mut packet) = self.pool.acquire() {
            packet.kind = kind;
            return Some(packet);
        }

        warn!("Packet buffer empty, {} data will be lost", kind);
        let stolen = match self.policy {
            ExhaustionPolicy::StealOldest => self.ready.steal_oldest(),
            ExhaustionPolicy::DropNewest => None,
        };

        match stolen {
            Some(mut packet) => {
                self.health.record_dropped();
                packet.reset();
                packet.kind = kind;
                Some(packet)
            }
            None => {
                self.health.record_skipped();
                None
            }
        }
    }

    /// Queue a complete, rebased packet for the writer
    pub fn publish(&self, packet: Packet) {
        self.health.record_encoded();
        self.ready.push(packet);
    }

    /// Return an unused or incomplete packet
    pub fn recycle(&self, packet: Packet) {
        self.pool.release(packet);
    }

    pub fn health(&self) -> &PipelineHealth {
        &self.health
    }
}
