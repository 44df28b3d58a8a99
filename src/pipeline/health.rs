//! Health monitoring and metrics for the recording pipeline

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a recorder
///
/// All fields use atomic operations; encode workers and the container writer
/// update them from different threads.
pub struct PipelineHealth {
    /// Complete packets pushed to the ready queue
    pub packets_encoded: AtomicU64,

    /// Packets handed to the container sink
    pub packets_written: AtomicU64,

    /// Payload bytes handed to the container sink
    pub bytes_written: AtomicU64,

    /// Queued packets sacrificed because the pool ran dry
    pub packets_dropped: AtomicU64,

    /// Queued packets returned to the pool unwritten when the writer stopped early
    pub packets_discarded: AtomicU64,

    /// Encode calls skipped for lack of any packet
    pub chunks_skipped: AtomicU64,

    /// Complete packets carrying a negative timestamp, not forwarded
    pub packets_unsynced: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            packets_encoded: AtomicU64::new(0),
            packets_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
            chunks_skipped: AtomicU64::new(0),
            packets_unsynced: AtomicU64::new(0),
        }
    }

    pub fn record_encoded(&self) {
        self.packets_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, size: usize) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: usize) {
        self.packets_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsynced(&self) {
        self.packets_unsynced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded.load(Ordering::Relaxed)
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn packets_discarded(&self) -> u64 {
        self.packets_discarded.load(Ordering::Relaxed)
    }

    pub fn chunks_skipped(&self) -> u64 {
        self.chunks_skipped.load(Ordering::Relaxed)
    }

    pub fn packets_unsynced(&self) -> u64 {
        self.packets_unsynced.load(Ordering::Relaxed)
    }

    /// Percentage of encoded packets lost to pool exhaustion
    pub fn drop_rate(&self) -> f64 {
        let encoded = self.packets_encoded();
        if encoded == 0 {
            return 0.0;
        }
        (self.packets_dropped() as f64 / encoded as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            packets_encoded: self.packets_encoded(),
            packets_written: self.packets_written(),
            bytes_written: self.bytes_written(),
            packets_dropped: self.packets_dropped(),
            packets_discarded: self.packets_discarded(),
            chunks_skipped: self.chunks_skipped(),
            packets_unsynced: self.packets_unsynced(),
            drop_rate: self.drop_rate(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub packets_encoded: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub packets_dropped: u64,
    pub packets_discarded: u64,
    pub chunks_skipped: u64,
    pub packets_unsynced: u64,
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} encoded, {} written ({} bytes), {} dropped ({:.2}%), {} discarded, {} skipped, {} unsynced",
            self.packets_encoded,
            self.packets_written,
            self.bytes_written,
            self.packets_dropped,
            self.drop_rate,
            self.packets_discarded,
            self.chunks_skipped,
            self.packets_unsynced
        )
    }
}
