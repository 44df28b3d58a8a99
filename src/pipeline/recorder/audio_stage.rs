//! Audio capture/encode worker
//!
//! Reads PCM chunks from the source, stamps them from the running sample
//! count and drives the encoder until the whole chunk is consumed.

use log::{info, warn};

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::media::{AudioEncoder, AudioSource};
use crate::pipeline::clock::{Rebase, SessionClock};
use crate::pipeline::exchange::PacketExchange;
use crate::pipeline::types::{MediaKind, Packet, SampleBuffer};

pub struct AudioWorker {
    source: Box<dyn AudioSource>,
    encoder: Box<dyn AudioEncoder>,
    samples: SampleBuffer,
    exchange: PacketExchange,
    /// Sample frames read since the session started
    frames_read: u64,
    source_started: bool,
    max_flush_packets: usize,
}

impl AudioWorker {
    pub fn new(
        source: Box<dyn AudioSource>,
        encoder: Box<dyn AudioEncoder>,
        exchange: PacketExchange,
        config: &RecorderConfig,
    ) -> Self {
        let samples = SampleBuffer::new(
            config.pipeline.chunk_samples,
            source.sample_rate(),
            source.channels(),
            config.audio.sample_format,
        );

        Self {
            source,
            encoder,
            samples,
            exchange,
            frames_read: 0,
            source_started: false,
            max_flush_packets: config.pipeline.max_flush_packets,
        }
    }

    pub fn start_source(&mut self) -> Result<()> {
        if self.source_started {
            return Ok(());
        }
        self.source.start()?;
        self.source_started = true;
        info!(
            "Audio source started ({} Hz, {} channels)",
            self.samples.sample_rate, self.samples.channels
        );
        Ok(())
    }

    pub fn stop_source(&mut self) -> Result<()> {
        if !self.source_started {
            return Ok(());
        }
        self.source_started = false;
        self.source.stop()
    }

    pub fn is_source_started(&self) -> bool {
        self.source_started
    }

    /// Microsecond pts of the next chunk
    fn next_pts(&self) -> i64 {
        (self.frames_read * 1_000_000 / self.samples.sample_rate.max(1) as u64) as i64
    }

    /// Read and encode one chunk. Returns the number of samples read, `0` when
    /// the source had nothing.
    pub fn process(&mut self, clock: &mut SessionClock) -> Result<usize> {
        let read = self.source.read(self.samples.storage_mut())?;
        if read == 0 {
            return Ok(0);
        }

        let pts = self.next_pts();
        self.samples.set_complete(read, pts);
        let remaining = self.samples.num_frames();
        self.frames_read += remaining as u64;

        let mut consumed = 0;
        while consumed < remaining {
            let Some(mut packet) = self.exchange.acquire(MediaKind::Audio) else {
                warn!("Dropping {} audio frames", remaining - consumed);
                break;
            };

            let used = match self
                .encoder
                .encode(&mut packet, Some(&self.samples), consumed)
            {
                Ok(used) => used,
                Err(e) => {
                    self.exchange.recycle(packet);
                    return Err(e);
                }
            };

            let progressed = used > 0 || packet.complete;
            consumed += used;
            self.route(packet, clock);

            if !progressed {
                return Err(RecorderError::encoder(
                    MediaKind::Audio,
                    "encoder consumed no samples",
                ));
            }
        }

        Ok(read)
    }

    /// Drain the encoder's buffered output. Returns how many packets came out.
    pub fn flush(&mut self, clock: &mut SessionClock) -> Result<usize> {
        info!("Flushing audio encoder");
        let mut flushed = 0;

        for _ in 0..self.max_flush_packets {
            let Some(mut packet) = self.exchange.acquire(MediaKind::Audio) else {
                warn!("Audio flush stopped early, no packet available");
                return Ok(flushed);
            };

            if let Err(e) = self.encoder.encode(&mut packet, None, 0) {
                self.exchange.recycle(packet);
                return Err(e);
            }
            if !packet.complete {
                self.exchange.recycle(packet);
                return Ok(flushed);
            }

            self.route(packet, clock);
            flushed += 1;
        }

        warn!(
            "Audio flush reached {} packets, remaining output discarded",
            self.max_flush_packets
        );
        Ok(flushed)
    }

    /// Forget the sample count; the next session starts at pts 0
    pub fn reset_session(&mut self) {
        self.frames_read = 0;
    }

    fn route(&self, mut packet: Packet, clock: &mut SessionClock) {
        if !packet.complete {
            self.exchange.recycle(packet);
            return;
        }

        match clock.rebase_audio(&mut packet) {
            Rebase::Forward => self.exchange.publish(packet),
            Rebase::Unsynced => {
                self.exchange.health().record_unsynced();
                self.exchange.recycle(packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExhaustionPolicy;
    use crate::mock::{MockAudioEncoder, MockAudioSource};
    use crate::pipeline::health::PipelineHealth;
    use crate::pipeline::pool::PacketPool;
    use crate::pipeline::queue::ReadyQueue;
    use std::sync::Arc;

    struct Fixture {
        pool: Arc<PacketPool>,
        ready: Arc<ReadyQueue>,
        health: Arc<PipelineHealth>,
        worker: AudioWorker,
    }

    fn fixture(
        capacity: usize,
        chunks: Vec<usize>,
        encoder: MockAudioEncoder,
        policy: ExhaustionPolicy,
    ) -> Fixture {
        let mut config = RecorderConfig::default();
        config.pipeline.chunk_samples = 1024;
        config.pipeline.max_flush_packets = 8;

        let pool = Arc::new(PacketPool::new(capacity));
        let ready = Arc::new(ReadyQueue::new());
        let health = Arc::new(PipelineHealth::new());
        let exchange =
            PacketExchange::new(pool.clone(), ready.clone(), health.clone(), policy);

        let source = MockAudioSource::new(1_000, 1, chunks);
        let worker = AudioWorker::new(Box::new(source), Box::new(encoder), exchange, &config);
        Fixture {
            pool,
            ready,
            health,
            worker,
        }
    }

    #[test]
    fn test_chunk_pts_advance_with_samples() {
        // 1 kHz mono: 500 samples = 500 ms
        let mut f = fixture(
            16,
            vec![500, 500, 250],
            MockAudioEncoder::new(500, 0),
            ExhaustionPolicy::StealOldest,
        );
        let mut clock = SessionClock::new(0);

        assert_eq!(f.worker.process(&mut clock).unwrap(), 500);
        assert_eq!(f.worker.process(&mut clock).unwrap(), 500);
        assert_eq!(f.worker.process(&mut clock).unwrap(), 250);
        assert_eq!(f.worker.process(&mut clock).unwrap(), 0);

        let pts: Vec<i64> = std::iter::from_fn(|| f.ready.pop()).map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 500_000, 1_000_000]);
    }

    #[test]
    fn test_chunk_split_across_packets() {
        // Encoder takes 100 frames per call: one chunk yields 3 packets
        let mut f = fixture(
            16,
            vec![300],
            MockAudioEncoder::new(100, 0),
            ExhaustionPolicy::StealOldest,
        );
        let mut clock = SessionClock::new(0);

        f.worker.process(&mut clock).unwrap();
        assert_eq!(f.ready.len(), 3);
        assert_eq!(f.health.packets_encoded(), 3);
        assert_eq!(f.pool.in_flight(), 3);
    }

    #[test]
    fn test_multichannel_chunks_keep_frames_whole() {
        let mut config = RecorderConfig::default();
        config.pipeline.chunk_samples = 1024;
        let pool = Arc::new(PacketPool::new(8));
        let ready = Arc::new(ReadyQueue::new());
        let exchange = PacketExchange::new(
            pool.clone(),
            ready.clone(),
            Arc::new(PipelineHealth::new()),
            ExhaustionPolicy::StealOldest,
        );
        // 3 channels at 1 kHz: 1024 samples is not a whole number of frames
        let source = MockAudioSource::new(1_000, 3, vec![1024, 1024, 1024]);
        let mut worker = AudioWorker::new(
            Box::new(source),
            Box::new(MockAudioEncoder::new(2_000, 0)),
            exchange,
            &config,
        );
        let mut clock = SessionClock::new(0);

        for _ in 0..3 {
            assert_eq!(worker.process(&mut clock).unwrap(), 1023);
        }
        let pts: Vec<i64> = std::iter::from_fn(|| ready.pop()).map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 341_000, 682_000]);
    }

    #[test]
    fn test_buffering_encoder_returns_incomplete_packets() {
        // One frame of latency: first call yields nothing
        let mut f = fixture(
            4,
            vec![100, 100],
            MockAudioEncoder::new(100, 1),
            ExhaustionPolicy::StealOldest,
        );
        let mut clock = SessionClock::new(0);

        f.worker.process(&mut clock).unwrap();
        assert_eq!(f.ready.len(), 0);
        assert_eq!(f.pool.in_flight(), 0);

        f.worker.process(&mut clock).unwrap();
        assert_eq!(f.ready.len(), 1);

        assert_eq!(f.worker.flush(&mut clock).unwrap(), 1);
        assert_eq!(f.ready.len(), 2);
    }

    #[test]
    fn test_exhausted_pool_falls_back_to_ready_queue() {
        // Pool of 2, five packets and no writer draining
        let mut f = fixture(
            2,
            vec![100; 5],
            MockAudioEncoder::new(100, 0),
            ExhaustionPolicy::StealOldest,
        );
        let mut clock = SessionClock::new(0);

        for _ in 0..5 {
            assert_eq!(f.worker.process(&mut clock).unwrap(), 100);
            assert!(f.pool.in_flight() <= 2);
        }

        assert_eq!(f.health.packets_encoded(), 5);
        assert_eq!(f.health.packets_dropped(), 3);
        assert_eq!(f.ready.len(), 2);
        assert_eq!(f.pool.available(), 0);

        // The survivors are the two newest chunks
        let pts: Vec<i64> = std::iter::from_fn(|| f.ready.pop()).map(|p| p.pts).collect();
        assert_eq!(pts, vec![300_000, 400_000]);
    }

    #[test]
    fn test_drop_newest_skips_encode() {
        let mut f = fixture(
            1,
            vec![100, 100],
            MockAudioEncoder::new(100, 0),
            ExhaustionPolicy::DropNewest,
        );
        let mut clock = SessionClock::new(0);

        f.worker.process(&mut clock).unwrap();
        f.worker.process(&mut clock).unwrap();

        assert_eq!(f.ready.len(), 1);
        assert_eq!(f.ready.pop().unwrap().pts, 0);
        assert_eq!(f.health.chunks_skipped(), 1);
    }

    #[test]
    fn test_encoder_error_is_fatal() {
        let mut f = fixture(
            4,
            vec![100],
            MockAudioEncoder::new(100, 0).failing_after(0),
            ExhaustionPolicy::StealOldest,
        );
        let mut clock = SessionClock::new(0);

        let err = f.worker.process(&mut clock).unwrap_err();
        assert!(matches!(
            err,
            RecorderError::Encoder {
                kind: MediaKind::Audio,
                ..
            }
        ));
        // The packet went back to the pool
        assert_eq!(f.pool.in_flight(), 0);
    }

    #[test]
    fn test_source_start_is_idempotent() {
        let mut f = fixture(
            1,
            vec![],
            MockAudioEncoder::new(100, 0),
            ExhaustionPolicy::StealOldest,
        );
        f.worker.start_source().unwrap();
        f.worker.start_source().unwrap();
        assert!(f.worker.is_source_started());
        f.worker.stop_source().unwrap();
        assert!(!f.worker.is_source_started());
    }
}
