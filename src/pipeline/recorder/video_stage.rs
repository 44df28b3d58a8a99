//! Video encode worker
//!
//! Frames reach the encoder through its input surface; this side only
//! collects encoded units, captures the codec configuration and rebases.

use bytes::Bytes;
use log::{info, warn};
use std::sync::Arc;

use crate::error::Result;
use crate::media::VideoEncoder;
use crate::pipeline::clock::{Rebase, SessionClock};
use crate::pipeline::exchange::PacketExchange;
use crate::pipeline::session::SessionFlags;
use crate::pipeline::types::{MediaKind, Packet};

pub struct VideoWorker {
    encoder: Box<dyn VideoEncoder>,
    exchange: PacketExchange,
    flags: Arc<SessionFlags>,
    max_flush_packets: usize,
}

impl VideoWorker {
    pub fn new(
        encoder: Box<dyn VideoEncoder>,
        exchange: PacketExchange,
        flags: Arc<SessionFlags>,
        max_flush_packets: usize,
    ) -> Self {
        Self {
            encoder,
            exchange,
            flags,
            max_flush_packets,
        }
    }

    /// Poll the encoder once. Returns whether it produced a complete unit.
    pub fn process(&mut self, clock: &mut SessionClock) -> Result<bool> {
        let Some(mut packet) = self.exchange.acquire(MediaKind::Video) else {
            return Ok(false);
        };

        if let Err(e) = self.encoder.encode(&mut packet) {
            self.exchange.recycle(packet);
            return Err(e);
        }

        Ok(self.route(packet, clock))
    }

    /// Signal end of input and collect what the encoder still holds
    pub fn flush(&mut self, clock: &mut SessionClock) -> Result<usize> {
        info!("Flushing video encoder");
        self.encoder.signal_end_of_input()?;

        let mut flushed = 0;
        for _ in 0..self.max_flush_packets {
            let Some(mut packet) = self.exchange.acquire(MediaKind::Video) else {
                warn!("Video flush stopped early, no packet available");
                return Ok(flushed);
            };

            if let Err(e) = self.encoder.encode(&mut packet) {
                self.exchange.recycle(packet);
                return Err(e);
            }
            if !self.route(packet, clock) {
                return Ok(flushed);
            }
            flushed += 1;
        }

        warn!(
            "Video flush reached {} packets, remaining output discarded",
            self.max_flush_packets
        );
        Ok(flushed)
    }

    pub fn release_surface(&mut self) {
        self.encoder.release_surface();
    }

    fn route(&mut self, mut packet: Packet, clock: &mut SessionClock) -> bool {
        if !packet.complete {
            self.exchange.recycle(packet);
            return false;
        }

        // First unit of a session is the out-of-band configuration
        if !self.flags.codec_config.is_written() {
            packet.pts = 0;
            packet.dts = 0;
            self.encoder.set_codec_config(&packet.data);
            self.flags
                .codec_config
                .publish(Bytes::copy_from_slice(&packet.data));
            info!("Captured video codec config ({} bytes)", packet.size());
            self.exchange.recycle(packet);
            return true;
        }

        match clock.rebase_video(&mut packet) {
            Rebase::Forward => self.exchange.publish(packet),
            Rebase::Unsynced => {
                self.exchange.health().record_unsynced();
                self.exchange.recycle(packet);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExhaustionPolicy;
    use crate::mock::MockVideoEncoder;
    use crate::pipeline::health::PipelineHealth;
    use crate::pipeline::pool::PacketPool;
    use crate::pipeline::queue::ReadyQueue;
    use std::time::Duration;

    fn worker(encoder: MockVideoEncoder) -> (VideoWorker, Arc<ReadyQueue>, Arc<SessionFlags>) {
        let ready = Arc::new(ReadyQueue::new());
        let flags = Arc::new(SessionFlags::new());
        let exchange = PacketExchange::new(
            Arc::new(PacketPool::new(16)),
            ready.clone(),
            Arc::new(PipelineHealth::new()),
            ExhaustionPolicy::StealOldest,
        );
        (
            VideoWorker::new(Box::new(encoder), exchange, flags.clone(), 8),
            ready,
            flags,
        )
    }

    #[test]
    fn test_first_packet_is_codec_config() {
        let encoder = MockVideoEncoder::new(vec![Some(5_000), Some(1_000), Some(1_500)]);
        let probe = encoder.probe();
        let (mut worker, ready, flags) = worker(encoder);
        let mut clock = SessionClock::new(0);

        assert!(worker.process(&mut clock).unwrap());
        assert!(flags.codec_config.is_written());
        assert_eq!(ready.len(), 0);
        assert_eq!(
            probe.codec_config().as_deref(),
            Some(crate::mock::CODEC_CONFIG)
        );
        let published = flags.codec_config.wait_timeout(Duration::from_millis(1));
        assert_eq!(published.unwrap().as_ref(), crate::mock::CODEC_CONFIG);

        worker.process(&mut clock).unwrap();
        worker.process(&mut clock).unwrap();

        let pts: Vec<(i64, i64)> =
            std::iter::from_fn(|| ready.pop()).map(|p| (p.pts, p.dts)).collect();
        assert_eq!(pts, vec![(0, 0), (500, 500)]);
        assert_eq!(clock.video_origin(), Some(1_000));
    }

    #[test]
    fn test_no_output_is_not_forwarded() {
        let encoder = MockVideoEncoder::new(vec![None, None]);
        let (mut worker, ready, flags) = worker(encoder);
        let mut clock = SessionClock::new(0);

        assert!(!worker.process(&mut clock).unwrap());
        assert!(!flags.codec_config.is_written());
        assert!(ready.is_empty());
    }

    #[test]
    fn test_flush_drains_buffered_units() {
        let encoder =
            MockVideoEncoder::new(vec![Some(0), Some(33_000)]).buffered(vec![66_000, 99_000]);
        let probe = encoder.probe();
        let (mut worker, ready, _) = worker(encoder);
        let mut clock = SessionClock::new(0);

        worker.process(&mut clock).unwrap();
        worker.process(&mut clock).unwrap();
        assert_eq!(worker.flush(&mut clock).unwrap(), 2);
        assert!(probe.end_of_input());

        let pts: Vec<i64> = std::iter::from_fn(|| ready.pop()).map(|p| p.pts).collect();
        assert_eq!(pts, vec![0, 33_000, 66_000]);
    }

    #[test]
    fn test_unsynced_video_is_dropped() {
        let encoder = MockVideoEncoder::new(vec![Some(0), Some(-40), Some(40)]);
        let (mut worker, ready, _) = worker(encoder);
        let mut clock = SessionClock::new(0);

        for _ in 0..3 {
            worker.process(&mut clock).unwrap();
        }
        assert_eq!(ready.len(), 1);
        assert_eq!(worker.exchange.health().packets_unsynced(), 1);
    }
}
