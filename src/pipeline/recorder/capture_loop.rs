//! Recorder loop: alternates the video and audio workers on one thread

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pipeline::clock::SessionClock;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::{RecorderState, StateCell};

use super::audio_stage::AudioWorker;
use super::video_stage::VideoWorker;

/// Everything the recorder thread needs that outlives a single session
pub struct CaptureEngine {
    pub audio: AudioWorker,
    pub video: VideoWorker,
    pub clock: SessionClock,
    state: Arc<StateCell>,
    /// Upper bound on reads while draining a stopped source
    max_drain_reads: usize,
}

impl CaptureEngine {
    pub fn new(
        audio: AudioWorker,
        video: VideoWorker,
        clock: SessionClock,
        state: Arc<StateCell>,
        max_drain_reads: usize,
    ) -> Self {
        Self {
            audio,
            video,
            clock,
            state,
            max_drain_reads,
        }
    }

    /// Run one session: capture until asked to stop, then drain and reset
    fn record(&mut self, signals: &LoopSignals) -> Result<()> {
        let started = Instant::now();
        let captured = self.capture(signals);
        self.state.transition(RecorderState::Draining);

        let drained = match captured {
            Ok(()) if signals.abort.is_cancelled() => {
                warn!("Container writer failed, skipping encoder flush");
                Ok(())
            }
            Ok(()) => self.drain(),
            Err(e) => Err(e),
        };

        self.finish();
        info!(
            "Recorder loop finished after {:.1}s",
            started.elapsed().as_secs_f64()
        );
        drained
    }

    fn capture(&mut self, signals: &LoopSignals) -> Result<()> {
        while !signals.running.is_cancelled() && !signals.abort.is_cancelled() {
            self.video.process(&mut self.clock)?;
            self.audio.process(&mut self.clock)?;
        }
        Ok(())
    }

    /// Stop the source, encode what it still holds and flush both encoders
    fn drain(&mut self) -> Result<()> {
        self.audio.stop_source()?;

        let mut reads = 0;
        while reads < self.max_drain_reads && self.audio.process(&mut self.clock)? > 0 {
            reads += 1;
        }
        if reads == self.max_drain_reads {
            warn!("Audio source still delivering after {} reads", reads);
        }

        let audio = self.audio.flush(&mut self.clock)?;
        let video = self.video.flush(&mut self.clock)?;
        info!("Flushed {} audio and {} video packets", audio, video);
        Ok(())
    }

    /// Session teardown; runs on every exit path
    fn finish(&mut self) {
        if let Err(e) = self.audio.stop_source() {
            error!("Failed to stop audio source: {}", e);
        }
        self.video.release_surface();
        self.clock.reset();
        self.audio.reset_session();
        self.state.transition(RecorderState::Idle);
    }
}

/// Per-session cancellation signals
#[derive(Clone, Default)]
pub struct LoopSignals {
    /// Cancelled by `stop`
    pub running: CancellationToken,
    /// Cancelled by the writer when it can no longer write
    pub abort: CancellationToken,
    /// Cancelled by this loop once every packet of the session is queued
    pub writer_active: CancellationToken,
}

/// Session runner executed on the recorder thread
pub struct RecorderLoop {
    engine: CaptureEngine,
    signals: LoopSignals,
}

impl RecorderLoop {
    pub fn new(engine: CaptureEngine, signals: LoopSignals) -> Self {
        Self { engine, signals }
    }
}

impl PipelineStage for RecorderLoop {
    /// The engine comes back for the next session together with the outcome
    type Output = (CaptureEngine, Result<()>);

    fn run(self) -> Self::Output {
        let RecorderLoop {
            mut engine,
            signals,
        } = self;

        let result = engine.record(&signals);
        if let Err(e) = &result {
            error!("Recording failed: {}", e);
        }
        signals.writer_active.cancel();
        (engine, result)
    }

    fn name(&self) -> &'static str {
        "recorder-thread"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExhaustionPolicy, RecorderConfig};
    use crate::error::RecorderError;
    use crate::mock::{MockAudioEncoder, MockAudioSource, MockVideoEncoder};
    use crate::pipeline::exchange::PacketExchange;
    use crate::pipeline::health::PipelineHealth;
    use crate::pipeline::pool::PacketPool;
    use crate::pipeline::queue::ReadyQueue;
    use crate::pipeline::session::SessionFlags;
    use crate::pipeline::stage::spawn_stage;
    use std::thread;
    use std::time::Duration;

    fn engine(
        source: MockAudioSource,
        audio: MockAudioEncoder,
        video: MockVideoEncoder,
    ) -> (CaptureEngine, Arc<ReadyQueue>, Arc<StateCell>) {
        let config = RecorderConfig::default();
        let ready = Arc::new(ReadyQueue::new());
        let state = Arc::new(StateCell::new());
        let exchange = PacketExchange::new(
            Arc::new(PacketPool::new(64)),
            ready.clone(),
            Arc::new(PipelineHealth::new()),
            ExhaustionPolicy::StealOldest,
        );
        let flags = Arc::new(SessionFlags::new());

        let audio = AudioWorker::new(Box::new(source), Box::new(audio), exchange.clone(), &config);
        let video = VideoWorker::new(Box::new(video), exchange, flags, 16);
        let engine = CaptureEngine::new(audio, video, SessionClock::new(0), state.clone(), 16);
        (engine, ready, state)
    }

    #[test]
    fn test_loop_drains_and_resets_on_stop() {
        let source = MockAudioSource::endless(1_000, 1, 10, Duration::from_millis(2));
        let video = MockVideoEncoder::endless(33_000);
        let probe = video.probe();
        let (mut engine, ready, state) = engine(source, MockAudioEncoder::new(10, 1), video);

        engine.audio.start_source().unwrap();
        state.transition(RecorderState::Recording {
            started_at: Instant::now(),
        });

        let signals = LoopSignals::default();
        let handle = spawn_stage(RecorderLoop::new(engine, signals.clone())).unwrap();
        thread::sleep(Duration::from_millis(30));
        signals.running.cancel();

        let (engine, result) = handle.join().unwrap();
        assert!(result.is_ok());
        assert!(signals.writer_active.is_cancelled());
        assert!(state.get().is_idle());
        assert!(engine.clock.is_reset());
        assert!(!engine.audio.is_source_started());
        assert!(probe.end_of_input());
        assert!(probe.surface_released());

        let (audio, video): (Vec<_>, Vec<_>) = std::iter::from_fn(|| ready.pop())
            .partition(|p| p.kind == crate::pipeline::types::MediaKind::Audio);
        assert!(!audio.is_empty());
        assert!(!video.is_empty());
        assert!(audio.iter().all(|p| p.complete));
    }

    #[test]
    fn test_encoder_error_still_cleans_up() {
        let source = MockAudioSource::endless(1_000, 1, 10, Duration::from_millis(1));
        let video = MockVideoEncoder::endless(33_000);
        let probe = video.probe();
        let audio = MockAudioEncoder::new(10, 0).failing_after(3);
        let (mut engine, _ready, state) = engine(source, audio, video);

        engine.audio.start_source().unwrap();
        state.transition(RecorderState::Recording {
            started_at: Instant::now(),
        });

        let signals = LoopSignals::default();
        let (engine, result) = RecorderLoop::new(engine, signals.clone()).run();

        assert!(matches!(result, Err(RecorderError::Encoder { .. })));
        assert!(state.get().is_idle());
        assert!(engine.clock.is_reset());
        assert!(probe.surface_released());
        // No flush after a failure
        assert!(!probe.end_of_input());
        assert!(signals.writer_active.is_cancelled());
    }

    #[test]
    fn test_writer_abort_stops_capture() {
        let source = MockAudioSource::endless(1_000, 1, 10, Duration::from_millis(1));
        let video = MockVideoEncoder::endless(33_000);
        let probe = video.probe();
        let (engine, _ready, _state) = engine(source, MockAudioEncoder::new(10, 0), video);

        let signals = LoopSignals::default();
        signals.abort.cancel();
        let (_engine, result) = RecorderLoop::new(engine, signals).run();

        assert!(result.is_ok());
        assert!(!probe.end_of_input());
    }
}
