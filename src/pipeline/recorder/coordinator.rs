//! Recorder coordinator
//!
//! Wires the packet pool, both encode workers and the container writer
//! together and drives them through open → start → stop.

use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, sync_channel};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::media::{
    AudioEncoder, AudioSource, ContainerSink, Destination, StreamLayout, VideoEncoder,
};
use crate::pipeline::clock::SessionClock;
use crate::pipeline::exchange::PacketExchange;
use crate::pipeline::health::{HealthSummary, PipelineHealth};
use crate::pipeline::pool::PacketPool;
use crate::pipeline::queue::ReadyQueue;
use crate::pipeline::session::SessionFlags;
use crate::pipeline::stage::spawn_stage;
use crate::pipeline::state::{RecorderState, StateCell};

use super::audio_stage::AudioWorker;
use super::capture_loop::{CaptureEngine, LoopSignals, RecorderLoop};
use super::video_stage::VideoWorker;
use super::writer_stage::{
    ContainerWriter, WriterContext, WriterEvent, WriterReport, WriterSignals,
};

/// Platform collaborators a recorder is built from
pub struct RecorderParts {
    pub audio_source: Box<dyn AudioSource>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub video_encoder: Box<dyn VideoEncoder>,
    pub sink: Box<dyn ContainerSink>,
}

/// Outcome of one recording
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub destination: Destination,
    pub writer: WriterReport,
    pub health: HealthSummary,
}

type WriterOutput = (Box<dyn ContainerSink>, Result<WriterReport>);
type CaptureOutput = (CaptureEngine, Result<()>);

struct WriterHandle {
    handle: JoinHandle<WriterOutput>,
    events: Receiver<WriterEvent>,
    signals: WriterSignals,
    destination: Destination,
}

struct CaptureHandle {
    handle: JoinHandle<CaptureOutput>,
    running: CancellationToken,
}

/// Records one microphone and one encoder surface into a container
///
/// Each recorder owns its recorder and container threads. The packet pool
/// may be shared between recorders through [`MediaRecorder::with_pool`].
pub struct MediaRecorder {
    config: RecorderConfig,
    pool: Arc<PacketPool>,
    ready: Arc<ReadyQueue>,
    health: Arc<PipelineHealth>,
    flags: Arc<SessionFlags>,
    state: Arc<StateCell>,

    /// Present while idle; lent to the recorder thread while recording
    engine: Option<CaptureEngine>,
    /// Present while no output is open; lent to the container thread otherwise
    sink: Option<Box<dyn ContainerSink>>,

    writer: Option<WriterHandle>,
    capture: Option<CaptureHandle>,
}

impl MediaRecorder {
    pub fn new(config: RecorderConfig, parts: RecorderParts) -> Result<Self> {
        let pool = Arc::new(PacketPool::new(config.pipeline.pool_capacity));
        Self::with_pool(config, parts, pool)
    }

    /// Build a recorder drawing packets from an existing pool
    pub fn with_pool(
        config: RecorderConfig,
        parts: RecorderParts,
        pool: Arc<PacketPool>,
    ) -> Result<Self> {
        config.validate()?;
        let ready = Arc::new(ReadyQueue::new());
        let health = Arc::new(PipelineHealth::new());
        let flags = Arc::new(SessionFlags::new());
        let state = Arc::new(StateCell::new());

        let exchange = PacketExchange::new(
            pool.clone(),
            ready.clone(),
            health.clone(),
            config.pipeline.exhaustion_policy,
        );
        let audio = AudioWorker::new(
            parts.audio_source,
            parts.audio_encoder,
            exchange.clone(),
            &config,
        );
        let video = VideoWorker::new(
            parts.video_encoder,
            exchange,
            flags.clone(),
            config.pipeline.max_flush_packets,
        );
        let engine = CaptureEngine::new(
            audio,
            video,
            SessionClock::new(config.pipeline.session_start_pts),
            state.clone(),
            config.pipeline.max_flush_packets,
        );

        Ok(Self {
            config,
            pool,
            ready,
            health,
            flags,
            state,
            engine: Some(engine),
            sink: Some(parts.sink),
            writer: None,
            capture: None,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        self.state.get()
    }

    pub fn health(&self) -> HealthSummary {
        self.health.summary()
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    /// Destination of the currently open output
    pub fn destination(&self) -> Option<&Destination> {
        self.writer.as_ref().map(|w| &w.destination)
    }

    pub fn is_output_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Open the output on the container thread.
    ///
    /// Without a destination a timestamped MP4 is created in the configured
    /// output directory. Returns once the open has succeeded or failed.
    pub fn open_output(&mut self, destination: Option<Destination>) -> Result<Destination> {
        if self.writer.is_some() {
            return Err(RecorderError::InvalidState("output already open".into()));
        }

        let destination = match destination {
            Some(destination) => destination,
            None => Destination::timestamped(&self.config.output_dir, Local::now()),
        };
        if let Destination::File(path) = &destination {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| RecorderError::InvalidState("container sink unavailable".into()))?;

        let format = destination.container_format();
        let config = self.config.for_container(format);
        let layout = StreamLayout {
            audio: config.audio,
            video: config.video,
        };
        let context = WriterContext {
            pool: self.pool.clone(),
            ready: self.ready.clone(),
            flags: self.flags.clone(),
            health: self.health.clone(),
            poll_interval: self.config.pipeline.writer_poll_interval(),
        };
        let signals = WriterSignals::default();
        let (events_tx, events) = sync_channel(2);

        let writer = ContainerWriter::new(
            sink,
            destination.clone(),
            layout,
            context,
            signals.clone(),
            events_tx,
        );
        let handle = spawn_stage(writer)?;

        match events.recv() {
            Ok(WriterEvent::Opened(true)) => {
                self.writer = Some(WriterHandle {
                    handle,
                    events,
                    signals,
                    destination: destination.clone(),
                });
                Ok(destination)
            }
            _ => {
                let (sink, result) = join(handle, "container")?;
                self.sink = Some(sink);
                match result {
                    Err(e) => Err(e),
                    Ok(_) => Err(RecorderError::InvalidState(
                        "container writer exited before opening".into(),
                    )),
                }
            }
        }
    }

    /// Start the audio source ahead of `start`. No-op while recording.
    pub fn start_audio_recording(&mut self) -> Result<()> {
        match self.engine.as_mut() {
            Some(engine) => engine.audio.start_source(),
            None => Ok(()),
        }
    }

    /// Begin recording into the open output. No-op while already recording.
    pub fn start(&mut self) -> Result<()> {
        if self.capture.is_some() {
            debug!("Recorder already running");
            return Ok(());
        }
        let Some(writer) = &self.writer else {
            return Err(RecorderError::InvalidState("no output open".into()));
        };

        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| RecorderError::InvalidState("capture engine unavailable".into()))?;
        if let Err(e) = engine.audio.start_source() {
            self.engine = Some(engine);
            return Err(e);
        }

        let signals = LoopSignals {
            running: CancellationToken::new(),
            abort: writer.signals.abort.clone(),
            writer_active: writer.signals.active.clone(),
        };
        self.state.transition(RecorderState::Recording {
            started_at: Instant::now(),
        });

        let handle = match spawn_stage(RecorderLoop::new(engine, signals.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                self.state.transition(RecorderState::Draining);
                self.state.transition(RecorderState::Idle);
                return Err(e);
            }
        };
        info!("Recording to {}", writer.destination);

        self.capture = Some(CaptureHandle {
            handle,
            running: signals.running,
        });
        Ok(())
    }

    /// Stop recording and finalize the output.
    ///
    /// Waits for the recorder thread to drain both encoders, then gives the
    /// writer the configured shutdown timeout. A writer still busy after that
    /// drops its backlog and writes the trailer. Returns `None` when no output
    /// was open.
    pub fn stop(&mut self) -> Result<Option<SessionReport>> {
        let Some(writer) = self.writer.take() else {
            debug!("Recorder not open, nothing to stop");
            return Ok(None);
        };

        let captured = match self.capture.take() {
            Some(capture) => {
                capture.running.cancel();
                let (engine, result) = join(capture.handle, "recorder")?;
                self.engine = Some(engine);
                result
            }
            None => {
                writer.signals.active.cancel();
                Ok(())
            }
        };

        let destination = writer.destination.clone();
        let written = self.close_writer(writer);

        let leftover = self.ready.drain_into(&self.pool);
        if leftover > 0 {
            self.health.record_discarded(leftover);
        }
        self.flags.reset();

        let report = captured.and(written)?;
        let health = self.health.summary();
        info!("Recording finished: {} ({})", destination, health);

        Ok(Some(SessionReport {
            destination,
            writer: report,
            health,
        }))
    }

    /// Interrupt the container writer. No trailer is written and queued
    /// packets go back to the pool.
    pub fn cancel_connection(&self) {
        if let Some(writer) = &self.writer {
            warn!("Cancelling connection to {}", writer.destination);
            writer.signals.interrupt.cancel();
        }
    }

    /// Move the next session on the output timeline. Only while idle.
    pub fn set_session_start(&mut self, pts: i64) -> Result<()> {
        match self.engine.as_mut() {
            Some(engine) => {
                engine.clock.set_session_start(pts);
                Ok(())
            }
            None => Err(RecorderError::InvalidState(
                "cannot move session start while recording".into(),
            )),
        }
    }

    /// Stop any running session and drop the recorder
    pub fn release(mut self) -> Result<()> {
        self.stop()?;
        info!("Recorder released");
        Ok(())
    }

    fn close_writer(&mut self, writer: WriterHandle) -> Result<WriterReport> {
        let timeout = self.config.pipeline.shutdown_timeout();
        match writer.events.recv_timeout(timeout) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Container writer still busy after {}ms, finalizing",
                    timeout.as_millis()
                );
                writer.signals.finalize.cancel();
            }
        }

        let (sink, result) = join(writer.handle, "container")?;
        self.sink = Some(sink);
        result
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        if let Some(capture) = &self.capture {
            capture.running.cancel();
        }
        if let Some(writer) = &self.writer {
            writer.signals.interrupt.cancel();
        }
    }
}

fn join<T>(handle: JoinHandle<T>, thread: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| RecorderError::InvalidState(format!("{} thread panicked", thread)))
}
