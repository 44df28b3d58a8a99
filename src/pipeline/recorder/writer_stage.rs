//! Container writer loop
//!
//! Owns the sink for the lifetime of one output. Writes the header once the
//! video codec configuration is known, then packets in ready-queue order.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::media::{ContainerOptions, ContainerSink, Destination, StreamLayout};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::pool::PacketPool;
use crate::pipeline::queue::ReadyQueue;
use crate::pipeline::session::SessionFlags;
use crate::pipeline::stage::PipelineStage;

/// Notifications from the writer thread to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterEvent {
    /// Outcome of opening the output
    Opened(bool),
    /// The writer loop has exited and released the output
    Finished,
}

/// What happened to one output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub header_written: bool,
    pub trailer_written: bool,
    pub packets_written: u64,
    /// Stopped by `cancel_connection` rather than a graceful stop
    pub interrupted: bool,
    /// Finalized by the shutdown timeout with packets still queued
    pub truncated: bool,
    /// Packets returned to the pool unwritten
    pub discarded: usize,
}

/// Shared pipeline state the writer reads from
pub struct WriterContext {
    pub pool: Arc<PacketPool>,
    pub ready: Arc<ReadyQueue>,
    pub flags: Arc<SessionFlags>,
    pub health: Arc<PipelineHealth>,
    pub poll_interval: Duration,
}

/// Signals controlling the writer loop
#[derive(Clone, Default)]
pub struct WriterSignals {
    /// Cancelled once all packets of the session are queued; finish gracefully
    pub active: CancellationToken,
    /// Cancelled to leave immediately without a trailer
    pub interrupt: CancellationToken,
    /// Cancelled to stop writing packets and finalize the output right away
    pub finalize: CancellationToken,
    /// Cancelled by the writer on failure or interrupt so capture stops
    pub abort: CancellationToken,
}

pub struct ContainerWriter {
    sink: Box<dyn ContainerSink>,
    destination: Destination,
    layout: StreamLayout,
    context: WriterContext,
    signals: WriterSignals,
    events: SyncSender<WriterEvent>,
    report: WriterReport,
}

impl ContainerWriter {
    pub fn new(
        sink: Box<dyn ContainerSink>,
        destination: Destination,
        layout: StreamLayout,
        context: WriterContext,
        signals: WriterSignals,
        events: SyncSender<WriterEvent>,
    ) -> Self {
        Self {
            sink,
            destination,
            layout,
            context,
            signals,
            events,
            report: WriterReport::default(),
        }
    }

    fn open(&mut self) -> Result<()> {
        let format = self.destination.container_format();
        let options = ContainerOptions::for_format(format);
        self.sink
            .open(&self.destination, format, &options, &self.layout)?;
        info!("Opened {} output {}", format, self.destination);
        Ok(())
    }

    fn write_loop(&mut self) -> Result<()> {
        let poll = self.context.poll_interval;

        loop {
            if self.signals.interrupt.is_cancelled() {
                warn!("Container writer interrupted");
                self.report.interrupted = true;
                self.signals.abort.cancel();
                return Ok(());
            }
            if self.signals.finalize.is_cancelled() {
                warn!("Container writer finalizing with a backlog");
                self.report.truncated = true;
                return Ok(());
            }

            // Read before polling: anything queued ahead of the cancel is still seen
            let finishing = self.signals.active.is_cancelled();

            if !self.report.header_written {
                match self.context.flags.codec_config.wait_timeout(poll) {
                    Some(config) => {
                        self.sink.write_header(&config)?;
                        self.report.header_written = true;
                        self.context.flags.mark_header_written();
                        info!("Container header written");
                    }
                    None if finishing => {
                        warn!("Session ended before any video configuration arrived");
                        return Ok(());
                    }
                    None => {}
                }
                continue;
            }

            match self.context.ready.pop_timeout(poll) {
                Some(packet) => {
                    let written = self.sink.write_packet(&packet);
                    let size = packet.size();
                    self.context.pool.release(packet);
                    written?;
                    self.context.health.record_written(size);
                    self.report.packets_written += 1;
                }
                None if finishing => return Ok(()),
                None => {}
            }
        }
    }

    /// Trailer unless interrupted or failed, then hand everything unwritten back
    fn finish(&mut self, failed: bool) -> Result<()> {
        let graceful = self.report.header_written && !self.report.interrupted && !failed;
        let trailer = if graceful {
            self.sink.write_trailer()
        } else {
            Ok(())
        };
        if graceful && trailer.is_ok() {
            self.report.trailer_written = true;
            info!("Container trailer written");
        }

        let discarded = self.context.ready.drain_into(&self.context.pool);
        if discarded > 0 {
            debug!("Returned {} unwritten packets to the pool", discarded);
            self.context.health.record_discarded(discarded);
        }
        self.report.discarded = discarded;

        let closed = self.sink.close(false);
        trailer.and(closed)
    }
}

impl PipelineStage for ContainerWriter {
    /// The sink comes back for the next output together with the outcome
    type Output = (Box<dyn ContainerSink>, Result<WriterReport>);

    fn run(mut self) -> Self::Output {
        let opened = self.open();
        let _ = self.events.send(WriterEvent::Opened(opened.is_ok()));
        if let Err(e) = opened {
            error!("Failed to open {}: {}", self.destination, e);
            return (self.sink, Err(e));
        }

        let written = self.write_loop();
        if let Err(e) = &written {
            error!("Container write failed: {}", e);
            self.signals.abort.cancel();
        }
        let finished = self.finish(written.is_err());
        let _ = self.events.send(WriterEvent::Finished);

        let result = written.and(finished).map(|_| self.report.clone());
        (self.sink, result)
    }

    fn name(&self) -> &'static str {
        "container-thread"
    }
}
