//! Scripted collaborators for the pipeline tests

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{ContainerOp, RecorderError, Result};
use crate::media::{
    AudioEncoder, AudioSource, ContainerFormat, ContainerOptions, ContainerSink, Destination,
    StreamLayout, VideoEncoder,
};
use crate::pipeline::types::{MediaKind, NO_PTS, Packet, SampleBuffer};

/// Payload of the first unit every mock video session produces
pub const CODEC_CONFIG: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, 0, 0, 0, 1, 0x68];

pub struct MockAudioSource {
    sample_rate: u32,
    channels: u16,
    script: VecDeque<usize>,
    endless: Option<(usize, Duration)>,
    started: bool,
    next_sample: i16,
}

impl MockAudioSource {
    /// Source that yields the given chunk sizes, then nothing
    pub fn new(sample_rate: u32, channels: u16, chunks: Vec<usize>) -> Self {
        Self {
            sample_rate,
            channels,
            script: chunks.into(),
            endless: None,
            started: false,
            next_sample: 0,
        }
    }

    /// Source that yields `chunk` samples every `delay` while started
    pub fn endless(sample_rate: u32, channels: u16, chunk: usize, delay: Duration) -> Self {
        Self {
            endless: Some((chunk, delay)),
            ..Self::new(sample_rate, channels, Vec::new())
        }
    }

    fn fill(&mut self, buffer: &mut [i16], len: usize) -> usize {
        let len = len.min(buffer.len());
        for sample in &mut buffer[..len] {
            *sample = self.next_sample;
            self.next_sample = self.next_sample.wrapping_add(1);
        }
        len
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if let Some(len) = self.script.pop_front() {
            return Ok(self.fill(buffer, len));
        }
        match self.endless {
            Some((chunk, delay)) if self.started => {
                thread::sleep(delay);
                Ok(self.fill(buffer, chunk))
            }
            _ => Ok(0),
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// Audio encoder emitting one packet per `frames_per_packet` input frames,
/// held back by `latency` packets
pub struct MockAudioEncoder {
    frames_per_packet: usize,
    latency: usize,
    pending: VecDeque<i64>,
    fail_after: Option<usize>,
    calls: usize,
}

impl MockAudioEncoder {
    pub fn new(frames_per_packet: usize, latency: usize) -> Self {
        Self {
            frames_per_packet,
            latency,
            pending: VecDeque::new(),
            fail_after: None,
            calls: 0,
        }
    }

    /// Fail every call after the first `calls` ones
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    fn emit(out: &mut Packet, pts: i64) {
        out.fill(MediaKind::Audio, pts, NO_PTS, b"audio");
    }
}

impl AudioEncoder for MockAudioEncoder {
    fn encode(
        &mut self,
        out: &mut Packet,
        input: Option<&SampleBuffer>,
        position: usize,
    ) -> Result<usize> {
        if self.fail_after.is_some_and(|limit| self.calls >= limit) {
            return Err(RecorderError::encoder(MediaKind::Audio, "scripted failure"));
        }
        self.calls += 1;

        let Some(samples) = input else {
            if let Some(pts) = self.pending.pop_front() {
                Self::emit(out, pts);
            }
            return Ok(0);
        };

        let used = samples
            .num_frames()
            .saturating_sub(position)
            .min(self.frames_per_packet);
        let offset = position as i64 * 1_000_000 / samples.sample_rate as i64;
        self.pending.push_back(samples.pts + offset);
        if self.pending.len() > self.latency {
            if let Some(pts) = self.pending.pop_front() {
                Self::emit(out, pts);
            }
        }
        Ok(used)
    }
}

#[derive(Debug, Default)]
struct VideoProbeState {
    codec_config: Option<Vec<u8>>,
    end_of_input: bool,
    surface_released: bool,
}

/// Observations of a mock video encoder after it moved into a worker
#[derive(Debug, Clone, Default)]
pub struct VideoProbe(Arc<Mutex<VideoProbeState>>);

impl VideoProbe {
    pub fn codec_config(&self) -> Option<Vec<u8>> {
        self.0.lock().codec_config.clone()
    }

    pub fn end_of_input(&self) -> bool {
        self.0.lock().end_of_input
    }

    pub fn surface_released(&self) -> bool {
        self.0.lock().surface_released
    }
}

/// Video encoder replaying scripted pts (`None` = no output this call) or,
/// in endless mode, one unit per call
pub struct MockVideoEncoder {
    script: VecDeque<Option<i64>>,
    buffered: VecDeque<i64>,
    interval: Option<i64>,
    next_pts: i64,
    session_first: bool,
    draining: bool,
    probe: VideoProbe,
}

impl MockVideoEncoder {
    pub fn new(script: Vec<Option<i64>>) -> Self {
        Self {
            script: script.into(),
            buffered: VecDeque::new(),
            interval: None,
            next_pts: 0,
            session_first: true,
            draining: false,
            probe: VideoProbe::default(),
        }
    }

    pub fn endless(interval: i64) -> Self {
        Self {
            interval: Some(interval),
            ..Self::new(Vec::new())
        }
    }

    /// Units only released after end of input
    pub fn buffered(mut self, pts: Vec<i64>) -> Self {
        self.buffered = pts.into();
        self
    }

    pub fn probe(&self) -> VideoProbe {
        self.probe.clone()
    }

    fn emit(&mut self, out: &mut Packet, pts: i64) {
        let payload: &[u8] = if self.session_first {
            CODEC_CONFIG
        } else {
            b"frame"
        };
        out.fill(MediaKind::Video, pts, pts, payload);
        out.keyframe = self.session_first;
        self.session_first = false;
    }
}

impl VideoEncoder for MockVideoEncoder {
    fn encode(&mut self, out: &mut Packet) -> Result<()> {
        if self.draining {
            if let Some(pts) = self.buffered.pop_front() {
                self.emit(out, pts);
            }
            return Ok(());
        }

        if let Some(interval) = self.interval {
            let pts = self.next_pts;
            self.next_pts += interval;
            self.emit(out, pts);
            return Ok(());
        }

        if let Some(Some(pts)) = self.script.pop_front() {
            self.emit(out, pts);
        }
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        self.draining = true;
        self.probe.0.lock().end_of_input = true;
        Ok(())
    }

    fn set_codec_config(&mut self, config: &[u8]) {
        self.probe.0.lock().codec_config = Some(config.to_vec());
    }

    fn release_surface(&mut self) {
        self.probe.0.lock().surface_released = true;
        self.draining = false;
        self.session_first = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Open,
    Header(Vec<u8>),
    Packet(MediaKind, i64),
    Trailer,
    Close,
}

/// Call log shared with a [`MockSink`]
#[derive(Debug, Clone, Default)]
pub struct SinkCalls(Arc<Mutex<Vec<SinkCall>>>);

impl SinkCalls {
    pub fn snapshot(&self) -> Vec<SinkCall> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    fn push(&self, call: SinkCall) {
        self.0.lock().push(call);
    }
}

pub struct MockSink {
    calls: SinkCalls,
    fail: Option<ContainerOp>,
    write_delay: Option<Duration>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            calls: SinkCalls::default(),
            fail: None,
            write_delay: None,
        }
    }

    /// Every packet write takes at least `delay`
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Every call of the given operation fails
    pub fn failing(mut self, op: ContainerOp) -> Self {
        self.fail = Some(op);
        self
    }

    pub fn calls(&self) -> SinkCalls {
        self.calls.clone()
    }

    fn check(&self, op: ContainerOp) -> Result<()> {
        if self.fail == Some(op) {
            return Err(RecorderError::container(op, "scripted failure"));
        }
        Ok(())
    }
}

impl ContainerSink for MockSink {
    fn open(
        &mut self,
        _destination: &Destination,
        _format: ContainerFormat,
        _options: &ContainerOptions,
        _layout: &StreamLayout,
    ) -> Result<()> {
        self.check(ContainerOp::Open)?;
        self.calls.push(SinkCall::Open);
        Ok(())
    }

    fn write_header(&mut self, codec_config: &[u8]) -> Result<()> {
        self.check(ContainerOp::WriteHeader)?;
        self.calls.push(SinkCall::Header(codec_config.to_vec()));
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.check(ContainerOp::WritePacket)?;
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
        self.calls.push(SinkCall::Packet(packet.kind, packet.pts));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.check(ContainerOp::WriteTrailer)?;
        self.calls.push(SinkCall::Trailer);
        Ok(())
    }

    fn close(&mut self, _write_trailer: bool) -> Result<()> {
        self.check(ContainerOp::Close)?;
        self.calls.push(SinkCall::Close);
        Ok(())
    }
}
