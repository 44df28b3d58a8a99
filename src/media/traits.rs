//! Collaborator interfaces consumed by the recording core
//!
//! Capture devices, codecs and the container byte layout live behind these
//! traits. The core only moves packets and timestamps between them.

use crate::config::{AudioConfig, VideoConfig};
use crate::error::Result;
use crate::pipeline::types::{Packet, SampleBuffer};

use super::destination::{ContainerFormat, ContainerOptions, Destination};

/// Live PCM source (microphone)
pub trait AudioSource: Send {
    /// Begin delivering samples
    fn start(&mut self) -> Result<()>;

    /// Read up to `buffer.len()` interleaved signed 16 bit samples.
    ///
    /// Blocks until data is available while started. Returns `Ok(0)` once
    /// stopped and drained.
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize>;

    /// Stop delivering new samples; already buffered ones stay readable
    fn stop(&mut self) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

/// Audio encoder driven one packet at a time
pub trait AudioEncoder: Send {
    /// Encode samples of `input` starting at sample frame `position`.
    ///
    /// Returns how many sample frames were consumed. `out.complete` tells
    /// whether a full encoded unit was produced by this call. `None` as input
    /// asks the encoder to emit buffered output (flush).
    fn encode(
        &mut self,
        out: &mut Packet,
        input: Option<&SampleBuffer>,
        position: usize,
    ) -> Result<usize>;
}

/// Video encoder fed by an externally written surface
pub trait VideoEncoder: Send {
    /// Collect at most one encoded unit into `out`
    fn encode(&mut self, out: &mut Packet) -> Result<()>;

    /// No more frames will reach the surface; remaining output is flushed
    /// through further `encode` calls.
    fn signal_end_of_input(&mut self) -> Result<()>;

    /// Store out-of-band codec configuration (SPS/PPS) on the encoder
    fn set_codec_config(&mut self, config: &[u8]);

    /// Release the input surface at the end of a session
    fn release_surface(&mut self);
}

/// Description of the two tracks an output carries
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLayout {
    pub audio: AudioConfig,
    pub video: VideoConfig,
}

/// Container writer backend
pub trait ContainerSink: Send {
    fn open(
        &mut self,
        destination: &Destination,
        format: ContainerFormat,
        options: &ContainerOptions,
        layout: &StreamLayout,
    ) -> Result<()>;

    /// Write the header; `codec_config` is the captured video configuration
    fn write_header(&mut self, codec_config: &[u8]) -> Result<()>;

    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;

    /// Release the output. With `write_trailer` set a backend that has not
    /// written its trailer yet does so first.
    fn close(&mut self, write_trailer: bool) -> Result<()>;
}
