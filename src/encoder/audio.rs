use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder as FfAudioEncoder, AudioFrameMut, ChannelLayout};
use ac_ffmpeg::codec::{CodecParameters, Encoder};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use std::collections::VecDeque;

use crate::config::AudioConfig;
use crate::error::{RecorderError, Result};
use crate::media::AudioEncoder;
use crate::pipeline::types::{MediaKind, NO_PTS, Packet, SampleBuffer, SampleFormat};

/// Fallback frame size for codecs that accept any (FLAC)
const DEFAULT_FRAME_SIZE: usize = 1024;

fn micros() -> TimeBase {
    TimeBase::new(1, 1_000_000)
}

struct Encoded {
    pts: i64,
    dts: i64,
    data: Vec<u8>,
}

/// FLAC/AAC encoder fed from interleaved 16 bit PCM
///
/// Input is staged until one codec frame is full. Output units are queued and
/// handed out one per `encode` call. After a flush the FFmpeg encoder is
/// rebuilt lazily for the next session.
pub struct FfmpegAudioEncoder {
    config: AudioConfig,
    encoder: Option<FfAudioEncoder>,
    frame_size: usize,
    staged: Vec<i16>,
    staged_pts: i64,
    output: VecDeque<Encoded>,
}

// The encoder is only touched from the recorder thread.
unsafe impl Send for FfmpegAudioEncoder {}

impl FfmpegAudioEncoder {
    pub fn new(config: AudioConfig) -> Result<Self> {
        let encoder = Self::build(&config)?;
        let frame_size = encoder.samples_per_frame().unwrap_or(DEFAULT_FRAME_SIZE);
        log::info!(
            "Using audio encoder: {} ({} Hz, {} channels, {} samples per frame)",
            config.codec.encoder_name(),
            config.sample_rate,
            config.channels,
            frame_size
        );

        Ok(Self {
            config,
            encoder: Some(encoder),
            frame_size,
            staged: Vec::with_capacity(frame_size * 2),
            staged_pts: 0,
            output: VecDeque::new(),
        })
    }

    fn build(config: &AudioConfig) -> Result<FfAudioEncoder> {
        let channel_layout = ChannelLayout::from_channels(config.channels as u32).ok_or_else(|| {
            RecorderError::encoder(
                MediaKind::Audio,
                format!("no channel layout for {} channels", config.channels),
            )
        })?;
        let sample_format = match config.sample_format {
            SampleFormat::S16 => "s16",
            SampleFormat::Fltp => "fltp",
        };

        FfAudioEncoder::builder(config.codec.encoder_name())
            .and_then(|builder| {
                builder
                    .sample_rate(config.sample_rate)
                    .channel_layout(channel_layout)
                    .sample_format(get_sample_format(sample_format))
                    .bit_rate(config.bit_rate as u64)
                    .time_base(micros())
                    .build()
            })
            .map_err(|e| RecorderError::encoder(MediaKind::Audio, e.to_string()))
    }

    /// Stream parameters for the muxer
    pub fn codec_parameters(&self) -> Option<CodecParameters> {
        self.encoder.as_ref().map(|e| e.codec_parameters().into())
    }

    fn encoder(&mut self) -> Result<&mut FfAudioEncoder> {
        if self.encoder.is_none() {
            self.encoder = Some(Self::build(&self.config)?);
        }
        self.encoder
            .as_mut()
            .ok_or_else(|| RecorderError::encoder(MediaKind::Audio, "encoder unavailable"))
    }

    fn channels(&self) -> usize {
        self.config.channels.max(1) as usize
    }

    /// Encode the staged samples as one frame, padding with silence
    fn push_staged(&mut self) -> Result<()> {
        let channels = self.channels();
        let frame_size = self.frame_size;
        let pts = self.staged_pts;
        let format = self.config.sample_format;
        let staged = std::mem::take(&mut self.staged);

        let encoder = self.encoder()?;
        let params = encoder.codec_parameters();
        let mut frame = AudioFrameMut::silence(
            params.channel_layout(),
            params.sample_format(),
            params.sample_rate(),
            frame_size,
        )
        .with_pts(Timestamp::new(pts, micros()));

        let mut planes = frame.planes_mut();
        match format {
            SampleFormat::S16 => {
                let data = planes[0].data_mut();
                for (dst, sample) in data.chunks_exact_mut(2).zip(&staged) {
                    dst.copy_from_slice(&sample.to_ne_bytes());
                }
            }
            SampleFormat::Fltp => {
                for (channel, plane) in planes.iter_mut().enumerate().take(channels) {
                    let data = plane.data_mut();
                    let samples = staged.iter().skip(channel).step_by(channels);
                    for (dst, sample) in data.chunks_exact_mut(4).zip(samples) {
                        let value = *sample as f32 / 32768.0;
                        dst.copy_from_slice(&value.to_ne_bytes());
                    }
                }
            }
        }
        drop(planes);

        encoder
            .push(frame.freeze())
            .map_err(|e| RecorderError::encoder(MediaKind::Audio, e.to_string()))?;

        self.staged = staged;
        self.staged.clear();
        self.collect()
    }

    fn collect(&mut self) -> Result<()> {
        let encoder = self.encoder()?;
        let mut ready = Vec::new();
        while let Some(packet) = encoder
            .take()
            .map_err(|e| RecorderError::encoder(MediaKind::Audio, e.to_string()))?
        {
            ready.push(Encoded {
                pts: packet.pts().as_micros().unwrap_or(NO_PTS),
                dts: packet.dts().as_micros().unwrap_or(NO_PTS),
                data: packet.data().to_vec(),
            });
        }
        self.output.extend(ready);
        Ok(())
    }

    fn emit(&mut self, out: &mut Packet) {
        if let Some(unit) = self.output.pop_front() {
            out.fill(MediaKind::Audio, unit.pts, unit.dts, &unit.data);
        }
    }
}

impl AudioEncoder for FfmpegAudioEncoder {
    fn encode(
        &mut self,
        out: &mut Packet,
        input: Option<&SampleBuffer>,
        position: usize,
    ) -> Result<usize> {
        let Some(samples) = input else {
            if self.encoder.is_some() {
                if !self.staged.is_empty() {
                    self.push_staged()?;
                }
                self.encoder()?
                    .flush()
                    .map_err(|e| RecorderError::encoder(MediaKind::Audio, e.to_string()))?;
                self.collect()?;
                // A flushed encoder takes no more input
                self.encoder = None;
            }
            self.emit(out);
            return Ok(0);
        };

        let channels = self.channels();
        let available = samples.num_frames().saturating_sub(position);
        let room = self.frame_size - self.staged.len() / channels;
        let used = available.min(room);

        if self.staged.is_empty() {
            self.staged_pts =
                samples.pts + position as i64 * 1_000_000 / samples.sample_rate.max(1) as i64;
        }
        let start = position * channels;
        self.staged
            .extend_from_slice(&samples.samples()[start..start + used * channels]);

        if self.staged.len() / channels == self.frame_size {
            self.push_staged()?;
        }
        self.emit(out);
        Ok(used)
    }
}
