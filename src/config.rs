use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RecorderError, Result};
use crate::media::ContainerFormat;
use crate::pipeline::pool::DEFAULT_POOL_CAPACITY;
use crate::pipeline::types::SampleFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Flac,
    Aac,
}

impl AudioCodec {
    /// FFmpeg encoder name
    pub fn encoder_name(&self) -> &'static str {
        match self {
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "aac",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Flac,
            sample_rate: 44_100,
            bit_rate: 192_000,
            channels: 1,
            sample_format: SampleFormat::S16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub frame_rate: u32,
    /// Pictures per group of pictures
    pub gop: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: 720,
            height: 1280,
            bit_rate: 8_192_000,
            frame_rate: 30,
            gop: 60,
        }
    }
}

/// What a producer does when the packet pool is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Take the oldest packet waiting in the ready queue; its content is lost
    StealOldest,
    /// Skip the encode call; the newest input is lost
    DropNewest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub pool_capacity: usize,
    /// Interleaved samples read from the audio source per call
    pub chunk_samples: usize,
    pub writer_poll_interval_ms: u64,
    /// How long `stop` waits for the writer before finalizing it early
    pub shutdown_timeout_ms: u64,
    /// Upper bound on packets drained from one encoder during a flush
    pub max_flush_packets: usize,
    pub exhaustion_policy: ExhaustionPolicy,
    pub session_start_pts: i64,
}

impl PipelineConfig {
    pub fn writer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.writer_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            chunk_samples: 1024,
            writer_poll_interval_ms: 10,
            shutdown_timeout_ms: 200,
            max_flush_packets: 4096,
            exhaustion_policy: ExhaustionPolicy::StealOldest,
            session_start_pts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub pipeline: PipelineConfig,
    /// Directory for generated output files
    pub output_dir: PathBuf,
}

impl RecorderConfig {
    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.pool_capacity == 0 {
            return Err(RecorderError::Config("pool capacity must be positive".into()));
        }
        if self.pipeline.chunk_samples == 0 {
            return Err(RecorderError::Config("chunk size must be positive".into()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(RecorderError::Config(format!(
                "unsupported audio layout: {} Hz, {} channels",
                self.audio.sample_rate, self.audio.channels
            )));
        }
        if self.pipeline.chunk_samples < self.audio.channels as usize {
            return Err(RecorderError::Config(format!(
                "chunk of {} samples is smaller than one {} channel frame",
                self.pipeline.chunk_samples, self.audio.channels
            )));
        }
        if self.video.width == 0 || self.video.height == 0 || self.video.frame_rate == 0 {
            return Err(RecorderError::Config("video dimensions must be positive".into()));
        }
        Ok(())
    }

    /// Settings adjusted for the container the output will be muxed into.
    ///
    /// Live streams (MPEG-TS) switch to AAC with planar float samples and a
    /// lower video bit rate.
    pub fn for_container(&self, format: ContainerFormat) -> Self {
        let mut config = self.clone();
        if format == ContainerFormat::MpegTs {
            config.audio.codec = AudioCodec::Aac;
            config.audio.sample_format = SampleFormat::Fltp;
            config.video.bit_rate = 1_024_000;
        }
        config
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            pipeline: PipelineConfig::default(),
            output_dir: PathBuf::from("mix-recorder"),
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.audio.codec, AudioCodec::Flac);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.video.bit_rate, 8_192_000);
        assert_eq!(config.pipeline.pool_capacity, 2000);
        assert_eq!(config.pipeline.shutdown_timeout(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"audio": {{"sampleRate": 48000}}, "pipeline": {{"exhaustionPolicy": "drop-newest"}}}}"#
        )
        .unwrap();

        let config = RecorderConfig::load(file.path()).unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.pipeline.exhaustion_policy, ExhaustionPolicy::DropNewest);
        assert_eq!(config.video, VideoConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RecorderConfig::default();
        config.pipeline.pool_capacity = 0;
        assert!(matches!(config.validate(), Err(RecorderError::Config(_))));

        let mut config = RecorderConfig::default();
        config.audio.channels = 6;
        config.pipeline.chunk_samples = 4;
        assert!(matches!(config.validate(), Err(RecorderError::Config(_))));
        config.pipeline.chunk_samples = 1024;
        assert!(config.validate().is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"audio": {{"channels": 0}}}}"#).unwrap();
        assert!(RecorderConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_stream_container_adjustments() {
        let config = RecorderConfig::default();

        let ts = config.for_container(ContainerFormat::MpegTs);
        assert_eq!(ts.audio.codec, AudioCodec::Aac);
        assert_eq!(ts.audio.sample_format, SampleFormat::Fltp);
        assert_eq!(ts.video.bit_rate, 1_024_000);

        let mp4 = config.for_container(ContainerFormat::Mp4);
        assert_eq!(mp4, config);
    }
}
