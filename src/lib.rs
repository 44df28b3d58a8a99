//! Portable audio/video recording core
//!
//! Encoded packets from a microphone and a camera encoder are rebased onto a
//! single session timeline and muxed into MP4 files or MPEG-TS streams.

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;

#[cfg(feature = "capture")]
pub mod capture;
#[cfg(feature = "ffmpeg")]
pub mod encoder;
#[cfg(feature = "ffmpeg")]
pub mod muxer;

#[cfg(test)]
mod mock;

pub use config::RecorderConfig;
pub use error::{RecorderError, Result};
pub use pipeline::MediaRecorder;
