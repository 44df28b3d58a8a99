//! FFmpeg container backend

mod ffmpeg;

pub use ffmpeg::FfmpegMuxer;
