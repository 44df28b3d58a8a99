//! FFmpeg codec backends

mod audio;
mod video;

pub use audio::FfmpegAudioEncoder;
pub use video::{FfmpegVideoEncoder, SurfaceFrame, VideoSurface};
