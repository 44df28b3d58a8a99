use ac_ffmpeg::codec::video::{PixelFormat, VideoEncoder as FfVideoEncoder, VideoFrame, VideoFrameMut};
use ac_ffmpeg::codec::{Encoder, video};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::VideoConfig;
use crate::error::{RecorderError, Result};
use crate::media::{VideoEncoder, h264};
use crate::pipeline::types::{MediaKind, NO_PTS, Packet};

/// Encoder fallback chain: hardware encoders first, then software.
/// No B-frames anywhere: video dts equals pts downstream.
const ENCODER_CHAIN: &[(&str, &[(&str, &str)])] = &[
    (
        "h264_nvenc",
        &[("preset", "p4"), ("rc", "cbr"), ("bf", "0"), ("gpu", "0")],
    ),
    (
        "h264_qsv",
        &[("preset", "medium"), ("bf", "0"), ("async_depth", "4")],
    ),
    (
        "libx264",
        &[
            ("preset", "veryfast"),
            ("profile", "high"),
            ("bframes", "0"),
            ("threads", "0"),
        ],
    ),
];

/// Frames queued on the surface before the oldest is dropped
const SURFACE_DEPTH: usize = 8;

/// Frames kept around for reuse
const CACHED_FRAMES: usize = 4;

fn micros() -> TimeBase {
    TimeBase::new(1, 1_000_000)
}

/// One NV12 picture handed to the surface
pub struct SurfaceFrame {
    /// Capture time in microseconds
    pub pts: i64,
    pub luma: Vec<u8>,
    pub luma_stride: usize,
    pub chroma: Vec<u8>,
    pub chroma_stride: usize,
}

struct SurfaceInner {
    frames: Mutex<VecDeque<SurfaceFrame>>,
    open: AtomicBool,
}

/// Input surface of a [`FfmpegVideoEncoder`]
///
/// Producers on any thread submit frames; the encoder consumes them on the
/// recorder thread. Submissions are refused while no session is running.
#[derive(Clone)]
pub struct VideoSurface {
    inner: Arc<SurfaceInner>,
}

impl VideoSurface {
    fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                frames: Mutex::new(VecDeque::with_capacity(SURFACE_DEPTH)),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Queue a frame. Returns `false` when the surface is released.
    pub fn submit(&self, frame: SurfaceFrame) -> bool {
        if !self.is_open() {
            return false;
        }
        let mut frames = self.inner.frames.lock();
        if frames.len() >= SURFACE_DEPTH {
            frames.pop_front();
            debug!("Video surface full, oldest frame dropped");
        }
        frames.push_back(frame);
        true
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn next(&self) -> Option<SurfaceFrame> {
        self.inner.frames.lock().pop_front()
    }

    fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.frames.lock().clear();
    }

    fn reopen(&self) {
        self.inner.open.store(true, Ordering::Release);
    }
}

/// Reusable encoder input frames
struct FrameCache {
    frames: VecDeque<VideoFrame>,
    w: usize,
    h: usize,
    pixel_format: PixelFormat,
}

impl FrameCache {
    fn new(w: usize, h: usize, pixel_format: PixelFormat) -> Self {
        Self {
            frames: VecDeque::with_capacity(CACHED_FRAMES),
            w,
            h,
            pixel_format,
        }
    }

    fn put(&mut self, frame: VideoFrame) {
        if self.frames.len() < CACHED_FRAMES {
            self.frames.push_back(frame);
        }
    }

    /// A writable frame; cached frames still referenced by the encoder are skipped
    fn take(&mut self) -> VideoFrameMut {
        for _ in 0..self.frames.len() {
            let Some(frame) = self.frames.pop_front() else {
                break;
            };
            match frame.try_into_mut() {
                Ok(frame) => return frame,
                Err(frame) => self.frames.push_back(frame),
            }
        }
        VideoFrameMut::black(self.pixel_format, self.w, self.h).with_time_base(micros())
    }
}

struct Encoded {
    pts: i64,
    keyframe: bool,
    data: Vec<u8>,
}

/// H.264 encoder fed through a [`VideoSurface`]
///
/// The first unit of every session is the SPS/PPS pair taken from the first
/// keyframe. After end of input the FFmpeg encoder is dropped and rebuilt for
/// the next session.
pub struct FfmpegVideoEncoder {
    config: VideoConfig,
    encoder: Option<FfVideoEncoder>,
    surface: VideoSurface,
    cache: FrameCache,
    output: VecDeque<Encoded>,
    w: usize,
    h: usize,
    config_found: bool,
    /// SPS/PPS of the current session
    codec_config: Option<Bytes>,
    draining: bool,
    pub codec_name: String,
}

// Only the recorder thread drives the encoder; the surface is shared separately.
unsafe impl Send for FfmpegVideoEncoder {}

impl FfmpegVideoEncoder {
    pub fn new(config: VideoConfig) -> Result<Self> {
        let w = config.width.next_multiple_of(2) as usize;
        let h = config.height.next_multiple_of(2) as usize;
        let pixel_format = video::frame::get_pixel_format("nv12");

        let (encoder, codec_name) = Self::build(&config, w, h, pixel_format)?;
        info!("Using video encoder: {} ({}x{})", codec_name, w, h);

        Ok(Self {
            config,
            encoder: Some(encoder),
            surface: VideoSurface::new(),
            cache: FrameCache::new(w, h, pixel_format),
            output: VecDeque::new(),
            w,
            h,
            config_found: false,
            codec_config: None,
            draining: false,
            codec_name,
        })
    }

    /// Codec configuration recorded for the current session
    pub fn codec_config(&self) -> Option<&[u8]> {
        self.codec_config.as_deref()
    }

    /// Handle for frame producers
    pub fn surface(&self) -> VideoSurface {
        self.surface.clone()
    }

    fn build(
        config: &VideoConfig,
        w: usize,
        h: usize,
        pixel_format: PixelFormat,
    ) -> Result<(FfVideoEncoder, String)> {
        let gop = config.gop.to_string();
        for (codec, options) in ENCODER_CHAIN {
            let mut builder = match FfVideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    debug!("Encoder {} not available, skipping: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(w)
                .height(h)
                .time_base(micros())
                .bit_rate(config.bit_rate as u64)
                .set_option("g", &gop);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(enc) => return Ok((enc, codec.to_string())),
                Err(e) => {
                    debug!("Encoder {} failed to initialize: {}", codec, e);
                    continue;
                }
            }
        }
        Err(RecorderError::encoder(
            MediaKind::Video,
            "no H.264 encoder available, install FFmpeg with at least libx264 support",
        ))
    }

    fn encoder(&mut self) -> Result<&mut FfVideoEncoder> {
        if self.encoder.is_none() {
            let pixel_format = self.cache.pixel_format;
            let (encoder, _) = Self::build(&self.config, self.w, self.h, pixel_format)?;
            self.encoder = Some(encoder);
        }
        self.encoder
            .as_mut()
            .ok_or_else(|| RecorderError::encoder(MediaKind::Video, "encoder unavailable"))
    }

    fn push(&mut self, input: SurfaceFrame) -> Result<()> {
        let mut frame = self.cache.take().with_pts(Timestamp::new(input.pts, micros()));
        {
            let mut planes = frame.planes_mut();
            let y_plane = planes[0].data_mut();
            let y_line = y_plane.len() / self.h;
            copy_plane(&input.luma, input.luma_stride, y_plane, y_line, self.w, self.h);
        }
        {
            let mut planes = frame.planes_mut();
            let uv_plane = planes[1].data_mut();
            let uv_rows = self.h / 2;
            let uv_line = uv_plane.len() / uv_rows;
            copy_plane(&input.chroma, input.chroma_stride, uv_plane, uv_line, self.w, uv_rows);
        }

        let frame = frame.freeze();
        self.encoder()?
            .push(frame.clone())
            .map_err(|e| RecorderError::encoder(MediaKind::Video, e.to_string()))?;
        self.cache.put(frame);
        self.collect()
    }

    fn collect(&mut self) -> Result<()> {
        let mut units = Vec::new();
        while let Some(packet) = self
            .encoder()?
            .take()
            .map_err(|e| RecorderError::encoder(MediaKind::Video, e.to_string()))?
        {
            units.push((packet.pts().as_micros().unwrap_or(NO_PTS), packet.data().to_vec()));
        }

        for (pts, data) in units {
            let keyframe = h264::contains_idr(&data);
            if !self.config_found {
                match h264::parameter_sets(&data) {
                    Some(sets) => {
                        self.output.push_back(Encoded {
                            pts: 0,
                            keyframe: false,
                            data: sets,
                        });
                        self.config_found = true;
                    }
                    None => warn!("First video unit carries no SPS/PPS"),
                }
            }
            self.output.push_back(Encoded { pts, keyframe, data });
        }
        Ok(())
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn encode(&mut self, out: &mut Packet) -> Result<()> {
        if self.output.is_empty() && !self.draining {
            if !self.surface.is_open() {
                self.surface.reopen();
            }
            if let Some(frame) = self.surface.next() {
                self.push(frame)?;
            }
        }

        if let Some(unit) = self.output.pop_front() {
            out.fill(MediaKind::Video, unit.pts, unit.pts, &unit.data);
            out.keyframe = unit.keyframe;
        }
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        self.draining = true;
        if self.encoder.is_none() {
            return Ok(());
        }
        self.encoder()?
            .flush()
            .map_err(|e| RecorderError::encoder(MediaKind::Video, e.to_string()))?;
        self.collect()?;
        self.encoder = None;
        Ok(())
    }

    fn set_codec_config(&mut self, config: &[u8]) {
        debug!("Video codec config set ({} bytes)", config.len());
        self.codec_config = Some(Bytes::copy_from_slice(config));
    }

    fn release_surface(&mut self) {
        self.surface.close();
        if !self.output.is_empty() {
            warn!("Discarding {} undelivered video units", self.output.len());
            self.output.clear();
        }
        self.draining = false;
        self.config_found = false;
        self.codec_config = None;
    }
}

/// Copy `rows` lines of `width` bytes between buffers of different strides
#[inline]
fn copy_plane(
    source: &[u8],
    stride: usize,
    destination: &mut [u8],
    line_size: usize,
    width: usize,
    rows: usize,
) {
    if stride == 0 || line_size == 0 {
        return;
    }
    if stride == line_size && source.len() >= rows * stride && destination.len() >= rows * stride {
        destination[..rows * stride].copy_from_slice(&source[..rows * stride]);
        return;
    }

    let width = width.min(stride).min(line_size);
    for (src, dst) in source
        .chunks(stride)
        .zip(destination.chunks_mut(line_size))
        .take(rows)
    {
        let n = width.min(src.len()).min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }
}
