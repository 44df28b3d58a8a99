use ac_ffmpeg::codec::audio::ChannelLayout;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::{AudioCodecParameters, CodecParameters, VideoCodecParameters};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::net::{TcpStream, UdpSocket};

use crate::error::{ContainerOp, RecorderError, Result};
use crate::media::{
    ContainerFormat, ContainerOptions, ContainerSink, Destination, StreamLayout,
};
use crate::pipeline::types::{MediaKind, Packet, SampleFormat};

/// Encoders tried, in order, to describe the H.264 stream to the muxer
const VIDEO_CODEC_NAMES: &[&str] = &["libx264", "h264_nvenc", "h264_qsv", "h264"];

fn micros() -> TimeBase {
    TimeBase::new(1, 1_000_000)
}

fn open_error(reason: impl std::fmt::Display) -> RecorderError {
    RecorderError::container(ContainerOp::Open, reason.to_string())
}

/// Byte sink under the muxer
enum OutputStream {
    File(File),
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl OutputStream {
    fn connect(destination: &Destination) -> Result<Self> {
        let uri = match destination {
            Destination::File(path) => {
                let file = File::create(path)
                    .map_err(|e| open_error(format!("{}: {}", path.display(), e)))?;
                return Ok(OutputStream::File(file));
            }
            Destination::Uri(uri) => uri,
        };

        let address = uri
            .split_once("://")
            .map(|(_, rest)| rest.split(['/', '?']).next().unwrap_or(rest))
            .unwrap_or_default();
        match destination.scheme() {
            Some("tcp") => TcpStream::connect(address)
                .map(OutputStream::Tcp)
                .map_err(|e| open_error(format!("{}: {}", uri, e))),
            Some("udp") => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .and_then(|socket| socket.connect(address).map(|_| socket))
                    .map_err(|e| open_error(format!("{}: {}", uri, e)))?;
                Ok(OutputStream::Udp(socket))
            }
            Some(scheme) => Err(open_error(format!("unsupported scheme {}", scheme))),
            None => Err(open_error(format!("invalid destination {}", uri))),
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::File(file) => file.write(buf),
            OutputStream::Tcp(stream) => stream.write(buf),
            OutputStream::Udp(socket) => socket.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::File(file) => file.flush(),
            OutputStream::Tcp(stream) => stream.flush(),
            OutputStream::Udp(_) => Ok(()),
        }
    }
}

impl Seek for OutputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            OutputStream::File(file) => file.seek(pos),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live outputs are not seekable",
            )),
        }
    }
}

/// Opened output waiting for the codec configuration
struct PendingOutput {
    io: IO<OutputStream>,
    format: OutputFormat,
    options: ContainerOptions,
    layout: StreamLayout,
}

/// MP4 / MPEG-TS container sink on top of libavformat
///
/// `open` only prepares the byte sink. Streams are added and the header goes
/// out in `write_header`, once the video codec configuration is known.
pub struct FfmpegMuxer {
    audio_parameters: Option<CodecParameters>,
    pending: Option<PendingOutput>,
    muxer: Option<Muxer<OutputStream>>,
    video_index: usize,
    audio_index: usize,
}

// The muxer is owned by the container thread for the whole output lifetime.
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            audio_parameters: None,
            pending: None,
            muxer: None,
            video_index: 0,
            audio_index: 1,
        }
    }

    /// Describe the audio track with the encoder's own parameters (carries
    /// the AAC decoder configuration)
    pub fn with_audio_parameters(mut self, parameters: Option<CodecParameters>) -> Self {
        self.audio_parameters = parameters;
        self
    }

    fn audio_parameters(&self, layout: &StreamLayout) -> Result<CodecParameters> {
        if let Some(parameters) = &self.audio_parameters {
            return Ok(parameters.clone());
        }

        let audio = &layout.audio;
        let channel_layout = ChannelLayout::from_channels(audio.channels as u32)
            .ok_or_else(|| header_error(format!("no layout for {} channels", audio.channels)))?;
        let sample_format = match audio.sample_format {
            SampleFormat::S16 => "s16",
            SampleFormat::Fltp => "fltp",
        };
        let parameters = AudioCodecParameters::builder(audio.codec.encoder_name())
            .map_err(header_error)?
            .sample_rate(audio.sample_rate)
            .channel_layout(&channel_layout)
            .sample_format(get_sample_format(sample_format))
            .bit_rate(audio.bit_rate as u64)
            .build();
        Ok(parameters.into())
    }

    fn video_parameters(layout: &StreamLayout, codec_config: &[u8]) -> Result<CodecParameters> {
        let video = &layout.video;
        let builder = VIDEO_CODEC_NAMES
            .iter()
            .find_map(|name| VideoCodecParameters::builder(name).ok())
            .ok_or_else(|| header_error("no H.264 codec registered"))?;

        let parameters = builder
            .width(video.width as usize)
            .height(video.height as usize)
            .pixel_format(get_pixel_format("nv12"))
            .bit_rate(video.bit_rate as u64)
            .extradata(Some(codec_config))
            .build();
        Ok(parameters.into())
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// libavformat options for the container settings
fn muxer_options(options: &ContainerOptions) -> Vec<(&'static str, &'static str)> {
    let mut out = Vec::new();
    if options.experimental {
        out.push(("strict", "experimental"));
    }
    if options.copy_ts {
        // Rebased timestamps go out untouched
        out.push(("mpegts_copyts", "1"));
        out.push(("avoid_negative_ts", "disabled"));
    }
    out
}

fn header_error(reason: impl std::fmt::Display) -> RecorderError {
    RecorderError::container(ContainerOp::WriteHeader, reason.to_string())
}

impl ContainerSink for FfmpegMuxer {
    fn open(
        &mut self,
        destination: &Destination,
        format: ContainerFormat,
        options: &ContainerOptions,
        layout: &StreamLayout,
    ) -> Result<()> {
        if self.pending.is_some() || self.muxer.is_some() {
            return Err(open_error("output already open"));
        }

        let output_format = OutputFormat::find_by_name(format.short_name())
            .ok_or_else(|| open_error(format!("unknown container format {}", format)))?;
        let stream = OutputStream::connect(destination)?;
        let io = if destination.is_stream() {
            IO::from_write_stream(stream)
        } else {
            IO::from_seekable_write_stream(stream)
        };

        self.pending = Some(PendingOutput {
            io,
            format: output_format,
            options: *options,
            layout: layout.clone(),
        });
        Ok(())
    }

    fn write_header(&mut self, codec_config: &[u8]) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| header_error("output not open"))?;

        let video = Self::video_parameters(&pending.layout, codec_config)?;
        let audio = self.audio_parameters(&pending.layout)?;

        let mut builder = Muxer::builder();
        for (name, value) in muxer_options(&pending.options) {
            builder = builder.set_option(name, value);
        }
        self.video_index = builder.add_stream(&video).map_err(header_error)?;
        self.audio_index = builder.add_stream(&audio).map_err(header_error)?;

        let muxer = builder
            .build(pending.io, pending.format)
            .map_err(header_error)?;
        self.muxer = Some(muxer);
        debug!(
            "Muxer header written (video stream {}, audio stream {})",
            self.video_index, self.audio_index
        );
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let muxer = self.muxer.as_mut().ok_or_else(|| {
            RecorderError::container(ContainerOp::WritePacket, "header not written")
        })?;

        let index = match packet.kind {
            MediaKind::Video => self.video_index,
            MediaKind::Audio => self.audio_index,
        };
        let out = PacketMut::from(&packet.data[..])
            .with_pts(Timestamp::new(packet.pts, micros()))
            .with_dts(Timestamp::new(packet.dts, micros()))
            .with_stream_index(index)
            .freeze();

        muxer
            .push(out)
            .map_err(|e| RecorderError::container(ContainerOp::WritePacket, e.to_string()))
    }

    fn write_trailer(&mut self) -> Result<()> {
        let mut muxer = self.muxer.take().ok_or_else(|| {
            RecorderError::container(ContainerOp::WriteTrailer, "header not written")
        })?;

        muxer
            .flush()
            .map_err(|e| RecorderError::container(ContainerOp::WriteTrailer, e.to_string()))?;
        let io = muxer
            .close()
            .map_err(|e| RecorderError::container(ContainerOp::WriteTrailer, e.to_string()))?;
        let mut stream = io.into_stream();
        stream
            .flush()
            .map_err(|e| RecorderError::container(ContainerOp::WriteTrailer, e.to_string()))?;
        info!("Muxer trailer written");
        Ok(())
    }

    fn close(&mut self, write_trailer: bool) -> Result<()> {
        if self.muxer.is_some() {
            if write_trailer {
                self.write_trailer()?;
            } else {
                warn!("Closing output without a trailer");
                self.muxer = None;
            }
        }
        self.pending = None;
        Ok(())
    }
}
