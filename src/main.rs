use anyhow::{Context, Result};
use clap::{Arg, Command, value_parser};
use log::{info, warn};
use mix_recorder::capture::CpalAudioSource;
use mix_recorder::config::{RecorderConfig, app_name, version};
use mix_recorder::encoder::{FfmpegAudioEncoder, FfmpegVideoEncoder, SurfaceFrame, VideoSurface};
use mix_recorder::media::{AudioSource, Destination};
use mix_recorder::muxer::FfmpegMuxer;
use mix_recorder::pipeline::{MediaRecorder, RecorderParts};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use std::{panic, process};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DESTINATION")
                .help("Output file or stream URI (tcp://host:port). Defaults to a timestamped .mp4."),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds instead of waiting for Ctrl-C.")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let base = match matches.get_one::<PathBuf>("config") {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RecorderConfig::default(),
    };
    let destination = matches
        .get_one::<String>("output")
        .map(|uri| uri.parse::<Destination>())
        .transpose()
        .context("parsing output destination")?;
    let duration = matches.get_one::<u64>("duration").copied().map(Duration::from_secs);

    let source = CpalAudioSource::new(base.audio.sample_rate, base.audio.channels)?;
    let mut config = match &destination {
        Some(destination) => base.for_container(destination.container_format()),
        None => base,
    };
    config.audio.sample_rate = source.sample_rate();
    config.audio.channels = source.channels();

    let audio_encoder = FfmpegAudioEncoder::new(config.audio.clone())?;
    let video_encoder = FfmpegVideoEncoder::new(config.video.clone())?;
    let surface = video_encoder.surface();
    let sink = FfmpegMuxer::new().with_audio_parameters(audio_encoder.codec_parameters());

    let mut recorder = MediaRecorder::new(
        config.clone(),
        RecorderParts {
            audio_source: Box::new(source),
            audio_encoder: Box::new(audio_encoder),
            video_encoder: Box::new(video_encoder),
            sink: Box::new(sink),
        },
    )?;

    let destination = recorder.open_output(destination)?;
    info!("Recording to {}", destination);

    let cancel = CancellationToken::new();
    let pattern = spawn_test_pattern(
        surface,
        config.video.width as usize,
        config.video.height as usize,
        config.video.frame_rate,
        cancel.clone(),
    )?;

    recorder.start()?;
    wait_for_stop(duration)?;

    let report = recorder.stop();
    cancel.cancel();
    if pattern.join().is_err() {
        warn!("Test pattern thread panicked");
    }

    match report? {
        Some(report) => info!(
            "Recording finished: {} ({} packets written, {})",
            report.destination, report.writer.packets_written, report.health
        ),
        None => warn!("No recording was running"),
    }
    recorder.release()?;
    Ok(())
}

/// Block until Ctrl-C or the optional duration elapses
fn wait_for_stop(duration: Option<Duration>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let limit = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("listening for Ctrl-C"),
            _ = limit => Ok(()),
        }
    })
}

/// Feed a moving NV12 gradient into the encoder surface at `frame_rate`
fn spawn_test_pattern(
    surface: VideoSurface,
    width: usize,
    height: usize,
    frame_rate: u32,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let width = width.next_multiple_of(2);
    let height = height.next_multiple_of(2);
    let interval = Duration::from_secs(1) / frame_rate.max(1);

    let handle = thread::Builder::new()
        .name("test-pattern".into())
        .spawn(move || {
            let epoch = Instant::now();
            let mut index: usize = 0;
            while !cancel.is_cancelled() {
                let shift = index % 256;
                let luma = (0..height)
                    .flat_map(|y| (0..width).map(move |x| ((x + y + shift) % 256) as u8))
                    .collect();
                let chroma = vec![128u8; width * height / 2];

                surface.submit(SurfaceFrame {
                    pts: epoch.elapsed().as_micros() as i64,
                    luma,
                    luma_stride: width,
                    chroma,
                    chroma_stride: width,
                });
                index += 1;
                thread::sleep(interval);
            }
        })?;
    Ok(handle)
}
