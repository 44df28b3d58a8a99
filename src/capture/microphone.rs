//! Microphone capture through cpal
//!
//! The cpal stream lives on a dedicated thread; samples reach the recorder
//! through a bounded channel, converted to interleaved signed 16 bit PCM.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfig};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{RecorderError, Result};
use crate::media::AudioSource;

/// Callback buffers queued before new ones are dropped
const CHANNEL_DEPTH: usize = 256;

/// Longest a read waits for the device; the recorder loop also drives video
const READ_TIMEOUT: Duration = Duration::from_millis(5);

fn source_error(reason: impl std::fmt::Display) -> RecorderError {
    RecorderError::Source(reason.to_string())
}

/// Pick the requested layout if the default input device supports it,
/// otherwise fall back to the device default
fn resolve_config(sample_rate: u32, channels: u16) -> Result<SupportedStreamConfig> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| source_error("no default input device found"))?;

    let supported = device
        .supported_input_configs()
        .map_err(source_error)?
        .find(|range| {
            range.channels() == channels
                && range.min_sample_rate() <= sample_rate
                && sample_rate <= range.max_sample_rate()
        });

    match supported {
        Some(range) => Ok(range.with_sample_rate(sample_rate)),
        None => {
            let config = device.default_input_config().map_err(source_error)?;
            warn!(
                "Input device does not support {} Hz / {} channels, using {:?}",
                sample_rate, channels, config
            );
            Ok(config)
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sender: SyncSender<Vec<i16>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let err_fn = |err| error!("Audio stream error: {}", err);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &_| {
                let samples: Vec<i16> = data.iter().map(|s| s.to_sample::<i16>()).collect();
                if sender.try_send(samples).is_err() {
                    debug!("Audio capture channel full, buffer dropped");
                }
            },
            err_fn,
            None,
        )
        .map_err(source_error)
}

/// Owns the cpal stream until `stop` is signalled
fn capture_thread(
    config: SupportedStreamConfig,
    sender: SyncSender<Vec<i16>>,
    ready: SyncSender<Result<()>>,
    stop: Receiver<()>,
) {
    let run = || -> Result<cpal::Stream> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| source_error("no default input device found"))?;
        let stream_config: StreamConfig = config.config();

        let stream = match config.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, sender)?,
            SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, sender)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, sender)?,
            format => {
                return Err(source_error(format!("unsupported sample format {:?}", format)));
            }
        };
        stream.play().map_err(source_error)?;
        Ok(stream)
    };

    let stream = match run() {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    info!("Audio capture started");

    // Sender dropped or explicit stop
    let _ = stop.recv();
    if let Err(e) = stream.pause() {
        warn!("Failed to pause audio stream: {}", e);
    }
    drop(stream);
    info!("Audio capture stopped");
}

/// Default input device as an [`AudioSource`]
pub struct CpalAudioSource {
    config: SupportedStreamConfig,
    receiver: Option<Receiver<Vec<i16>>>,
    pending: VecDeque<i16>,
    stop: Option<SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CpalAudioSource {
    /// Open the default input device with the requested layout when possible.
    /// The layout actually used is reported by `sample_rate` and `channels`.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let config = resolve_config(sample_rate, channels)?;
        info!("Audio capture config: {:?}", config);
        Ok(Self {
            config,
            receiver: None,
            pending: VecDeque::new(),
            stop: None,
            handle: None,
        })
    }

    fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    fn take_pending(&mut self, buffer: &mut [i16]) -> usize {
        let n = buffer.len().min(self.pending.len());
        for (dst, src) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        n
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (data_tx, data_rx) = mpsc::sync_channel::<Vec<i16>>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_thread(config, data_tx, ready_tx, stop_rx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(source_error("capture thread exited before starting"));
            }
        }

        self.pending.clear();
        self.receiver = Some(data_rx);
        self.stop = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if self.pending.is_empty() {
            let running = self.is_running();
            let Some(receiver) = self.receiver.as_ref() else {
                return Ok(0);
            };
            let next = if running {
                match receiver.recv_timeout(READ_TIMEOUT) {
                    Ok(samples) => Some(samples),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(source_error("audio capture thread terminated"));
                    }
                }
            } else {
                match receiver.try_recv() {
                    Ok(samples) => Some(samples),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        self.receiver = None;
                        None
                    }
                }
            };
            if let Some(samples) = next {
                self.pending.extend(samples);
            }
        }
        Ok(self.take_pending(buffer))
    }

    fn stop(&mut self) -> Result<()> {
        let Some(stop) = self.stop.take() else {
            return Ok(());
        };
        let _ = stop.send(());
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| source_error("audio capture thread panicked"))?;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.config.channels()
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Audio source shutdown failed: {}", e);
        }
    }
}
