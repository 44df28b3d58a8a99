//! Flags shared between the encode side and the container writer

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Codec configuration captured from the first video packet
///
/// Written by the video worker, read by the container writer, which waits
/// on it before the header can go out.
#[derive(Debug, Default)]
pub struct CodecConfigSlot {
    config: Mutex<Option<Bytes>>,
    available: Condvar,
    written: AtomicBool,
}

impl CodecConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, config: Bytes) {
        *self.config.lock() = Some(config);
        self.written.store(true, Ordering::Release);
        self.available.notify_all();
    }

    /// The codec configuration, waiting at most `timeout` for it
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let mut config = self.config.lock();
        if config.is_none() {
            let _ = self.available.wait_for(&mut config, timeout);
        }
        config.clone()
    }

    pub fn is_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        *self.config.lock() = None;
        self.written.store(false, Ordering::Release);
    }
}

/// Cross-thread session flags
#[derive(Debug, Default)]
pub struct SessionFlags {
    pub codec_config: CodecConfigSlot,
    header_written: AtomicBool,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_written(&self) -> bool {
        self.header_written.load(Ordering::Acquire)
    }

    pub fn mark_header_written(&self) {
        self.header_written.store(true, Ordering::Release);
    }

    /// Back to the unset state between recordings
    pub fn reset(&self) {
        self.codec_config.reset();
        self.header_written.store(false, Ordering::Release);
    }
}
