//! Core types for the recording pipeline

use bytes::BytesMut;

/// Timestamp value carried by a packet the encoder has not stamped yet
pub const NO_PTS: i64 = i64::MIN;

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video packet data
    Video,
    /// Audio packet data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// Encoded data unit travelling pool → worker → ready queue → writer → pool
///
/// Packets are recycled for the whole lifetime of a pool. The payload buffer
/// keeps its capacity across reuse so steady-state recording does not
/// allocate. Whoever holds the value owns it exclusively.
pub struct Packet {
    /// Stream the packet belongs to
    pub kind: MediaKind,

    /// Presentation timestamp in the encoder time base (microseconds)
    pub pts: i64,

    /// Decode timestamp in the encoder time base
    pub dts: i64,

    /// Set by the encoder once one full encoded unit has been written
    pub complete: bool,

    /// Whether the unit is a sync point (video keyframe)
    pub keyframe: bool,

    /// Encoded payload
    pub data: BytesMut,
}

impl Packet {
    /// Create an empty packet with a pre-reserved payload buffer
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kind: MediaKind::Audio,
            pts: NO_PTS,
            dts: NO_PTS,
            complete: false,
            keyframe: false,
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Return the packet to its pristine state, keeping the buffer capacity
    pub fn reset(&mut self) {
        self.pts = NO_PTS;
        self.dts = NO_PTS;
        self.complete = false;
        self.keyframe = false;
        self.data.clear();
    }

    /// Fill the packet with one complete encoded unit
    pub fn fill(&mut self, kind: MediaKind, pts: i64, dts: i64, payload: &[u8]) {
        self.kind = kind;
        self.pts = pts;
        self.dts = dts;
        self.data.clear();
        self.data.extend_from_slice(payload);
        self.complete = true;
    }

    /// Get the size of the payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("complete", &self.complete)
            .field("keyframe", &self.keyframe)
            .field("size", &self.size())
            .finish()
    }
}

/// Raw sample layout handed to the audio encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Interleaved signed 16 bit
    S16,
    /// Planar 32 bit float
    Fltp,
}

/// Fixed-capacity raw audio frame
///
/// One instance is owned by the audio worker and refilled on every read from
/// the source. Samples are interleaved signed 16 bit regardless of the
/// encoder's sample format; conversion is the encoder's job.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Vec<i16>,
    len: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Layout the encoder expects
    pub format: SampleFormat,
    /// Presentation timestamp of the first sample (microseconds)
    pub pts: i64,
}

impl SampleBuffer {
    /// Create a buffer able to hold `capacity` interleaved samples, rounded
    /// down to whole frames so reads never split a frame
    pub fn new(capacity: usize, sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        let frame = channels.max(1) as usize;
        let capacity = (capacity / frame).max(1) * frame;
        Self {
            data: vec![0; capacity],
            len: 0,
            sample_rate,
            channels,
            format,
            pts: 0,
        }
    }

    /// Whole buffer, for the source to read into
    pub fn storage_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }

    /// Mark the first `len` interleaved samples as valid and stamp them
    pub fn set_complete(&mut self, len: usize, pts: i64) {
        self.len = len.min(self.data.len());
        self.pts = pts;
    }

    /// Valid interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.data[..self.len]
    }

    /// Number of sample frames (samples per channel)
    pub fn num_frames(&self) -> usize {
        self.len / self.channels.max(1) as usize
    }

    pub fn is_complete(&self) -> bool {
        self.len > 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_reset_keeps_capacity() {
        let mut packet = Packet::with_capacity(64);
        packet.fill(MediaKind::Video, 10, 10, &[1, 2, 3]);
        assert!(packet.complete);
        assert_eq!(packet.size(), 3);

        packet.reset();
        assert!(!packet.complete);
        assert_eq!(packet.pts, NO_PTS);
        assert_eq!(packet.size(), 0);
        assert!(packet.data.capacity() >= 64);
    }

    #[test]
    fn test_sample_buffer_frames() {
        let mut buffer = SampleBuffer::new(8, 48_000, 2, SampleFormat::S16);
        assert!(!buffer.is_complete());

        buffer.storage_mut()[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buffer.set_complete(6, 1_000);
        assert_eq!(buffer.samples(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.pts, 1_000);

        // Clamped to capacity
        buffer.set_complete(100, 0);
        assert_eq!(buffer.samples().len(), 8);
    }

    #[test]
    fn test_sample_buffer_holds_whole_frames() {
        assert_eq!(SampleBuffer::new(1024, 48_000, 6, SampleFormat::S16).capacity(), 1020);
        assert_eq!(SampleBuffer::new(1024, 48_000, 3, SampleFormat::S16).capacity(), 1023);
        assert_eq!(SampleBuffer::new(1024, 48_000, 2, SampleFormat::S16).capacity(), 1024);
        assert_eq!(SampleBuffer::new(2, 48_000, 6, SampleFormat::S16).capacity(), 6);
    }
}
