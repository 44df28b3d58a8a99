//! Session clock: rebases both streams onto one presentation axis

use log::info;

use super::types::{NO_PTS, Packet};

/// Outcome of rebasing one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebase {
    /// Timestamps were rewritten, forward the packet
    Forward,
    /// The encoder has not synchronized yet (negative pts), drop the packet
    Unsynced,
}

/// Session clock state for the reconciler
///
/// Each stream's origin latches once per session from its first usable
/// packet and is only cleared by `reset`. Every later packet of the stream is
/// rewritten as `pts - origin + session_start`.
///
/// # Thread Safety
///
/// Owned by the recorder thread and handed to both encode workers by
/// `&mut`; nothing here is shared across threads.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    /// First strictly positive video pts of the session
    video_origin: Option<i64>,

    /// First non-negative audio (pts, dts) of the session
    audio_origin: Option<(i64, i64)>,

    /// Offset of this session on the output timeline
    session_start: i64,
}

impl SessionClock {
    pub fn new(session_start: i64) -> Self {
        Self {
            video_origin: None,
            audio_origin: None,
            session_start,
        }
    }

    pub fn video_origin(&self) -> Option<i64> {
        self.video_origin
    }

    pub fn audio_origin(&self) -> Option<(i64, i64)> {
        self.audio_origin
    }

    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    /// Place the next session on the output timeline. Origins are untouched.
    pub fn set_session_start(&mut self, pts: i64) {
        self.session_start = pts;
    }

    /// Whether both origins are unset
    pub fn is_reset(&self) -> bool {
        self.video_origin.is_none() && self.audio_origin.is_none()
    }

    /// Clear both origins between recordings
    pub fn reset(&mut self) {
        self.video_origin = None;
        self.audio_origin = None;
    }

    /// Rebase a complete video packet. Video has no reordering, so dts = pts.
    ///
    /// A zero pts seen before the origin latches maps to `session_start`.
    pub fn rebase_video(&mut self, packet: &mut Packet) -> Rebase {
        if packet.pts < 0 {
            return Rebase::Unsynced;
        }

        if self.video_origin.is_none() && packet.pts > 0 {
            self.video_origin = Some(packet.pts);
            info!("Video origin latched at {}", packet.pts);
        }

        let pts = match self.video_origin {
            Some(origin) => self.rebase(packet.pts, origin),
            None => self.session_start,
        };
        packet.pts = pts;
        packet.dts = pts;
        Rebase::Forward
    }

    /// Rebase a complete audio packet against the audio pts/dts origins
    pub fn rebase_audio(&mut self, packet: &mut Packet) -> Rebase {
        if packet.pts < 0 {
            return Rebase::Unsynced;
        }
        if packet.dts == NO_PTS {
            packet.dts = packet.pts;
        }

        let (pts_origin, dts_origin) = *self.audio_origin.get_or_insert_with(|| {
            info!("Audio origin latched at pts={} dts={}", packet.pts, packet.dts);
            (packet.pts, packet.dts)
        });

        packet.pts = self.rebase(packet.pts, pts_origin);
        packet.dts = self.rebase(packet.dts, dts_origin);
        Rebase::Forward
    }

    #[inline]
    fn rebase(&self, value: i64, origin: i64) -> i64 {
        // Never before the session start, even if an encoder steps backwards.
        value.saturating_sub(origin).max(0) + self.session_start
    }
}
