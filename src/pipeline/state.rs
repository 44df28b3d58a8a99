//! Recorder state management

use parking_lot::Mutex;
use std::time::Instant;

/// Recorder loop state machine
///
/// `Idle → Recording → Draining → Idle`. A session always drains before it
/// returns to idle, so an encoder is never left holding buffered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No capture in progress
    Idle,

    /// Audio and video are being polled and encoded
    Recording {
        /// When the session started
        started_at: Instant,
    },

    /// Stop requested: remaining samples are read and both encoders flushed
    Draining,
}

impl RecorderState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &RecorderState) -> bool {
        use RecorderState::*;

        matches!(
            (self, target),
            (Idle, Recording { .. }) | (Recording { .. }, Draining) | (Draining, Idle)
        )
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Recording { .. } => "Recording",
            RecorderState::Draining => "Draining",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RecorderState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Recording { .. })
    }

    /// Time spent recording so far (if recording)
    pub fn recording_duration(&self) -> Option<std::time::Duration> {
        if let RecorderState::Recording { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// State cell shared by the caller and the recorder thread
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<RecorderState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecorderState::Idle),
        }
    }

    pub fn get(&self) -> RecorderState {
        *self.state.lock()
    }

    /// Apply a transition, refusing invalid ones
    pub fn transition(&self, target: RecorderState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(&target) {
            log::warn!("Refusing recorder transition {} -> {}", *state, target);
            return false;
        }
        *state = target;
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
