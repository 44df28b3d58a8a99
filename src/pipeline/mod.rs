//! Recording pipeline
//!
//! Packets circulate between a fixed pool, the encode workers and the
//! container writer:
//! - `pool` and `queue` hold the packets; `exchange` applies the exhaustion policy
//! - `clock` rebases encoder timestamps onto one session timeline
//! - `state` and `session` carry the lifecycle shared between threads
//! - `recorder` holds the worker threads and the [`MediaRecorder`] facade
//!
//! # Threads
//!
//! A recording runs on two threads: the recorder thread drives both encoders
//! and the container thread writes whatever the ready queue holds.

pub mod clock;
pub mod exchange;
pub mod health;
pub mod pool;
pub mod queue;
pub mod recorder;
pub mod session;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::SessionClock;
pub use exchange::PacketExchange;
pub use health::{HealthSummary, PipelineHealth};
pub use pool::PacketPool;
pub use queue::ReadyQueue;
pub use recorder::{MediaRecorder, RecorderParts, SessionReport, WriterReport};
pub use stage::PipelineStage;
pub use state::RecorderState;
pub use types::{MediaKind, Packet, SampleBuffer, SampleFormat};
