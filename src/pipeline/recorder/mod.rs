//! Recording session: encode workers, recorder loop and container writer
//!
//! Two threads per recorder:
//! - `recorder-thread` alternates the video and audio workers
//! - `container-thread` writes ready packets into the output

pub mod audio_stage;
pub mod capture_loop;
pub mod coordinator;
pub mod video_stage;
pub mod writer_stage;

pub use coordinator::{MediaRecorder, RecorderParts, SessionReport};
pub use writer_stage::WriterReport;
