//! Pipeline stage trait and thread spawning
//!
//! Each stage owns a dedicated, named OS thread for the duration of a
//! session; nothing is scheduled on process-wide executors.

use std::thread::{self, JoinHandle};

use crate::error::Result;

/// Trait for pipeline stages that run a loop on their own thread
pub trait PipelineStage: Send + 'static {
    /// Outcome handed back when the stage finishes
    type Output: Send + 'static;

    /// Run the stage until its stop signal fires
    fn run(self) -> Self::Output;

    /// Get the name of this stage for logging and thread naming
    fn name(&self) -> &'static str;
}

/// Start a stage on a named thread
pub fn spawn_stage<S: PipelineStage>(stage: S) -> Result<JoinHandle<S::Output>> {
    let name = stage.name();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            log::debug!("{}: started", name);
            let output = stage.run();
            log::debug!("{}: finished", name);
            output
        })?;
    Ok(handle)
}
