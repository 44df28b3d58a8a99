//! Media collaborators: capture, codec and container interfaces

pub mod destination;
pub mod h264;
pub mod traits;

pub use destination::{ContainerFormat, ContainerOptions, Destination};
pub use traits::{AudioEncoder, AudioSource, ContainerSink, StreamLayout, VideoEncoder};
