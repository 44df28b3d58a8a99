//! Device capture sources

mod microphone;

pub use microphone::CpalAudioSource;
