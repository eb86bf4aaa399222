//! Track management module

pub mod mix;
pub mod track;

pub use track::{LoadState, PlaybackHandle, Track};
