//! Asset loading
//!
//! The engine never fetches or decodes audio itself. It asks an
//! [`AssetLoader`] for one decoded buffer per configured track.

pub mod decoder;

pub use decoder::{decode_file, SymphoniaLoader};

use crate::audio::buffer::AudioBuffer;
use crate::error::DecodeError;

/// Turns a source reference into a decoded buffer
pub trait AssetLoader: Send + Sync {
    fn load_buffer(&self, source: &str) -> Result<AudioBuffer, DecodeError>;
}
