//! Error types for the stem mixer

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine service stopped")]
    ServiceClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Asset decoding errors, raised by an [`AssetLoader`](crate::codec::AssetLoader)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track in {0}")]
    NoAudioTrack(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),
}

/// Errors binding a decoded buffer to a track
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Buffer has no frames")]
    Empty,

    #[error("Invalid buffer layout: {0}")]
    InvalidLayout(String),

    #[error("Track {0} already has a buffer bound")]
    AlreadyLoaded(u8),
}

/// Track lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("Track not found: {0}")]
    NotFound(u8),

    #[error("Maximum tracks reached: {0}")]
    MaxTracksReached(usize),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
