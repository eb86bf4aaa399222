//! # Stem Mixer
//!
//! Synchronized multi-track playback with per-track volume, pan, mute and
//! solo, one shared transport and a master bus.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Front-end (player CLI, UI)                        │
//! │            ControlMessage ──►        ◄── EngineEvent                 │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │ mpsc / broadcast
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  Engine service (service) - one task                 │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                        Engine (engine)                         │  │
//! │  │   ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │  │
//! │  │   │  Transport   │──►│   Tracks     │◄──│   Mix rule       │   │  │
//! │  │   │ play/seek/.. │   │ buffer+voice │   │ mute/solo gating │   │  │
//! │  │   └──────┬───────┘   └──────┬───────┘   └──────────────────┘   │  │
//! │  │          │ Clock            │ params, start/stop               │  │
//! │  └──────────┼──────────────────┼──────────────────────────────────┘  │
//! │     tick ◄──┘                  │            ▲ completions            │
//! └────────────────────────────────┼────────────┼────────────────────────┘
//!                                  ▼            │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Mixer (audio::mixer): ChannelStrip per track ──► master bus         │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │            Output stream thread (audio::output, cpal)                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod service;
pub mod tracks;
pub mod transport;

pub use engine::Engine;
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Volume every track starts at
    pub const DEFAULT_TRACK_VOLUME: f32 = 0.7;

    /// Master bus volume at startup
    pub const DEFAULT_MASTER_VOLUME: f32 = 0.7;

    /// Position tick period while playing
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

    /// Step for the previous/next controls
    pub const DEFAULT_SKIP_SECONDS: f64 = 10.0;

    /// Maximum number of concurrent tracks
    pub const MAX_TRACKS: usize = 16;

    /// Playback rate range
    pub const MIN_PLAYBACK_RATE: f64 = 0.25;
    pub const MAX_PLAYBACK_RATE: f64 = 4.0;

    /// Pending voice completions between ticks
    pub const COMPLETION_QUEUE_CAPACITY: usize = 256;

    /// Commands queued to the engine service
    pub const COMMAND_QUEUE_CAPACITY: usize = 64;

    /// Events buffered per subscriber
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
