//! Control and event messages
//!
//! Front-ends drive the engine with [`ControlMessage`]s and observe it through
//! [`EngineEvent`]s. Both serialize as internally tagged JSON objects so a UI
//! can speak to the engine without linking against it.

use serde::{Deserialize, Serialize};

use crate::transport::TransportState;

/// Commands accepted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Play,
    Pause,
    TogglePlayback,
    Seek { position: f64 },
    SkipForward,
    SkipBackward,
    SetPlaybackRate { rate: f64 },
    SetLoop { enabled: bool },
    ToggleLoop,
    SetTrackVolume { track_id: u8, volume: f32 },
    SetTrackPan { track_id: u8, pan: f32 },
    ToggleMute { track_id: u8 },
    ToggleSolo { track_id: u8 },
    SetMasterVolume { volume: f32 },
    ToggleMasterMute,
    Reset,
}

/// Notifications published by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    TrackLoaded { track_id: u8, duration: f64 },
    LoadFailed { track_id: u8, error: String },
    /// Every track has been loaded or has failed
    Ready { duration: f64 },
    StateChanged { playing: bool, position: f64 },
    Position { position: f64, duration: f64 },
    Seeked { position: f64 },
    Looped { position: f64 },
    Ended,
    RateChanged { rate: f64 },
    LoopChanged { enabled: bool },
    MasterChanged { volume: f32, muted: bool },
    TrackChanged(TrackStatus),
    Reset,
    /// A command could not be applied
    Rejected { error: String },
}

/// Current state of one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub id: u8,
    pub name: String,
    pub color: String,
    pub source: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    pub duration: f64,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
    pub is_playing: bool,
}

/// Serializable view of the whole engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub transport: TransportState,
    pub playing: bool,
    pub position: f64,
    pub duration: f64,
    pub rate: f64,
    pub looping: bool,
    pub master_volume: f32,
    pub master_muted: bool,
    /// Ids of soloed tracks, empty when no solo is active
    pub solo_set: Vec<u8>,
    pub tracks: Vec<TrackStatus>,
}
