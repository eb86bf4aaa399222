//! A single stem
//!
//! A track owns its decoded buffer and drives its own channel strip. It never
//! decides on its own whether it should be heard; the mix rule in
//! [`super::mix`] does that and the transport applies it.

use std::sync::Arc;

use crate::audio::buffer::{AudioBuffer, SharedBuffer};
use crate::audio::mixer::ChannelStrip;
use crate::config::TrackDescriptor;
use crate::error::LoadError;
use crate::protocol::TrackStatus;
use crate::tracks::mix;

/// Whether a buffer has been bound to the track
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(String),
}

/// Token for one live voice on the track's strip
///
/// Generations increase every time the track starts, so a completion carrying
/// an older generation belongs to a voice that has already been replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackHandle {
    generation: u64,
}

impl PlaybackHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct Track {
    id: u8,
    descriptor: TrackDescriptor,
    buffer: Option<SharedBuffer>,
    load_state: LoadState,

    volume: f32,
    pan: f32,
    muted: bool,
    soloed: bool,

    handle: Option<PlaybackHandle>,
    is_playing: bool,
    generations: u64,

    strip: Arc<ChannelStrip>,
}

impl Track {
    pub fn new(
        id: u8,
        descriptor: TrackDescriptor,
        strip: Arc<ChannelStrip>,
        volume: f32,
        pan: f32,
    ) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        let pan = pan.clamp(-1.0, 1.0);
        strip.set_volume(volume);
        strip.set_pan(pan);

        Self {
            id,
            descriptor,
            buffer: None,
            load_state: LoadState::Pending,
            volume,
            pan,
            muted: false,
            soloed: false,
            handle: None,
            is_playing: false,
            generations: 0,
            strip,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn color(&self) -> &str {
        &self.descriptor.color
    }

    pub fn source(&self) -> &str {
        &self.descriptor.source
    }

    /// Bind a decoded buffer
    ///
    /// Only one successful load is accepted; a track whose load failed may be
    /// loaded again.
    pub fn load(&mut self, buffer: AudioBuffer) -> Result<(), LoadError> {
        if self.load_state == LoadState::Loaded {
            return Err(LoadError::AlreadyLoaded(self.id));
        }
        buffer.validate()?;
        self.buffer = Some(Arc::new(buffer));
        self.load_state = LoadState::Loaded;
        Ok(())
    }

    /// Record a failed load; the track stays silent
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.load_state != LoadState::Loaded {
            self.load_state = LoadState::Failed(reason.into());
        }
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Buffer duration in seconds, 0 when nothing is loaded
    pub fn duration(&self) -> f64 {
        self.buffer.as_ref().map(|b| b.duration()).unwrap_or(0.0)
    }

    /// Start producing audio `offset` seconds into the buffer
    ///
    /// Returns whether a voice was started. Without a buffer, or with an
    /// offset at or past the end, nothing happens and the track stays idle.
    pub fn start(&mut self, offset: f64, rate: f64) -> bool {
        let Some(buffer) = self.buffer.clone() else {
            tracing::debug!("Track {} has no buffer, not starting", self.id);
            return false;
        };

        self.stop();

        let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        if offset >= buffer.duration() {
            tracing::debug!(
                "Track {} offset {:.3}s is past its end ({:.3}s)",
                self.id,
                offset,
                buffer.duration()
            );
            return false;
        }

        self.generations += 1;
        let generation = self.generations;
        self.strip.start_voice(buffer, offset, rate, generation);
        self.handle = Some(PlaybackHandle { generation });
        self.is_playing = true;

        tracing::debug!(
            "Track {} started at {:.3}s (rate {}, generation {})",
            self.id,
            offset,
            rate,
            generation
        );
        true
    }

    /// Stop the active voice, if any
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // The voice may already have ended on its own; that is fine
            let _ = self.strip.stop_voice(handle.generation);
        }
        self.is_playing = false;
    }

    /// Change the rate of the active voice in place
    pub fn set_rate(&mut self, rate: f64) {
        if self.handle.is_some() {
            self.strip.set_rate(rate);
        }
    }

    /// Apply a natural-completion notification
    ///
    /// Returns false when the notification belongs to a superseded voice and
    /// was discarded.
    pub fn on_completed(&mut self, generation: u64) -> bool {
        match self.handle {
            Some(handle) if handle.generation == generation => {
                self.handle = None;
                self.is_playing = false;
                true
            }
            _ => false,
        }
    }

    pub fn handle(&self) -> Option<PlaybackHandle> {
        self.handle
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { self.volume };
        self.volume = volume;
        self.strip.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_pan(&mut self, pan: f32) {
        let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { self.pan };
        self.pan = pan;
        self.strip.set_pan(pan);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_soloed(&mut self, soloed: bool) {
        self.soloed = soloed;
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    /// Gain the track should sound at given whether any track is soloed
    pub fn effective_gain(&self, solo_active: bool) -> f32 {
        if mix::audible(self, solo_active) {
            self.volume
        } else {
            0.0
        }
    }

    /// Push the mute/solo decision to the live gain stage
    pub fn apply_mix(&self, solo_active: bool) {
        self.strip.set_audible(mix::audible(self, solo_active));
    }

    /// Gain currently applied on the strip
    pub fn live_gain(&self) -> f32 {
        self.strip.gain()
    }

    pub fn strip(&self) -> &Arc<ChannelStrip> {
        &self.strip
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            id: self.id,
            name: self.descriptor.name.clone(),
            color: self.descriptor.color.clone(),
            source: self.descriptor.source.clone(),
            loaded: self.is_loaded(),
            load_error: match &self.load_state {
                LoadState::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
            duration: self.duration(),
            volume: self.volume,
            pan: self.pan,
            muted: self.muted,
            soloed: self.soloed,
            is_playing: self.is_playing,
        }
    }
}
