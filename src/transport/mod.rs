//! Global transport
//!
//! Owns play/pause state, position, rate and looping, and is the only place
//! that starts or stops tracks as a group.
//!
//! Position is derived from the clock rather than counted: while playing the
//! transport remembers the clock time and media position of its last anchor
//! (play, seek, rate change, loop wrap) and extrapolates from there at the
//! current rate. Because every audible track is started from the same anchor,
//! reported position and the tracks stay aligned without any per-track
//! bookkeeping.

use serde::Serialize;

use crate::clock::SharedClock;
use crate::constants::{MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE};
use crate::tracks::{mix, Track};

/// Two-state transport machine
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportState {
    Paused {
        position: f64,
    },
    Playing {
        /// Clock time of the last anchor
        anchor_clock: f64,
        /// Media position at the last anchor
        anchor_position: f64,
    },
}

/// What happened when playback reached the end
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndOfMedia {
    /// Playback wrapped around and continues from `position`
    Looped { position: f64 },
    /// Playback stopped and rewound to 0
    Stopped,
}

pub struct Transport {
    clock: SharedClock,
    state: TransportState,
    rate: f64,
    looping: bool,
    duration: f64,
}

impl Transport {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: TransportState::Paused { position: 0.0 },
            rate: 1.0,
            looping: false,
            duration: 0.0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, TransportState::Playing { .. })
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Set the duration to the longest loaded track
    pub fn update_duration(&mut self, tracks: &[Track]) -> f64 {
        self.duration = tracks.iter().map(Track::duration).fold(0.0, f64::max);
        if let TransportState::Paused { position } = self.state {
            self.state = TransportState::Paused {
                position: position.clamp(0.0, self.duration),
            };
        }
        self.duration
    }

    /// Clock time at which media position 0 would have played at the current rate
    pub fn reference_time(&self) -> Option<f64> {
        match self.state {
            TransportState::Playing {
                anchor_clock,
                anchor_position,
            } => Some(anchor_clock - anchor_position / self.rate),
            TransportState::Paused { .. } => None,
        }
    }

    /// Current position in seconds
    ///
    /// Free of side effects. While playing it never decreases between
    /// anchors; with looping on, a position past the end reads as its
    /// wrapped value until the next tick restarts the tracks there.
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Paused { position } => position,
            TransportState::Playing { .. } => {
                let raw = self.raw_position();
                if self.looping && self.duration > 0.0 && raw >= self.duration {
                    raw.rem_euclid(self.duration)
                } else {
                    raw.clamp(0.0, self.duration)
                }
            }
        }
    }

    /// Unclamped extrapolated position
    fn raw_position(&self) -> f64 {
        match self.state {
            TransportState::Paused { position } => position,
            TransportState::Playing {
                anchor_clock,
                anchor_position,
            } => {
                let elapsed = (self.clock.now() - anchor_clock).max(0.0);
                anchor_position + elapsed * self.rate
            }
        }
    }

    fn anchor(&mut self, position: f64) {
        self.state = TransportState::Playing {
            anchor_clock: self.clock.now(),
            anchor_position: position,
        };
    }

    /// Start every loaded, audible track at `position`
    fn start_audible(&self, tracks: &mut [Track], position: f64) -> usize {
        let solo_active = mix::solo_active(tracks);
        let mut started = 0;
        for track in tracks.iter_mut() {
            if track.is_loaded() && mix::audible(track, solo_active) && track.start(position, self.rate) {
                started += 1;
            }
        }
        started
    }

    fn stop_all(tracks: &mut [Track]) {
        for track in tracks.iter_mut() {
            track.stop();
        }
    }

    /// Paused -> Playing
    pub fn play(&mut self, tracks: &mut [Track]) -> bool {
        let TransportState::Paused { position } = self.state else {
            return false;
        };
        if self.duration <= 0.0 {
            tracing::debug!("Nothing loaded, ignoring play");
            return false;
        }

        mix::apply(tracks);
        let started = self.start_audible(tracks, position);
        self.anchor(position);

        tracing::info!(
            "Playback started at {} ({} tracks sounding)",
            format_time(position),
            started
        );
        true
    }

    /// Playing -> Paused
    pub fn pause(&mut self, tracks: &mut [Track]) -> bool {
        if !self.is_playing() {
            return false;
        }
        let position = self.position();
        Self::stop_all(tracks);
        self.state = TransportState::Paused { position };

        tracing::info!("Playback paused at {}", format_time(position));
        true
    }

    /// Dispatch to play or pause; returns whether the transport is now playing
    pub fn toggle_playback(&mut self, tracks: &mut [Track]) -> bool {
        if self.is_playing() {
            self.pause(tracks);
        } else {
            self.play(tracks);
        }
        self.is_playing()
    }

    /// Stop every track and rewind to 0
    pub fn stop(&mut self, tracks: &mut [Track]) {
        Self::stop_all(tracks);
        self.state = TransportState::Paused { position: 0.0 };
        tracing::info!("Playback stopped");
    }

    /// Move to `target` seconds, clamped into the media
    ///
    /// While playing, every track is stopped and the audible ones restarted at
    /// the target in one step. Completions from the stopped voices carry old
    /// generations and are discarded when they arrive.
    pub fn seek(&mut self, target: f64, tracks: &mut [Track]) -> f64 {
        if !target.is_finite() {
            return self.position();
        }
        let target = target.clamp(0.0, self.duration);

        if self.is_playing() {
            Self::stop_all(tracks);
            mix::apply(tracks);
            self.start_audible(tracks, target);
            self.anchor(target);
        } else {
            self.state = TransportState::Paused { position: target };
        }

        tracing::debug!("Seeked to {}", format_time(target));
        target
    }

    /// Seek relative to the current position
    pub fn skip(&mut self, delta: f64, tracks: &mut [Track]) -> f64 {
        let position = self.position();
        self.seek(position + delta, tracks)
    }

    /// Change the playback rate without repositioning
    ///
    /// Non-finite rates are ignored; others are clamped to the supported
    /// range. While playing, the position is re-anchored so it stays
    /// continuous and then advances at the new rate, like the voices do.
    pub fn set_playback_rate(&mut self, rate: f64, tracks: &mut [Track]) -> f64 {
        if !rate.is_finite() {
            return self.rate;
        }
        let rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);

        if self.is_playing() {
            let position = self.raw_position();
            self.anchor(position);
            for track in tracks.iter_mut() {
                track.set_rate(rate);
            }
        }
        self.rate = rate;

        tracing::info!("Playback rate set to {}x", rate);
        rate
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        tracing::info!("Loop {}", if looping { "enabled" } else { "disabled" });
    }

    /// Start tracks that became audible while playing
    ///
    /// Tracks that were muted or outside the solo set at play time have no
    /// voice; when a toggle lets them be heard they join at the current
    /// position.
    pub fn resync(&mut self, tracks: &mut [Track]) -> usize {
        if !self.is_playing() {
            return 0;
        }
        let position = self.position();
        if position >= self.duration {
            return 0;
        }

        let solo_active = mix::solo_active(tracks);
        let mut started = 0;
        for track in tracks.iter_mut() {
            if track.is_loaded()
                && track.handle().is_none()
                && mix::audible(track, solo_active)
                && track.start(position, self.rate)
            {
                started += 1;
            }
        }
        started
    }

    /// Handle reaching the end of the media
    ///
    /// Called from the position tick. With looping on, playback restarts at
    /// the wrapped position so any overshoot is kept; otherwise everything
    /// stops and the position goes back to 0.
    pub fn poll_end(&mut self, tracks: &mut [Track]) -> Option<EndOfMedia> {
        if !self.is_playing() || self.duration <= 0.0 {
            return None;
        }
        let raw = self.raw_position();
        if raw < self.duration {
            return None;
        }

        if self.looping {
            let target = raw.rem_euclid(self.duration);
            Self::stop_all(tracks);
            mix::apply(tracks);
            self.start_audible(tracks, target);
            self.anchor(target);
            tracing::debug!("Looped back to {}", format_time(target));
            Some(EndOfMedia::Looped { position: target })
        } else {
            self.stop(tracks);
            Some(EndOfMedia::Stopped)
        }
    }
}

/// Format seconds as `m:ss`
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let minutes = (total / 60.0).floor() as u64;
    let secs = (total % 60.0).floor() as u64;
    format!("{}:{:02}", minutes, secs)
}
