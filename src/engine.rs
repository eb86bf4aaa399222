//! Engine facade
//!
//! Owns the tracks, the transport and the mixer graph, and exposes every
//! command a front-end can issue. All state changes happen synchronously on
//! the caller's thread; the audio thread only renders the mixer and reports
//! voice completions, which are picked up on the next [`Engine::tick`].

use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;
use crate::audio::mixer::{Completion, Mixer};
use crate::clock::SharedClock;
use crate::codec::AssetLoader;
use crate::config::{AppConfig, EngineConfig, TrackDescriptor};
use crate::constants::MAX_TRACKS;
use crate::error::{DecodeError, TrackError};
use crate::protocol::{ControlMessage, EngineEvent, EngineSnapshot, TrackStatus};
use crate::tracks::{mix, Track};
use crate::transport::{EndOfMedia, Transport};

/// Outcome of loading one track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub track_id: u8,
    pub name: String,
    /// Buffer duration on success, error text on failure
    pub outcome: Result<f64, String>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn to_event(&self) -> EngineEvent {
        match &self.outcome {
            Ok(duration) => EngineEvent::TrackLoaded {
                track_id: self.track_id,
                duration: *duration,
            },
            Err(error) => EngineEvent::LoadFailed {
                track_id: self.track_id,
                error: error.clone(),
            },
        }
    }
}

/// Result of one position tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub position: f64,
    pub duration: f64,
    /// Completions applied to their tracks
    pub completed: usize,
    /// Completions from superseded voices
    pub discarded: usize,
    pub end: Option<EndOfMedia>,
}

pub struct Engine {
    transport: Transport,
    tracks: Vec<Track>,
    mixer: Arc<Mixer>,
    completions: Receiver<Completion>,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine for a static list of tracks
    ///
    /// Track ids are assigned in order starting at 1. Nothing is loaded yet.
    pub fn new(
        descriptors: Vec<TrackDescriptor>,
        config: EngineConfig,
        clock: SharedClock,
    ) -> Result<Self, TrackError> {
        if descriptors.len() > MAX_TRACKS {
            return Err(TrackError::MaxTracksReached(MAX_TRACKS));
        }

        let (mixer, completions) = Mixer::new(config.master_volume);
        let tracks = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let id = index as u8 + 1;
                let strip = mixer.add_channel(id);
                Track::new(id, descriptor, strip, config.default_volume, config.default_pan)
            })
            .collect::<Vec<_>>();

        tracing::info!("Engine created with {} tracks", tracks.len());

        Ok(Self {
            transport: Transport::new(clock),
            tracks,
            mixer,
            completions,
            config,
        })
    }

    pub fn from_config(config: &AppConfig, clock: SharedClock) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::new(config.tracks.clone(), config.engine.clone(), clock)?)
    }

    /// Shared render graph, for the output stream
    pub fn mixer(&self) -> Arc<Mixer> {
        self.mixer.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: u8) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    fn track_mut(&mut self, id: u8) -> Result<&mut Track, TrackError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(TrackError::NotFound(id))
    }

    /// Source reference of every track, keyed by id
    pub fn sources(&self) -> Vec<(u8, String)> {
        self.tracks
            .iter()
            .map(|t| (t.id(), t.source().to_string()))
            .collect()
    }

    // ---- Loading ----

    /// Load every track through `loader`, then compute the duration
    ///
    /// A failing track is left silent and reported; the rest still load.
    pub fn load_tracks(&mut self, loader: &dyn AssetLoader) -> Vec<LoadReport> {
        let sources = self.sources();
        let mut reports = Vec::with_capacity(sources.len());
        for (id, source) in sources {
            let result = loader.load_buffer(&source);
            if let Ok(report) = self.bind_buffer(id, result) {
                reports.push(report);
            }
        }
        self.finish_loading();
        reports
    }

    /// Bind the outcome of decoding one track's source
    pub fn bind_buffer(
        &mut self,
        id: u8,
        result: Result<AudioBuffer, DecodeError>,
    ) -> Result<LoadReport, TrackError> {
        let track = self.track_mut(id)?;
        let outcome = match result {
            Ok(buffer) => match track.load(buffer) {
                Ok(()) => Ok(track.duration()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match &outcome {
            Ok(duration) => {
                tracing::info!("Loaded '{}' ({:.2}s)", track.name(), duration);
            }
            Err(error) => {
                tracing::warn!("Failed to load '{}': {}", track.name(), error);
                track.mark_failed(error.clone());
            }
        }

        Ok(LoadReport {
            track_id: id,
            name: track.name().to_string(),
            outcome,
        })
    }

    /// Compute the media duration once all loads have settled
    pub fn finish_loading(&mut self) -> f64 {
        let duration = self.transport.update_duration(&self.tracks);
        mix::apply(&self.tracks);
        let loaded = self.tracks.iter().filter(|t| t.is_loaded()).count();
        tracing::info!(
            "{}/{} tracks ready, duration {:.2}s",
            loaded,
            self.tracks.len(),
            duration
        );
        duration
    }

    // ---- Transport ----

    pub fn play(&mut self) -> bool {
        self.transport.play(&mut self.tracks)
    }

    pub fn pause(&mut self) -> bool {
        self.transport.pause(&mut self.tracks)
    }

    pub fn toggle_playback(&mut self) -> bool {
        self.transport.toggle_playback(&mut self.tracks)
    }

    pub fn seek(&mut self, position: f64) -> f64 {
        self.transport.seek(position, &mut self.tracks)
    }

    pub fn skip_forward(&mut self) -> f64 {
        self.transport.skip(self.config.skip_seconds, &mut self.tracks)
    }

    pub fn skip_backward(&mut self) -> f64 {
        self.transport.skip(-self.config.skip_seconds, &mut self.tracks)
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> f64 {
        self.transport.set_playback_rate(rate, &mut self.tracks)
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.transport.set_loop(enabled);
    }

    pub fn toggle_loop(&mut self) -> bool {
        let enabled = !self.transport.is_looping();
        self.transport.set_loop(enabled);
        enabled
    }

    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn duration(&self) -> f64 {
        self.transport.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    // ---- Track parameters ----

    pub fn set_track_volume(&mut self, id: u8, volume: f32) -> Result<f32, TrackError> {
        let track = self.track_mut(id)?;
        track.set_volume(volume);
        let volume = track.volume();
        mix::apply(&self.tracks);
        Ok(volume)
    }

    pub fn set_track_pan(&mut self, id: u8, pan: f32) -> Result<f32, TrackError> {
        let track = self.track_mut(id)?;
        track.set_pan(pan);
        let pan = track.pan();
        mix::apply(&self.tracks);
        Ok(pan)
    }

    /// Flip a track's mute flag; returns the new value
    pub fn toggle_mute(&mut self, id: u8) -> Result<bool, TrackError> {
        let track = self.track_mut(id)?;
        let muted = !track.is_muted();
        track.set_muted(muted);
        tracing::debug!("Track {} {}", id, if muted { "muted" } else { "unmuted" });
        self.remix();
        Ok(muted)
    }

    /// Flip a track's solo flag; returns the new value
    pub fn toggle_solo(&mut self, id: u8) -> Result<bool, TrackError> {
        let track = self.track_mut(id)?;
        let soloed = !track.is_soloed();
        track.set_soloed(soloed);
        tracing::debug!(
            "Track {} {}",
            id,
            if soloed { "soloed" } else { "unsoloed" }
        );
        self.remix();
        Ok(soloed)
    }

    /// Re-apply the mix rule and bring newly audible tracks in
    fn remix(&mut self) {
        mix::apply(&self.tracks);
        let joined = self.transport.resync(&mut self.tracks);
        if joined > 0 {
            tracing::debug!("{} tracks joined playback", joined);
        }
    }

    pub fn set_master_volume(&mut self, volume: f32) -> f32 {
        if volume.is_finite() {
            self.mixer.set_master_volume(volume);
        }
        self.mixer.master_volume()
    }

    pub fn toggle_master_mute(&mut self) -> bool {
        let muted = !self.mixer.is_master_muted();
        self.mixer.set_master_muted(muted);
        muted
    }

    /// Back to the initial session state
    pub fn reset(&mut self) {
        self.transport.stop(&mut self.tracks);

        let flagged: Vec<(u8, bool, bool)> = self
            .tracks
            .iter()
            .map(|t| (t.id(), t.is_muted(), t.is_soloed()))
            .collect();
        for (id, muted, soloed) in flagged {
            if muted {
                if let Err(e) = self.toggle_mute(id) {
                    tracing::warn!("Reset could not unmute track {}: {}", id, e);
                }
            }
            if soloed {
                if let Err(e) = self.toggle_solo(id) {
                    tracing::warn!("Reset could not unsolo track {}: {}", id, e);
                }
            }
        }

        for track in self.tracks.iter_mut() {
            track.set_volume(self.config.default_volume);
            track.set_pan(self.config.default_pan);
        }
        mix::apply(&self.tracks);

        self.mixer.set_master_muted(false);
        self.mixer.set_master_volume(self.config.master_volume);
        self.transport.set_playback_rate(1.0, &mut self.tracks);
        self.transport.set_loop(false);

        tracing::info!("Engine reset");
    }

    // ---- Periodic work ----

    /// Apply pending completions and handle the end of the media
    pub fn tick(&mut self) -> TickOutcome {
        let mut completed = 0;
        let mut discarded = 0;
        let pending: Vec<Completion> = self.completions.try_iter().collect();
        for completion in pending {
            let applied = self
                .tracks
                .iter_mut()
                .find(|t| t.id() == completion.track_id)
                .is_some_and(|t| t.on_completed(completion.generation));
            if applied {
                tracing::debug!("Track {} finished", completion.track_id);
                completed += 1;
            } else {
                tracing::debug!(
                    "Discarding stale completion for track {} (generation {})",
                    completion.track_id,
                    completion.generation
                );
                discarded += 1;
            }
        }

        let end = self.transport.poll_end(&mut self.tracks);
        TickOutcome {
            position: self.transport.position(),
            duration: self.transport.duration(),
            completed,
            discarded,
            end,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            transport: self.transport.state(),
            playing: self.transport.is_playing(),
            position: self.transport.position(),
            duration: self.transport.duration(),
            rate: self.transport.playback_rate(),
            looping: self.transport.is_looping(),
            master_volume: self.mixer.master_volume(),
            master_muted: self.mixer.is_master_muted(),
            solo_set: mix::solo_set(&self.tracks),
            tracks: self.statuses(),
        }
    }

    fn statuses(&self) -> Vec<TrackStatus> {
        self.tracks.iter().map(Track::status).collect()
    }

    fn state_event(&self) -> EngineEvent {
        EngineEvent::StateChanged {
            playing: self.transport.is_playing(),
            position: self.transport.position(),
        }
    }

    /// Apply a control message and describe what changed
    pub fn apply(&mut self, message: ControlMessage) -> Result<Vec<EngineEvent>, TrackError> {
        let events = match message {
            ControlMessage::Play => {
                if self.play() {
                    vec![self.state_event()]
                } else {
                    Vec::new()
                }
            }
            ControlMessage::Pause => {
                if self.pause() {
                    vec![self.state_event()]
                } else {
                    Vec::new()
                }
            }
            ControlMessage::TogglePlayback => {
                self.toggle_playback();
                vec![self.state_event()]
            }
            ControlMessage::Seek { position } => {
                vec![EngineEvent::Seeked {
                    position: self.seek(position),
                }]
            }
            ControlMessage::SkipForward => {
                vec![EngineEvent::Seeked {
                    position: self.skip_forward(),
                }]
            }
            ControlMessage::SkipBackward => {
                vec![EngineEvent::Seeked {
                    position: self.skip_backward(),
                }]
            }
            ControlMessage::SetPlaybackRate { rate } => {
                vec![EngineEvent::RateChanged {
                    rate: self.set_playback_rate(rate),
                }]
            }
            ControlMessage::SetLoop { enabled } => {
                self.set_loop(enabled);
                vec![EngineEvent::LoopChanged { enabled }]
            }
            ControlMessage::ToggleLoop => {
                vec![EngineEvent::LoopChanged {
                    enabled: self.toggle_loop(),
                }]
            }
            ControlMessage::SetTrackVolume { track_id, volume } => {
                self.set_track_volume(track_id, volume)?;
                self.track_event(track_id)
            }
            ControlMessage::SetTrackPan { track_id, pan } => {
                self.set_track_pan(track_id, pan)?;
                self.track_event(track_id)
            }
            ControlMessage::ToggleMute { track_id } => {
                self.toggle_mute(track_id)?;
                self.statuses().into_iter().map(EngineEvent::TrackChanged).collect()
            }
            ControlMessage::ToggleSolo { track_id } => {
                self.toggle_solo(track_id)?;
                self.statuses().into_iter().map(EngineEvent::TrackChanged).collect()
            }
            ControlMessage::SetMasterVolume { volume } => {
                self.set_master_volume(volume);
                vec![self.master_event()]
            }
            ControlMessage::ToggleMasterMute => {
                self.toggle_master_mute();
                vec![self.master_event()]
            }
            ControlMessage::Reset => {
                self.reset();
                vec![EngineEvent::Reset, self.state_event()]
            }
        };
        Ok(events)
    }

    fn track_event(&self, id: u8) -> Vec<EngineEvent> {
        self.track(id)
            .map(|t| EngineEvent::TrackChanged(t.status()))
            .into_iter()
            .collect()
    }

    fn master_event(&self) -> EngineEvent {
        EngineEvent::MasterChanged {
            volume: self.mixer.master_volume(),
            muted: self.mixer.is_master_muted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashMap;

    const EPS: f64 = 1e-9;
    const RATE: u32 = 100;

    /// Serves silence of a fixed length per source
    struct SilenceLoader {
        lengths: HashMap<String, f64>,
    }

    impl AssetLoader for SilenceLoader {
        fn load_buffer(&self, source: &str) -> Result<AudioBuffer, DecodeError> {
            self.lengths
                .get(source)
                .map(|seconds| AudioBuffer::silence(*seconds, 2, RATE))
                .ok_or_else(|| DecodeError::NotFound(source.to_string()))
        }
    }

    fn engine(lengths: &[(&str, Option<f64>)]) -> (Engine, ManualClock, Vec<LoadReport>) {
        let clock = ManualClock::new();
        let descriptors = lengths
            .iter()
            .map(|(name, _)| TrackDescriptor::new(*name, format!("{}.wav", name), "#ffffff"))
            .collect();
        let loader = SilenceLoader {
            lengths: lengths
                .iter()
                .filter_map(|(name, seconds)| seconds.map(|s| (format!("{}.wav", name), s)))
                .collect(),
        };
        let mut engine =
            Engine::new(descriptors, EngineConfig::default(), Arc::new(clock.clone())).unwrap();
        let reports = engine.load_tracks(&loader);
        (engine, clock, reports)
    }

    fn render(engine: &Engine, frames: usize) {
        let mut out = vec![0.0; frames * 2];
        engine.mixer().render(&mut out, 2, RATE);
    }

    #[test]
    fn test_failed_load_leaves_other_tracks_playable() {
        let (mut engine, _clock, reports) = engine(&[("a", Some(5.0)), ("b", None), ("c", Some(8.0))]);

        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_ok());
        assert!(matches!(reports[1].to_event(), EngineEvent::LoadFailed { track_id: 2, .. }));
        assert!((engine.duration() - 8.0).abs() < EPS);

        assert!(engine.play());
        assert!(engine.track(1).unwrap().is_playing());
        assert!(!engine.track(2).unwrap().is_playing());
        assert!(engine.track(3).unwrap().is_playing());
        assert!(engine.snapshot().tracks[1].load_error.is_some());
    }

    #[test]
    fn test_seek_past_short_track_restarts_only_long_one() {
        let (mut engine, clock, _) = engine(&[("a", Some(5.0)), ("b", Some(8.0))]);
        engine.play();
        clock.advance(3.0);

        engine.seek(6.0);
        assert!(!engine.track(1).unwrap().is_playing());
        let long = engine.track(2).unwrap();
        assert!(long.is_playing());
        assert!((long.strip().voice_position().unwrap() - 6.0).abs() < EPS);
    }

    #[test]
    fn test_muted_track_is_silent() {
        let (mut engine, _clock, _) = engine(&[("a", Some(5.0)), ("b", Some(5.0))]);
        engine.toggle_mute(1).unwrap();
        engine.play();

        assert_eq!(engine.track(1).unwrap().live_gain(), 0.0);
        assert!(!engine.track(1).unwrap().is_playing());
        assert!(engine.track(2).unwrap().live_gain() > 0.0);
    }

    #[test]
    fn test_solo_is_exclusive_and_late_joiners_sync() {
        let (mut engine, clock, _) = engine(&[("a", Some(8.0)), ("b", Some(8.0))]);
        engine.toggle_solo(1).unwrap();
        engine.play();
        assert!(engine.track(1).unwrap().is_playing());
        assert!(!engine.track(2).unwrap().is_playing());
        assert_eq!(engine.track(2).unwrap().live_gain(), 0.0);
        assert_eq!(engine.snapshot().solo_set, vec![1]);

        clock.advance(2.0);
        engine.toggle_solo(2).unwrap();
        let b = engine.track(2).unwrap();
        assert!(b.is_playing());
        assert!((b.strip().voice_position().unwrap() - 2.0).abs() < EPS);
        assert!(b.live_gain() > 0.0);
    }

    #[test]
    fn test_rate_change_applies_to_active_voices() {
        let (mut engine, _clock, _) = engine(&[("a", Some(5.0)), ("b", Some(8.0))]);
        engine.play();
        engine.set_playback_rate(0.5);
        for track in engine.tracks() {
            assert_eq!(track.strip().voice_rate(), Some(0.5));
        }
    }

    #[test]
    fn test_unknown_track_is_reported() {
        let (mut engine, _clock, _) = engine(&[("a", Some(5.0))]);
        assert_eq!(engine.toggle_mute(9), Err(TrackError::NotFound(9)));
        assert_eq!(
            engine.apply(ControlMessage::SetTrackPan { track_id: 0, pan: 0.5 }),
            Err(TrackError::NotFound(0))
        );
    }

    #[test]
    fn test_natural_completion_clears_track() {
        let (mut engine, _clock, _) = engine(&[("a", Some(0.5)), ("b", Some(8.0))]);
        engine.play();
        render(&engine, 60);

        let outcome = engine.tick();
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.discarded, 0);
        assert!(!engine.track(1).unwrap().is_playing());
        assert!(engine.track(2).unwrap().is_playing());
        assert!(engine.is_playing());
    }

    #[test]
    fn test_completion_from_replaced_voice_is_discarded() {
        let (mut engine, _clock, _) = engine(&[("a", Some(0.5)), ("b", Some(8.0))]);
        engine.play();
        render(&engine, 60);
        // The completion is queued but the seek has already replaced the voice
        engine.seek(0.2);

        let outcome = engine.tick();
        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.discarded, 1);
        assert!(engine.track(1).unwrap().is_playing());
    }

    #[test]
    fn test_tick_stops_at_end_and_loops_when_enabled() {
        let (mut engine, clock, _) = engine(&[("a", Some(4.0))]);
        engine.play();
        clock.advance(5.0);
        assert_eq!(engine.tick().end, Some(EndOfMedia::Stopped));
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 0.0);

        engine.toggle_loop();
        engine.play();
        clock.advance(4.5);
        let outcome = engine.tick();
        assert!(matches!(outcome.end, Some(EndOfMedia::Looped { .. })));
        assert!((outcome.position - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_skip_uses_configured_step() {
        let (mut engine, _clock, _) = engine(&[("a", Some(30.0))]);
        assert_eq!(engine.skip_forward(), 10.0);
        assert_eq!(engine.skip_forward(), 20.0);
        assert_eq!(engine.skip_forward(), 30.0);
        assert_eq!(engine.skip_backward(), 20.0);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (mut engine, clock, _) = engine(&[("a", Some(8.0)), ("b", Some(8.0))]);
        engine.play();
        clock.advance(2.0);
        engine.toggle_mute(1).unwrap();
        engine.toggle_solo(2).unwrap();
        engine.set_track_volume(2, 0.2).unwrap();
        engine.set_track_pan(2, -0.5).unwrap();
        engine.set_playback_rate(2.0);
        engine.set_loop(true);
        engine.set_master_volume(0.1);
        engine.toggle_master_mute();

        engine.reset();

        let snapshot = engine.snapshot();
        assert!(!snapshot.playing);
        assert_eq!(snapshot.position, 0.0);
        assert_eq!(snapshot.rate, 1.0);
        assert!(!snapshot.looping);
        assert!(!snapshot.master_muted);
        assert_eq!(snapshot.master_volume, 0.7);
        assert!(snapshot.solo_set.is_empty());
        for track in &snapshot.tracks {
            assert!(!track.muted && !track.soloed && !track.is_playing);
            assert_eq!(track.volume, 0.7);
            assert_eq!(track.pan, 0.0);
        }
        assert!(engine.tracks().iter().all(|t| t.live_gain() == 0.7));
    }

    #[test]
    fn test_apply_reports_changes() {
        let (mut engine, _clock, _) = engine(&[("a", Some(8.0)), ("b", Some(8.0))]);

        let events = engine.apply(ControlMessage::Play).unwrap();
        assert_eq!(
            events,
            vec![EngineEvent::StateChanged {
                playing: true,
                position: 0.0
            }]
        );
        assert!(engine.apply(ControlMessage::Play).unwrap().is_empty());

        let events = engine.apply(ControlMessage::ToggleSolo { track_id: 2 }).unwrap();
        assert_eq!(events.len(), 2);

        let events = engine.apply(ControlMessage::SetPlaybackRate { rate: 9.0 }).unwrap();
        assert_eq!(events, vec![EngineEvent::RateChanged { rate: 4.0 }]);
    }

    #[test]
    fn test_too_many_tracks_is_rejected() {
        let descriptors = (0..=MAX_TRACKS)
            .map(|i| TrackDescriptor::new(format!("t{}", i), "", "#ffffff"))
            .collect();
        let result = Engine::new(descriptors, EngineConfig::default(), Arc::new(ManualClock::new()));
        assert!(matches!(result, Err(TrackError::MaxTracksReached(_))));
    }

    #[test]
    fn test_play_before_loading_is_noop() {
        let clock = ManualClock::new();
        let mut engine = Engine::new(
            vec![TrackDescriptor::new("a", "a.wav", "#ffffff")],
            EngineConfig::default(),
            Arc::new(clock),
        )
        .unwrap();
        assert!(!engine.play());
        assert!(engine.apply(ControlMessage::TogglePlayback).is_ok());
        assert!(!engine.is_playing());
    }
}
