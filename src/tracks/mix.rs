//! Mute/solo rule
//!
//! A track is heard when it is not muted and either nothing is soloed or it is
//! soloed itself. Mute always wins over solo. Every place that needs to know
//! whether a track should sound goes through [`audible`].

use crate::tracks::track::Track;

/// Whether `track` should be heard
pub fn audible(track: &Track, solo_active: bool) -> bool {
    !track.is_muted() && (!solo_active || track.is_soloed())
}

/// Whether any track is soloed
pub fn solo_active(tracks: &[Track]) -> bool {
    tracks.iter().any(Track::is_soloed)
}

/// Ids of the soloed tracks, in track order
pub fn solo_set(tracks: &[Track]) -> Vec<u8> {
    tracks
        .iter()
        .filter(|t| t.is_soloed())
        .map(Track::id)
        .collect()
}

/// Push the current mute/solo decision to every track's gain stage
pub fn apply(tracks: &[Track]) {
    let solo_active = solo_active(tracks);
    for track in tracks {
        track.apply_mix(solo_active);
    }
}
