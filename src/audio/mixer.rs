//! Master output sum
//!
//! One [`ChannelStrip`] per track holds that track's gain stage, pan stage and
//! at most one active voice. The [`Mixer`] sums every strip into an output
//! block and applies the master gain. It is shared between the engine (which
//! only changes parameters and starts/stops voices) and the audio thread
//! (which renders).
//!
//! Gain, pan and master parameters are atomics, so only starting, stopping or
//! retuning a voice ever touches a lock. The render side never blocks: a strip
//! whose voice slot is busy sits out one block and catches up by that many
//! frames on the next one, so it stays aligned with its siblings. When a voice
//! runs off the end of its buffer the render side clears it and reports a
//! [`Completion`] tagged with the voice generation, so the engine can tell a
//! natural end apart from a voice it already replaced.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::SharedBuffer;
use crate::constants::COMPLETION_QUEUE_CAPACITY;

/// Generation value meaning the slot is empty
const NO_VOICE: u64 = 0;

/// A voice ran to the end of its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub track_id: u8,
    pub generation: u64,
}

/// Live playback of one buffer
struct Voice {
    buffer: SharedBuffer,
    /// Read position in source frames
    cursor: f64,
    rate: f64,
    generation: u64,
}

/// Per-track gain/pan stage with a single voice slot
pub struct ChannelStrip {
    track_id: u8,
    volume_bits: AtomicU32,
    pan_bits: AtomicU32,
    audible: AtomicBool,
    voice: Mutex<Option<Voice>>,
    /// Generation in the slot, published after the slot changes
    live_generation: AtomicU64,
    /// Output frames missed while the slot was busy, owed to `skipped_generation`
    skipped_frames: AtomicU64,
    skipped_generation: AtomicU64,
}

impl ChannelStrip {
    fn new(track_id: u8) -> Self {
        Self {
            track_id,
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            pan_bits: AtomicU32::new(0.0f32.to_bits()),
            audible: AtomicBool::new(true),
            voice: Mutex::new(None),
            live_generation: AtomicU64::new(NO_VOICE),
            skipped_frames: AtomicU64::new(0),
            skipped_generation: AtomicU64::new(NO_VOICE),
        }
    }

    pub fn track_id(&self) -> u8 {
        self.track_id
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan_bits.store(pan.to_bits(), Ordering::Relaxed);
    }

    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan_bits.load(Ordering::Relaxed))
    }

    /// Gate the strip according to the mute/solo rule
    pub fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Relaxed);
    }

    /// Gain currently applied to the voice
    pub fn gain(&self) -> f32 {
        if self.audible.load(Ordering::Relaxed) {
            self.volume()
        } else {
            0.0
        }
    }

    /// Replace the voice slot with a new voice starting `offset` seconds in
    pub fn start_voice(&self, buffer: SharedBuffer, offset: f64, rate: f64, generation: u64) {
        let cursor = offset.max(0.0) * buffer.sample_rate() as f64;
        *self.voice.lock() = Some(Voice {
            buffer,
            cursor,
            rate,
            generation,
        });
        // Published after the slot is released: frames skipped before this
        // point belong to the previous voice
        self.live_generation.store(generation, Ordering::Release);
    }

    /// Clear the voice if it still belongs to `generation`
    pub fn stop_voice(&self, generation: u64) -> bool {
        let stopped = {
            let mut slot = self.voice.lock();
            match *slot {
                Some(ref voice) if voice.generation == generation => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if stopped {
            self.live_generation.store(NO_VOICE, Ordering::Release);
        }
        stopped
    }

    /// Change the rate of the active voice without moving it
    pub fn set_rate(&self, rate: f64) {
        if let Some(voice) = self.voice.lock().as_mut() {
            voice.rate = rate;
        }
    }

    pub fn voice_generation(&self) -> Option<u64> {
        self.voice.lock().as_ref().map(|v| v.generation)
    }

    pub fn voice_rate(&self) -> Option<f64> {
        self.voice.lock().as_ref().map(|v| v.rate)
    }

    /// Read position of the active voice in seconds
    pub fn voice_position(&self) -> Option<f64> {
        self.voice
            .lock()
            .as_ref()
            .map(|v| v.cursor / v.buffer.sample_rate() as f64)
    }

    /// Remember a block the voice of `generation` sat out
    fn record_skip(&self, generation: u64, frames: usize) {
        if generation == NO_VOICE {
            return;
        }
        if self.skipped_generation.swap(generation, Ordering::Relaxed) != generation {
            self.skipped_frames.store(0, Ordering::Relaxed);
        }
        self.skipped_frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Add this strip's voice into `out`
    fn render_into(
        &self,
        out: &mut [f32],
        channels: usize,
        sample_rate: u32,
        completions: &Sender<Completion>,
    ) {
        let generation = self.live_generation.load(Ordering::Acquire);
        let Some(mut slot) = self.voice.try_lock() else {
            self.record_skip(generation, out.len() / channels);
            return;
        };
        let skipped = self.skipped_frames.swap(0, Ordering::Relaxed);
        let Some(voice) = slot.as_mut() else {
            return;
        };

        let gain = self.gain();
        let buffer = &voice.buffer;
        let frames = buffer.frames() as f64;
        let step = voice.rate * buffer.sample_rate() as f64 / sample_rate as f64;
        let law = PanLaw::new(self.pan(), buffer.channels() == 1);

        if skipped > 0 && self.skipped_generation.load(Ordering::Relaxed) == voice.generation {
            voice.cursor += skipped as f64 * step;
        }

        for frame in out.chunks_mut(channels) {
            if voice.cursor >= frames {
                break;
            }
            let (left, right) = buffer.frame_at(voice.cursor);
            let (left, right) = law.apply(left, right);
            match frame.len() {
                1 => frame[0] += (left + right) * 0.5 * gain,
                _ => {
                    frame[0] += left * gain;
                    frame[1] += right * gain;
                }
            }
            voice.cursor += step;
        }

        if voice.cursor >= frames {
            let generation = voice.generation;
            *slot = None;
            self.live_generation.store(NO_VOICE, Ordering::Release);
            // A full queue only loses the notification; the voice is already gone
            let _ = completions.try_send(Completion {
                track_id: self.track_id,
                generation,
            });
        }
    }
}

/// Equal-power stereo panner
///
/// Mono sources are spread across both sides; stereo sources keep both
/// channels and fold the far side into the near one as the pan moves.
#[derive(Debug, Clone, Copy)]
pub struct PanLaw {
    pan: f32,
    near: f32,
    far: f32,
    mono: bool,
}

impl PanLaw {
    pub fn new(pan: f32, mono: bool) -> Self {
        let pan = pan.clamp(-1.0, 1.0);
        // cos(pi/2) is not exactly 0 in f32; centred stereo passes through untouched
        if !mono && pan == 0.0 {
            return Self {
                pan,
                near: 0.0,
                far: 1.0,
                mono,
            };
        }
        let x = if mono {
            (pan + 1.0) * 0.5
        } else if pan <= 0.0 {
            pan + 1.0
        } else {
            pan
        };
        Self {
            pan,
            near: (x * FRAC_PI_2).cos(),
            far: (x * FRAC_PI_2).sin(),
            mono,
        }
    }

    #[inline]
    pub fn apply(&self, left: f32, right: f32) -> (f32, f32) {
        if self.mono {
            (left * self.near, left * self.far)
        } else if self.pan <= 0.0 {
            (left + right * self.near, right * self.far)
        } else {
            (left * self.near, right + left * self.far)
        }
    }
}

/// Shared render graph summing every channel strip
pub struct Mixer {
    strips: RwLock<Vec<Arc<ChannelStrip>>>,
    master_volume_bits: AtomicU32,
    master_muted: AtomicBool,
    completions: Sender<Completion>,
}

impl Mixer {
    /// Create a mixer and the receiving end of its completion queue
    pub fn new(master_volume: f32) -> (Arc<Self>, Receiver<Completion>) {
        let (tx, rx) = bounded(COMPLETION_QUEUE_CAPACITY);
        let mixer = Self {
            strips: RwLock::new(Vec::new()),
            master_volume_bits: AtomicU32::new(master_volume.clamp(0.0, 1.0).to_bits()),
            master_muted: AtomicBool::new(false),
            completions: tx,
        };
        (Arc::new(mixer), rx)
    }

    /// Allocate a channel strip for a track
    pub fn add_channel(&self, track_id: u8) -> Arc<ChannelStrip> {
        let strip = Arc::new(ChannelStrip::new(track_id));
        self.strips.write().push(strip.clone());
        strip
    }

    pub fn channel_count(&self) -> usize {
        self.strips.read().len()
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_master_muted(&self, muted: bool) {
        self.master_muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_master_muted(&self) -> bool {
        self.master_muted.load(Ordering::Relaxed)
    }

    /// Render one interleaved output block
    pub fn render(&self, out: &mut [f32], channels: usize, sample_rate: u32) {
        out.fill(0.0);
        if channels == 0 || sample_rate == 0 {
            return;
        }

        // Strips are only added while the engine is being built
        if let Some(strips) = self.strips.try_read() {
            for strip in strips.iter() {
                strip.render_into(out, channels, sample_rate, &self.completions);
            }
        }

        let master = if self.is_master_muted() {
            0.0
        } else {
            self.master_volume()
        };
        if master != 1.0 {
            for sample in out.iter_mut() {
                *sample *= master;
            }
        }
    }
}
