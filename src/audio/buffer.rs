//! Decoded audio buffers
//!
//! A buffer is produced once by the asset loader and never mutated afterwards.
//! Tracks and voices share it through [`SharedBuffer`].

use std::sync::Arc;

use crate::error::LoadError;

/// Decoded audio with interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved audio samples (f32)
    samples: Vec<f32>,
    /// Number of channels
    channels: u16,
    /// Sample rate of the decoded data
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Build a buffer from planar channel data
    pub fn from_planar(planes: &[Vec<f32>], sample_rate: u32) -> Self {
        let channels = planes.len();
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for plane in planes {
                samples.push(plane[frame]);
            }
        }
        Self::new(samples, channels as u16, sample_rate)
    }

    /// Silent buffer of the given length, mostly useful for tests and tools
    pub fn silence(seconds: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels as usize], channels, sample_rate)
    }

    /// Check the buffer can be played
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.channels == 0 {
            return Err(LoadError::InvalidLayout("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(LoadError::InvalidLayout("zero sample rate".into()));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(LoadError::InvalidLayout(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        if self.samples.is_empty() {
            return Err(LoadError::Empty);
        }
        Ok(())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            ch => self.samples.len() / ch as usize,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Read a stereo pair at a fractional frame position
    ///
    /// Linear interpolation between neighbouring frames. Mono buffers return
    /// the same value on both sides; extra channels beyond two are ignored.
    /// Positions past the end read as silence.
    #[inline]
    pub fn frame_at(&self, position: f64) -> (f32, f32) {
        let frames = self.frames();
        if position < 0.0 || frames == 0 {
            return (0.0, 0.0);
        }
        let index = position.floor() as usize;
        if index >= frames {
            return (0.0, 0.0);
        }
        let frac = (position - index as f64) as f32;
        let a = self.read_frame(index);
        if frac == 0.0 || index + 1 >= frames {
            return a;
        }
        let b = self.read_frame(index + 1);
        (a.0 + (b.0 - a.0) * frac, a.1 + (b.1 - a.1) * frac)
    }

    #[inline]
    fn read_frame(&self, index: usize) -> (f32, f32) {
        let ch = self.channels as usize;
        let base = index * ch;
        let left = self.samples[base];
        let right = if ch > 1 { self.samples[base + 1] } else { left };
        (left, right)
    }
}

/// Thread-safe handle to a decoded buffer
pub type SharedBuffer = Arc<AudioBuffer>;
