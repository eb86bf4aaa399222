//! File decoding with symphonia
//!
//! Decodes a whole stem into memory as interleaved f32 at its native sample
//! rate. Resampling to the device rate happens at render time.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::buffer::AudioBuffer;
use crate::codec::AssetLoader;
use crate::error::DecodeError;

/// Loads sources as file paths relative to a root directory
#[derive(Debug, Clone)]
pub struct SymphoniaLoader {
    root: PathBuf,
}

impl SymphoniaLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a source reference against the root
    pub fn resolve(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetLoader for SymphoniaLoader {
    fn load_buffer(&self, source: &str) -> Result<AudioBuffer, DecodeError> {
        decode_file(&self.resolve(source))
    }
}

/// Decode an audio file completely
pub fn decode_file(path: &Path) -> Result<AudioBuffer, DecodeError> {
    let path_str = path.display().to_string();
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DecodeError::NotFound(path_str.clone()),
        _ => DecodeError::DecodingFailed(format!("{}: {}", path_str, e)),
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::UnsupportedFormat(format!("{}: {}", path_str, e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| DecodeError::NoAudioTrack(path_str.clone()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat(format!("{}: unknown sample rate", path_str)))?;
    let mut channels = codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("{}: {}", path_str, e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut buf_frames = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::DecodingFailed(format!("{}: {}", path_str, e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_buf.is_none() || decoded.capacity() > buf_frames {
                    buf_frames = decoded.capacity();
                    channels = spec.channels.count() as u16;
                    sample_buf = Some(SampleBuffer::new(buf_frames as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet, keep going
                tracing::debug!("Skipping undecodable packet in {}: {}", path_str, e);
            }
            Err(e) => return Err(DecodeError::DecodingFailed(format!("{}: {}", path_str, e))),
        }
    }

    if channels == 0 || samples.is_empty() {
        return Err(DecodeError::NoAudioTrack(path_str));
    }

    tracing::debug!(
        "Decoded {}: {} Hz, {} channels, {} samples",
        path_str,
        sample_rate,
        channels,
        samples.len()
    );

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_found() {
        let loader = SymphoniaLoader::new("/definitely/not/here");
        let err = loader.load_buffer("missing.mp3").unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let loader = SymphoniaLoader::new("/srv/session");
        assert_eq!(
            loader.resolve("audio/Cello.mp3"),
            PathBuf::from("/srv/session/audio/Cello.mp3")
        );
        assert_eq!(loader.resolve("/tmp/x.wav"), PathBuf::from("/tmp/x.wav"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let path = std::env::temp_dir().join(format!("stem-mixer-garbage-{}.wav", std::process::id()));
        std::fs::write(&path, b"this is not audio").unwrap();
        let result = decode_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }

    /// 16-bit PCM WAV with every sample set to `value`
    fn pcm_wav(frames: u32, channels: u16, sample_rate: u32, value: i16) -> Vec<u8> {
        let block_align = channels * 2;
        let data_len = frames * block_align as u32;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        wav.extend_from_slice(&block_align.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames * channels as u32 {
            wav.extend_from_slice(&value.to_le_bytes());
        }
        wav
    }

    #[test]
    fn test_decodes_pcm_wav() {
        let dir = std::env::temp_dir().join(format!("stem-mixer-wav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tone.wav"), pcm_wav(800, 2, 8000, 16384)).unwrap();

        let result = SymphoniaLoader::new(dir.clone()).load_buffer("tone.wav");
        let _ = std::fs::remove_dir_all(&dir);
        let buffer = result.unwrap();

        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.frames(), 800);
        assert!((buffer.duration() - 0.1).abs() < 1e-9);
        assert!(buffer.validate().is_ok());
        assert!(buffer.samples().iter().all(|s| (s - 0.5).abs() < 1e-4));
    }
}
