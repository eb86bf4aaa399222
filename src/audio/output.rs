//! Audio output of the master mix
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform) and pulls blocks from the shared [`Mixer`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{get_default_output_device, get_output_device, AudioDevice};
use crate::audio::mixer::Mixer;
use crate::error::AudioError;

/// Output stream playing the master mix on one device
pub struct AudioOutput {
    /// Device identifier, `None` for the default device
    device_id: Option<String>,

    /// Whether the stream is running
    running: Arc<AtomicBool>,

    /// Render graph the stream pulls from
    mixer: Arc<Mixer>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Stream configuration
    config: StreamConfig,

    sample_format: SampleFormat,
}

impl AudioOutput {
    /// Prepare an output on `device_id` (or the default output device)
    pub fn new(
        device_id: Option<&str>,
        sample_rate: Option<u32>,
        buffer_size: Option<u32>,
        mixer: Arc<Mixer>,
    ) -> Result<Self, AudioError> {
        let device = resolve_device(device_id)?;
        let default_config = device.default_output_config()?;

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: sample_rate
                .map(cpal::SampleRate)
                .unwrap_or_else(|| default_config.sample_rate()),
            buffer_size: match buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        Ok(Self {
            device_id: device_id.map(str::to_string),
            running: Arc::new(AtomicBool::new(false)),
            mixer,
            thread_handle: None,
            error_rx: None,
            config,
            sample_format: default_config.sample_format(),
        })
    }

    /// Open the stream and start pulling from the mixer
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = resolve_device(self.device_id.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let mixer = self.mixer.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("stem-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream_errors = error_tx.clone();
                let stream = match sample_format {
                    SampleFormat::F32 => build_stream::<f32>(
                        &cpal_device,
                        &config,
                        mixer,
                        running.clone(),
                        stream_errors,
                    ),
                    SampleFormat::I16 => build_stream::<i16>(
                        &cpal_device,
                        &config,
                        mixer,
                        running.clone(),
                        stream_errors,
                    ),
                    SampleFormat::U16 => build_stream::<u16>(
                        &cpal_device,
                        &config,
                        mixer,
                        running.clone(),
                        stream_errors,
                    ),
                    other => {
                        report_failure(
                            &error_tx,
                            AudioError::UnsupportedFormat(format!("{:?}", other)),
                        );
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            report_failure(&error_tx, AudioError::StreamError(e.to_string()));
                            running.store(false, Ordering::SeqCst);
                            return;
                        }

                        while running.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                        report_failure(&error_tx, e);
                        running.store(false, Ordering::SeqCst);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hand a stream thread failure to `check_errors`
fn report_failure(errors: &Sender<AudioError>, error: AudioError) {
    if errors.try_send(error).is_err() {
        tracing::warn!("Output error queue full, dropping error");
    }
}

fn resolve_device(device_id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match device_id {
        Some(id) => get_output_device(id),
        None => get_default_output_device(),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
    running: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(T::EQUILIBRIUM);
                    return;
                }
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let block = &mut scratch[..data.len()];
                mixer.render(block, channels, sample_rate);
                for (dst, src) in data.iter_mut().zip(block.iter()) {
                    *dst = T::from_sample(*src);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}
