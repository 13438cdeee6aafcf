//! cpal output stream wrapper.
//!
//! Opens the default output device at the configured rate and buffer size
//! and drives the [`Mixer`] from the device callback. The callback only
//! de-interleaves: all synthesis work already happened on the producer
//! threads, the mixer just collects it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig};
use std::sync::Arc;
use thiserror::Error;

use crate::audio::mixer::Mixer;
use crate::config::AudioConfig;
use crate::rt::status::StatusCounters;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to query output configuration: {0}")]
    Config(String),
    #[error("unsupported sample format {0}")]
    UnsupportedFormat(String),
    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

pub struct AudioOutput {
    _stream: Stream,
    sample_rate: u32,
}

impl AudioOutput {
    /// Open the default device and start pulling from `mixer`.
    pub fn start(
        mixer: Mixer,
        cfg: &AudioConfig,
        status: Arc<StatusCounters>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Config(e.to_string()))?;

        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(cfg.sampling_frequency),
            buffer_size: BufferSize::Fixed(cfg.audio_buffer_size as u32),
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, mixer, status)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, mixer, status)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, mixer, status)?,
            other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        };

        stream.play()?;
        log::info!(
            "audio output running at {} Hz, {} frames per callback",
            cfg.sampling_frequency,
            cfg.audio_buffer_size
        );
        Ok(Self {
            _stream: stream,
            sample_rate: cfg.sampling_frequency,
        })
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut mixer: Mixer,
        status: Arc<StatusCounters>,
    ) -> Result<Stream, AudioError>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let max_block = mixer.max_frames();
        let mut left = vec![0.0f32; max_block];
        let mut right = vec![0.0f32; max_block];

        let err_fn = move |err: cpal::StreamError| {
            status.note_underrun();
            log::warn!("audio stream error: {err}");
        };

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                let mut offset = 0;
                while offset < frames {
                    let n = (frames - offset).min(max_block);
                    mixer.render(&mut left[..n], &mut right[..n]);
                    for f in 0..n {
                        let base = (offset + f) * channels;
                        data[base] = T::from_sample(left[f]);
                        for channel in 1..channels {
                            data[base + channel] = T::from_sample(right[f]);
                        }
                    }
                    offset += n;
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Names of the available output devices, for diagnostics.
pub fn list_output_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_devices_does_not_panic() {
        // CI machines may have no audio backend at all; both outcomes are
        // acceptable, the call just must not blow up.
        match list_output_devices() {
            Ok(devices) => log::info!("found {} output devices", devices.len()),
            Err(e) => log::info!("no devices: {e}"),
        }
    }
}
