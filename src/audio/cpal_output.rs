//! CPAL device sink
//!
//! Opens the default output device at the decoded format and lets the
//! device callback pull straight from the ring through [`DevicePull`].

use super::output::DevicePull;
use super::sink::AudioSink;
use crate::utils::error::{IntoPlaybackError, PlaybackError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use log::{error, info};

/// Output stream on the default device
pub struct CpalSink {
    stream: Stream,
    device_name: String,
}

impl CpalSink {
    /// Open the default output device; the stream starts paused
    pub fn open(pull: DevicePull) -> Result<Self> {
        let format = pull.format();
        let host = cpal::default_host();
        let device = host.default_output_device()
            .ok_or_else(|| PlaybackError::Audio("No default output device found".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| pull.pull(data),
            |err| error!("Audio stream error: {}", err),
            None,
        ).audio_err("Failed to create audio stream")?;

        stream.pause().audio_err("Failed to pause new audio stream")?;

        info!(
            "Audio device '{}' opened at {} Hz, {} channels",
            device_name, format.sample_rate, format.channels
        );
        Ok(Self { stream, device_name })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioSink for CpalSink {
    fn set_paused(&mut self, paused: bool) -> Result<()> {
        if paused {
            self.stream.pause().audio_err("Failed to pause audio stream")
        } else {
            self.stream.play().audio_err("Failed to start audio stream")
        }
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
