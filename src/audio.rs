// src/audio.rs

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};

use crate::decoder::DecodedAudio;
use crate::engine::{AudioOutput, AudioRoute, MixerOutput};
use crate::error::{RehearsalError, Result};

/// Helper struct to hold output device info
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

fn device_err(e: impl std::fmt::Display) -> RehearsalError {
    RehearsalError::Device(e.to_string())
}

/// Finds the default audio output device and its config.
pub fn setup_output_device() -> Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| RehearsalError::Device("no output device available".into()))?;
    let supported_config = device.default_output_config().map_err(device_err)?;
    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    log::info!(
        "🔊 Output device: {} | channels: {}, sample_rate: {:?}, format: {:?}",
        device.name().unwrap_or_else(|_| "<unnamed>".into()),
        output_channels,
        config.sample_rate,
        sample_format
    );

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

/// The default output device driving a `VoiceMixer` from its callback.
pub struct CpalOutput {
    inner: MixerOutput,
    channels: usize,
    _stream: Stream,
}

impl CpalOutput {
    pub fn open() -> Result<Self> {
        let OutputConfig { device, config, sample_format, output_channels, output_sample_rate } =
            setup_output_device()?;

        if sample_format != SampleFormat::F32 {
            return Err(RehearsalError::Device(format!(
                "unsupported sample format {sample_format:?}, only f32 devices are handled"
            )));
        }

        let (inner, mut mixer) = MixerOutput::new(output_sample_rate);
        let channels = output_channels;
        let err_fn = |err| log::error!("Output stream error: {err}");

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mixer.render(data, channels);
                },
                err_fn,
                None,
            )
            .map_err(device_err)?;
        stream.play().map_err(device_err)?;

        Ok(Self { inner, channels, _stream: stream })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.inner.now()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn advance_epoch(&mut self) -> u64 {
        self.inner.advance_epoch()
    }

    fn create_route(&mut self, audio: Arc<DecodedAudio>) -> Result<Box<dyn AudioRoute>> {
        self.inner.create_route(audio)
    }

    fn collect_garbage(&mut self) {
        self.inner.collect_garbage();
    }
}
