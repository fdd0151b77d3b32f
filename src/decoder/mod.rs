// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};

use crate::error::DecodeError;

pub use resample::resample_to;

/// A fully decoded track: one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames every channel has data for.
    pub fn frames(&self) -> usize {
        dsp::planar_len(&self.channels)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn first_channel(&self) -> Option<&[f32]> {
        self.channels.first().map(|c| c.as_slice())
    }
}

pub fn decode(bytes: Vec<u8>) -> Result<DecodedAudio, DecodeError> {
    decode_cancellable(bytes, &AtomicBool::new(false))
}

/// Decode a whole file held in memory. `cancel` is checked between packets so
/// a superseded song load stops burning CPU.
pub fn decode_cancellable(bytes: Vec<u8>, cancel: &AtomicBool) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = get_probe().format(
        &Default::default(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut planar: Vec<Vec<f32>> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = 0usize;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(DecodeError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if channels > 0 => {
                // Truncated tail: keep what decoded cleanly
                log::warn!("Stopping decode early: {e}");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("Skipping corrupt packet: {msg}");
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();

        // 1. Lock the layout on the first packet that carries frames
        if channels == 0 {
            if decoded.frames() == 0 || packet_channels == 0 {
                continue;
            }
            channels = packet_channels;
            sample_rate = spec.rate;
            planar = vec![Vec::new(); channels];
        }

        // 2. Prepare buffer
        let too_small = sample_buf
            .as_ref()
            .map(|b| b.capacity() < decoded.capacity())
            .unwrap_or(true);
        if too_small {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        // 3. Packets with a different layout get folded onto the locked one
        if packet_channels == channels {
            dsp::append_interleaved_to_planar(buf.samples(), &mut planar, channels);
        } else {
            let mixed = dsp::updown_mix_interleaved(buf.samples(), packet_channels, channels);
            dsp::append_interleaved_to_planar(&mixed, &mut planar, channels);
        }
    }

    let audio = DecodedAudio::new(planar, sample_rate);
    if audio.channel_count() == 0 || audio.frames() == 0 || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    log::debug!(
        "Decoded {} frames | {:.2}s | {}Hz {}ch",
        audio.frames(),
        audio.duration_secs(),
        audio.sample_rate,
        audio.channel_count()
    );
    Ok(audio)
}
