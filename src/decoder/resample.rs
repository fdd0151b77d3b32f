// src/decoder/resample.rs

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::decoder::DecodedAudio;
use crate::error::DecodeError;

const CHUNK_SIZE: usize = 1024;
/// Where the calibration impulse sits in its input, in source frames.
const IMPULSE_AT: usize = CHUNK_SIZE / 2;

fn resample_err(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Resample(e.to_string())
}

pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>, DecodeError> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let r = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, channels).map_err(resample_err)?;
    Ok(Some(r))
}

fn append_block(out: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(block) {
        dst.extend_from_slice(&src);
    }
}

/// Output frames a converter built by `build_resampler` shifts its signal
/// by, measured by running an impulse through one.
pub fn measure_latency(src_rate: u32, dst_rate: u32) -> Result<usize, DecodeError> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, 1)? else {
        return Ok(0);
    };
    let ratio = dst_rate as f64 / src_rate as f64;

    let mut input = vec![0.0f32; CHUNK_SIZE * 4];
    input[IMPULSE_AT] = 1.0;

    let mut out: Vec<f32> = Vec::new();
    let mut pos = 0usize;
    loop {
        let need = resampler.input_frames_next();
        if pos + need > input.len() {
            break;
        }
        let block = [&input[pos..pos + need]];
        let processed = resampler.process(&block[..], None).map_err(resample_err)?;
        out.extend_from_slice(&processed[0]);
        pos += need;
    }
    // Flush with silence so a long filter still gets the impulse out
    for _ in 0..4 {
        let processed = resampler.process_partial::<Vec<f32>>(None, None).map_err(resample_err)?;
        out.extend_from_slice(&processed[0]);
    }

    let peak = out
        .iter()
        .enumerate()
        .fold((0usize, 0.0f32), |best, (i, &v)| if v.abs() > best.1 { (i, v.abs()) } else { best })
        .0;
    let expected = (IMPULSE_AT as f64 * ratio).round() as usize;
    Ok(peak.saturating_sub(expected))
}

/// Convert a whole decoded track to `target_rate`, so every route on the
/// output device can start at the same frame. The converter's measured
/// latency is trimmed off, keeping offset 0 aligned with the source's first
/// sample.
pub fn resample_to(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let channels = audio.channel_count();
    if channels == 0 || target_rate == 0 {
        return Err(DecodeError::Empty);
    }
    let Some(mut resampler) = build_resampler(audio.sample_rate, target_rate, channels)? else {
        return Ok(audio);
    };

    let frames = audio.frames();
    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    let delay = measure_latency(audio.sample_rate, target_rate)?;

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay + CHUNK_SIZE); channels];

    // 1. Full chunks straight from the source slices
    let mut pos = 0usize;
    loop {
        let need = resampler.input_frames_next();
        if pos + need > frames {
            break;
        }
        let block: Vec<&[f32]> = audio.channels.iter().map(|c| &c[pos..pos + need]).collect();
        append_block(&mut out, resampler.process(&block, None).map_err(resample_err)?);
        pos += need;
    }

    // 2. The partial tail
    if pos < frames {
        let block: Vec<&[f32]> = audio.channels.iter().map(|c| &c[pos..frames]).collect();
        append_block(&mut out, resampler.process_partial(Some(block.as_slice()), None).map_err(resample_err)?);
    }

    // 3. Flush the filter until the delayed signal is complete
    while out[0].len() < expected + delay {
        let block = resampler.process_partial::<Vec<f32>>(None, None).map_err(resample_err)?;
        if block.first().map(|b| b.is_empty()).unwrap_or(true) {
            break;
        }
        append_block(&mut out, block);
    }

    for ch in &mut out {
        let skip = delay.min(ch.len());
        ch.drain(..skip);
        ch.truncate(expected);
    }

    Ok(DecodedAudio::new(out, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_untouched() {
        let audio = DecodedAudio::new(vec![vec![0.1, 0.2, 0.3]], 48_000);
        assert_eq!(resample_to(audio.clone(), 48_000).unwrap(), audio);
    }

    #[test]
    fn upsampling_keeps_duration() {
        let frames = 44_100;
        let sine: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 44_100.0).sin() * 0.5)
            .collect();
        let audio = DecodedAudio::new(vec![sine.clone(), sine], 44_100);

        let out = resample_to(audio, 48_000).unwrap();
        assert_eq!(out.sample_rate, 48_000);
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.frames(), 48_000);
        assert!((out.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn delay_is_compensated() {
        // An impulse at 0.5s must stay near 0.5s after conversion.
        let mut x = vec![0.0f32; 22_050];
        x[11_025] = 1.0;
        let out = resample_to(DecodedAudio::new(vec![x], 22_050), 44_100).unwrap();
        let peak = peak_index(&out.channels[0]);
        assert!((peak as i64 - 22_050).abs() <= 1, "peak at {peak}");
    }

    fn peak_index(samples: &[f32]) -> usize {
        samples
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &v)| if v.abs() > best.1 { (i, v.abs()) } else { best })
            .0
    }

    #[test]
    fn click_stays_on_its_beat_at_device_rate() {
        // 44.1k click next to a 48k stem: the onset must land on the same frame
        let mut x = vec![0.0f32; 44_100];
        x[22_050] = 1.0;
        let out = resample_to(DecodedAudio::new(vec![x], 44_100), 48_000).unwrap();
        let peak = peak_index(&out.channels[0]);
        assert!((peak as i64 - 24_000).abs() <= 1, "peak at {peak}");
    }

    #[test]
    fn latency_is_zero_without_conversion() {
        assert_eq!(measure_latency(48_000, 48_000).unwrap(), 0);
    }
}
