// src/decoder/dsp.rs

pub fn append_interleaved_to_planar(
    interleaved: &[f32],
    planar: &mut [Vec<f32>],
    channels: usize,
) {
    if channels == 0 {
        return;
    }
    for row in interleaved.chunks_exact(channels) {
        for (ch, &s) in row.iter().enumerate() {
            planar[ch].push(s);
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

/// Fold a packet whose layout changed mid-stream onto the locked layout.
/// Downmixing averages the input channels that land on each output channel;
/// upmixing repeats input channels round-robin.
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }

    let mut out = Vec::with_capacity(input.len() / in_ch * out_ch);
    for row in input.chunks_exact(in_ch) {
        if out_ch < in_ch {
            let mut sums = vec![0.0f32; out_ch];
            let mut counts = vec![0usize; out_ch];
            for (ic, &s) in row.iter().enumerate() {
                let oc = ic * out_ch / in_ch;
                sums[oc] += s;
                counts[oc] += 1;
            }
            out.extend(sums.iter().zip(&counts).map(|(&sum, &n)| sum / n.max(1) as f32));
        } else {
            out.extend((0..out_ch).map(|oc| row[oc % in_ch]));
        }
    }
    out
}

#[inline]
pub fn fade_samples_ms(sample_rate: u32, ms: u32) -> usize {
    ((sample_rate as u64 * ms as u64) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_interleaved_frames() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[1.0, -1.0, 2.0, -2.0, 3.0], &mut planar, 2);
        assert_eq!(planar[0], vec![1.0, 2.0]);
        assert_eq!(planar[1], vec![-1.0, -2.0]);
        assert_eq!(planar_len(&planar), 2);
    }

    #[test]
    fn stereo_folds_to_mono() {
        assert_eq!(updown_mix_interleaved(&[1.0, 0.0, 0.5, 0.5], 2, 1), vec![0.5, 0.5]);
        assert_eq!(updown_mix_interleaved(&[0.25], 1, 2), vec![0.25, 0.25]);
    }

    #[test]
    fn surround_averages_into_halves() {
        let row = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        assert_eq!(updown_mix_interleaved(&row, 6, 2), vec![1.0, 0.0]);
        assert_eq!(updown_mix_interleaved(&[0.1, 0.2], 2, 3), vec![0.1, 0.2, 0.1]);
    }

    #[test]
    fn fade_length_in_samples() {
        assert_eq!(fade_samples_ms(48_000, 5), 240);
    }
}
