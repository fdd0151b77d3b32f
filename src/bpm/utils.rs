// src/bpm/utils.rs

/// RMS over the whole slice. Accumulates in f64 so long stems don't lose
/// precision.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sum_sq = 0.0_f64;
    for &s in samples {
        sum_sq += (s as f64) * (s as f64);
    }
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Indices of samples louder than `threshold`, at least `min_spacing`
/// samples apart. The very first sample is already eligible.
pub fn pick_peaks(samples: &[f32], threshold: f32, min_spacing: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;

    for (i, &s) in samples.iter().enumerate() {
        if s.abs() <= threshold {
            continue;
        }
        let spaced = match last_peak {
            Some(last) => i - last >= min_spacing,
            None => true,
        };
        if spaced {
            peaks.push(i);
            last_peak = Some(i);
        }
    }
    peaks
}

#[derive(Debug, Clone, Copy)]
struct IntervalGroup {
    count: usize,
    sum: f64,
}

impl IntervalGroup {
    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Mode-like interval with tolerance. Each interval joins the first group
/// whose running mean is within `tolerance`, otherwise it opens a new group.
/// The first group to exceed the current maximum count wins, so ties keep the
/// earlier group.
pub fn dominant_interval(intervals: &[f64], tolerance: f64) -> Option<f64> {
    let first = *intervals.first()?;

    let mut groups: Vec<IntervalGroup> = Vec::new();
    let mut max_count = 0usize;
    let mut dominant = first;

    for &interval in intervals {
        let idx = match groups.iter().position(|g| (interval - g.mean()).abs() < tolerance) {
            Some(idx) => {
                groups[idx].count += 1;
                groups[idx].sum += interval;
                idx
            }
            None => {
                groups.push(IntervalGroup { count: 1, sum: interval });
                groups.len() - 1
            }
        };

        if groups[idx].count > max_count {
            max_count = groups[idx].count;
            dominant = groups[idx].mean();
        }
    }

    Some(dominant)
}

/// Octave-fold a tempo into `[min, max)`. `None` for values that can't be
/// folded (zero, negative, non-finite).
pub fn fold_bpm(raw: f64, min: f64, max: f64) -> Option<f64> {
    if !raw.is_finite() || raw <= 0.0 || !(min > 0.0) || !(max > min) {
        return None;
    }
    let mut bpm = raw;
    while bpm < min {
        bpm *= 2.0;
    }
    while bpm >= max {
        bpm /= 2.0;
    }
    Some(bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn peaks_respect_spacing() {
        let mut x = vec![0.0f32; 4000];
        x[0] = 1.0;
        x[10] = 1.0; // too close to the first one
        x[1500] = -1.0;
        x[2000] = 1.0; // only 500 after the previous peak
        x[2600] = 1.0;
        assert_eq!(pick_peaks(&x, 0.5, 1024), vec![0, 1500, 2600]);
    }

    #[test]
    fn dominant_interval_prefers_largest_group() {
        let intervals = [0.5, 0.25, 0.502, 0.498, 0.25, 0.5];
        let d = dominant_interval(&intervals, 0.01).unwrap();
        assert!((d - 0.5).abs() < 0.005);
    }

    #[test]
    fn dominant_interval_tie_keeps_first_group() {
        // Both groups end with two members, the 0.4 group got there first.
        let intervals = [0.4, 0.4, 0.3, 0.3];
        let d = dominant_interval(&intervals, 0.01).unwrap();
        assert!((d - 0.4).abs() < 1e-12);
    }

    #[test]
    fn all_distinct_intervals_use_the_first() {
        let d = dominant_interval(&[0.7, 0.2, 0.45], 0.01).unwrap();
        assert!((d - 0.7).abs() < 1e-12);
        assert!(dominant_interval(&[], 0.01).is_none());
    }

    #[test]
    fn folding_stays_in_range() {
        assert_eq!(fold_bpm(30.0, 60.0, 200.0), Some(60.0));
        assert_eq!(fold_bpm(200.0, 60.0, 200.0), Some(100.0));
        assert_eq!(fold_bpm(450.0, 60.0, 200.0), Some(112.5));
        assert_eq!(fold_bpm(120.0, 60.0, 200.0), Some(120.0));
        assert_eq!(fold_bpm(0.0, 60.0, 200.0), None);
        assert_eq!(fold_bpm(f64::INFINITY, 60.0, 200.0), None);
    }
}
