// src/bpm/detector.rs
//
// Click-track tempo detection: amplitude peak picking, inter-onset interval
// clustering and octave folding. Pure and deterministic.
//
// Resolution limit: peaks closer than `min_peak_spacing` samples are merged,
// so the detector can't see more than `sample_rate / min_peak_spacing`
// onsets per second (~43/s at 44.1kHz with the default spacing).

use serde::{Deserialize, Serialize};

use crate::bpm::utils::{dominant_interval, fold_bpm, pick_peaks, rms};
use crate::engine::time::{position_for_beats_per_bar, BeatValue, MusicalPosition, TempoMap, TimeSignature};

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 60.0;
/// Exclusive upper bound of the folded tempo range.
pub const MAX_BPM: f64 = 200.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpmOptions {
    /// Peak threshold as a multiple of the signal RMS.
    pub threshold: f32,
    /// Minimum distance between two accepted peaks, in samples.
    pub min_peak_spacing: usize,
    /// Intervals closer than this (seconds) count as the same beat length.
    pub interval_tolerance: f64,
    /// Below this RMS the input is treated as silence.
    pub silence_threshold: f32,
    pub time_signature: TimeSignature,
    pub beat_value: BeatValue,
}

impl Default for BpmOptions {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            min_peak_spacing: 1024,
            interval_tolerance: 0.01,
            silence_threshold: 1e-5,
            time_signature: TimeSignature::default(),
            beat_value: BeatValue::default(),
        }
    }
}

impl BpmOptions {
    /// Song metadata wins over the configured meter.
    pub fn with_song_metadata(mut self, signature: Option<TimeSignature>, beat_value: Option<BeatValue>) -> Self {
        if let Some(sig) = signature {
            self.time_signature = sig;
        }
        if let Some(bv) = beat_value {
            self.beat_value = bv;
        }
        self
    }

    /// How many counted beats one beat-value note spans.
    pub fn beat_ratio(&self) -> f64 {
        (self.beat_value.denominator as f64 / self.time_signature.denominator as f64)
            * self.beat_value.numerator as f64
    }

    /// Bar length expressed in beat-value units.
    pub fn beats_per_measure(&self) -> f64 {
        self.time_signature.numerator as f64
            * (self.time_signature.denominator as f64 / self.beat_value.denominator as f64)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub beat_value: BeatValue,
}

impl TempoEstimate {
    pub fn fallback(opts: &BpmOptions) -> Self {
        Self {
            bpm: DEFAULT_BPM,
            time_signature: opts.time_signature,
            beat_value: opts.beat_value,
        }
    }

    pub fn tempo_map(&self) -> TempoMap {
        TempoMap::new(self.bpm, self.time_signature, self.beat_value)
    }
}

impl Default for TempoEstimate {
    fn default() -> Self {
        Self::fallback(&BpmOptions::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BeatMarker {
    /// Onset time in seconds.
    pub time: f64,
    pub position: MusicalPosition,
}

/// Detected onsets in time order. Empty means "no beat grid".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BeatTimeline {
    pub markers: Vec<BeatMarker>,
}

impl BeatTimeline {
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn times(&self) -> Vec<f64> {
        self.markers.iter().map(|m| m.time).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DegenerateReason {
    EmptyInput,
    Silent,
    TooFewOnsets(usize),
    UnstableTempo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AnalysisStatus {
    Detected,
    /// Analysis fell back to the default estimate. Not an error.
    Degenerate(DegenerateReason),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BpmResult {
    pub tempo: TempoEstimate,
    pub beats: BeatTimeline,
    pub status: AnalysisStatus,
}

impl BpmResult {
    pub fn fallback(opts: &BpmOptions, reason: DegenerateReason) -> Self {
        Self {
            tempo: TempoEstimate::fallback(opts),
            beats: BeatTimeline::default(),
            status: AnalysisStatus::Degenerate(reason),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.status == AnalysisStatus::Detected
    }
}

impl Default for BpmResult {
    fn default() -> Self {
        Self::fallback(&BpmOptions::default(), DegenerateReason::EmptyInput)
    }
}

/// Analyze a mono click signal. Never fails: anything that can't produce a
/// tempo returns the 120 BPM default with an empty timeline.
pub fn analyze(samples: &[f32], sample_rate: u32, opts: &BpmOptions) -> BpmResult {
    if samples.is_empty() || sample_rate == 0 {
        return BpmResult::fallback(opts, DegenerateReason::EmptyInput);
    }

    // 1. Loudness reference
    let level = rms(samples);
    if !(level >= opts.silence_threshold) {
        return BpmResult::fallback(opts, DegenerateReason::Silent);
    }

    // 2-3. Peak picking against an RMS-relative threshold
    let threshold = opts.threshold * level;
    let peaks = pick_peaks(samples, threshold, opts.min_peak_spacing.max(1));
    if peaks.len() < 2 {
        return BpmResult::fallback(opts, DegenerateReason::TooFewOnsets(peaks.len()));
    }

    let sr = sample_rate as f64;
    let onsets: Vec<f64> = peaks.iter().map(|&i| i as f64 / sr).collect();

    // 4-6. Most common inter-onset interval
    let intervals: Vec<f64> = onsets.windows(2).map(|w| w[1] - w[0]).collect();
    let Some(dominant) = dominant_interval(&intervals, opts.interval_tolerance) else {
        return BpmResult::fallback(opts, DegenerateReason::TooFewOnsets(peaks.len()));
    };

    // 7-8. Interval -> BPM in the song's beat unit, folded into range
    let raw_bpm = (60.0 / (dominant * opts.beat_ratio())).round();
    let Some(bpm) = fold_bpm(raw_bpm, MIN_BPM, MAX_BPM) else {
        return BpmResult::fallback(opts, DegenerateReason::UnstableTempo);
    };

    // 9. Place every onset on the musical grid using the final tempo
    let beats_per_measure = opts.beats_per_measure();
    let markers = onsets
        .into_iter()
        .map(|time| BeatMarker {
            time,
            position: position_for_beats_per_bar(time, bpm, beats_per_measure),
        })
        .collect();

    BpmResult {
        tempo: TempoEstimate {
            bpm,
            time_signature: opts.time_signature,
            beat_value: opts.beat_value,
        },
        beats: BeatTimeline { markers },
        status: AnalysisStatus::Detected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    /// Short decaying clicks at the given times.
    fn click_track(times: &[f64], total_secs: f64) -> Vec<f32> {
        let mut out = vec![0.0f32; (total_secs * SR as f64) as usize];
        for &t in times {
            let start = (t * SR as f64).round() as usize;
            for k in 0..200 {
                if let Some(s) = out.get_mut(start + k) {
                    *s = 0.9 * (1.0 - k as f32 / 200.0);
                }
            }
        }
        out
    }

    fn periodic(period: f64, count: usize, offset: f64) -> Vec<f64> {
        (0..count).map(|i| offset + i as f64 * period).collect()
    }

    #[test]
    fn four_clicks_half_a_second_apart() {
        let samples = click_track(&[0.5, 1.0, 1.5, 2.0], 2.5);
        let res = analyze(&samples, SR, &BpmOptions::default());

        assert!(res.is_detected());
        assert_eq!(res.tempo.bpm, 120.0);
        assert_eq!(res.beats.times(), vec![0.5, 1.0, 1.5, 2.0]);
        assert_eq!(res.beats.markers[0].position, MusicalPosition::new(1, 2, 1));
        assert_eq!(res.beats.markers[3].position, MusicalPosition::new(2, 1, 1));
    }

    #[test]
    fn silence_returns_default() {
        let res = analyze(&vec![0.0; SR as usize], SR, &BpmOptions::default());
        assert_eq!(res.tempo.bpm, 120.0);
        assert!(res.beats.is_empty());
        assert_eq!(res.status, AnalysisStatus::Degenerate(DegenerateReason::Silent));
    }

    #[test]
    fn near_silent_noise_returns_default() {
        let samples: Vec<f32> = (0..SR).map(|i| if i % 2 == 0 { 1e-7 } else { -1e-7 }).collect();
        let res = analyze(&samples, SR, &BpmOptions::default());
        assert_eq!(res.tempo.bpm, 120.0);
        assert!(res.beats.is_empty());
    }

    #[test]
    fn empty_and_zero_rate_fall_back() {
        let opts = BpmOptions::default();
        assert_eq!(analyze(&[], SR, &opts).status, AnalysisStatus::Degenerate(DegenerateReason::EmptyInput));
        assert_eq!(analyze(&[1.0, 0.0], 0, &opts).status, AnalysisStatus::Degenerate(DegenerateReason::EmptyInput));
    }

    #[test]
    fn single_click_is_too_few_onsets() {
        let samples = click_track(&[0.3], 1.0);
        let res = analyze(&samples, SR, &BpmOptions::default());
        assert_eq!(res.status, AnalysisStatus::Degenerate(DegenerateReason::TooFewOnsets(1)));
        assert_eq!(res.tempo.bpm, 120.0);
    }

    #[test]
    fn recovers_periodic_tempi_after_folding() {
        // (period, expected bpm)
        let cases = [(0.6, 100.0), (0.75, 80.0), (0.4, 150.0), (1.5, 80.0), (0.25, 120.0), (2.5, 96.0)];
        for (period, expected) in cases {
            let times = periodic(period, 12, 0.1);
            let samples = click_track(&times, 0.2 + period * 12.0);
            let res = analyze(&samples, SR, &BpmOptions::default());
            assert_eq!(res.tempo.bpm, expected, "period {period}");
            assert_eq!(res.beats.len(), 12, "period {period}");
        }
    }

    #[test]
    fn folded_bpm_always_in_range() {
        for period in [0.05, 0.1, 0.17, 0.29, 0.31, 0.9, 1.1, 3.7] {
            let times = periodic(period, 8, 0.05);
            let samples = click_track(&times, 0.1 + period * 8.0);
            let res = analyze(&samples, SR, &BpmOptions::default());
            assert!(res.is_detected(), "period {period}");
            assert!(res.tempo.bpm >= MIN_BPM && res.tempo.bpm < MAX_BPM, "period {period} -> {}", res.tempo.bpm);
        }
    }

    #[test]
    fn beat_value_scales_tempo() {
        // Clicks every 0.5s counted in eighths of a 6/8 bar.
        let opts = BpmOptions::default()
            .with_song_metadata(Some("6/8".parse().unwrap()), Some("1/8".parse().unwrap()));
        assert_eq!(opts.beat_ratio(), 1.0);
        assert_eq!(opts.beats_per_measure(), 6.0);

        let samples = click_track(&periodic(0.5, 6, 0.0), 3.2);
        let res = analyze(&samples, SR, &opts);
        assert_eq!(res.tempo.bpm, 120.0);
        assert_eq!(res.tempo.time_signature.numerator, 6);
        assert_eq!(res.beats.markers[5].position, MusicalPosition::new(1, 6, 1));
    }

    #[test]
    fn quarter_value_in_eighth_meter_halves_ratio() {
        let opts = BpmOptions::default()
            .with_song_metadata(Some("6/8".parse().unwrap()), Some("1/4".parse().unwrap()));
        assert_eq!(opts.beat_ratio(), 0.5);
        // 0.5s interval * 0.5 -> 240 raw, folds to 120
        let samples = click_track(&periodic(0.5, 5, 0.0), 2.7);
        assert_eq!(analyze(&samples, SR, &opts).tempo.bpm, 120.0);
    }

    #[test]
    fn deterministic_output() {
        let samples = click_track(&periodic(0.47, 10, 0.2), 5.0);
        let opts = BpmOptions::default();
        assert_eq!(analyze(&samples, SR, &opts), analyze(&samples, SR, &opts));
    }
}
