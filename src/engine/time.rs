// src/engine/time.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SIXTEENTHS_PER_BEAT: u64 = 4;

/// Bars shown at once on the rehearsal timeline.
pub const VISIBLE_MEASURES: u32 = 12;

// Float error from `t * bpm / 60 * 4` can land a grid line a hair below its
// own sixteenth. This guard is far below any audible or visible distance.
const SIXTEENTH_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid fraction {0:?} (expected something like \"4/4\")")]
pub struct FractionParseError(pub String);

fn parse_fraction(s: &str) -> Result<(u32, u32), FractionParseError> {
    let err = || FractionParseError(s.to_string());
    let (num, den) = s.trim().split_once('/').ok_or_else(err)?;
    let num: u32 = num.trim().parse().map_err(|_| err())?;
    let den: u32 = den.trim().parse().map_err(|_| err())?;
    if num == 0 || den == 0 {
        return Err(err());
    }
    Ok((num, den))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub numerator: u32,   // beats per bar, e.g. 4
    pub denominator: u32, // beat unit, e.g. 4
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

impl FromStr for TimeSignature {
    type Err = FractionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = parse_fraction(s)?;
        Ok(Self { numerator, denominator })
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = FractionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(sig: TimeSignature) -> Self {
        sig.to_string()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// The note value one counted beat stands for, e.g. 1/4 or 1/8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BeatValue {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for BeatValue {
    fn default() -> Self {
        Self { numerator: 1, denominator: 4 }
    }
}

impl FromStr for BeatValue {
    type Err = FractionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = parse_fraction(s)?;
        Ok(Self { numerator, denominator })
    }
}

impl TryFrom<String> for BeatValue {
    type Error = FractionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BeatValue> for String {
    fn from(value: BeatValue) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BeatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A 1-indexed bar:beat:sixteenth coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    pub sixteenth: u32,
}

impl MusicalPosition {
    pub const START: MusicalPosition = MusicalPosition { bar: 1, beat: 1, sixteenth: 1 };

    pub fn new(bar: u32, beat: u32, sixteenth: u32) -> Self {
        Self { bar, beat, sixteenth }
    }
}

impl Default for MusicalPosition {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bar, self.beat, self.sixteenth)
    }
}

fn sixteenths_per_bar(beats_per_bar: f64) -> u64 {
    ((beats_per_bar * SIXTEENTHS_PER_BEAT as f64).round() as u64).max(1)
}

/// Seconds -> bar:beat:sixteenth with the bar length given in beats.
/// `beats_per_bar` may be fractional (the analyzer measures bars in
/// beat-value units, so 3/4 counted in eighths gives 1.5 quarter beats).
pub fn position_for_beats_per_bar(seconds: f64, bpm: f64, beats_per_bar: f64) -> MusicalPosition {
    if !(bpm > 0.0) || !seconds.is_finite() || !(beats_per_bar > 0.0) {
        return MusicalPosition::START;
    }

    let total_beats = seconds.max(0.0) * bpm / 60.0;
    let total_sixteenths =
        (total_beats * SIXTEENTHS_PER_BEAT as f64 + SIXTEENTH_EPSILON).floor() as u64;

    let per_bar = sixteenths_per_bar(beats_per_bar);
    let bar = total_sixteenths / per_bar + 1;
    let remaining = total_sixteenths % per_bar;

    MusicalPosition {
        bar: bar as u32,
        beat: (remaining / SIXTEENTHS_PER_BEAT) as u32 + 1,
        sixteenth: (remaining % SIXTEENTHS_PER_BEAT) as u32 + 1,
    }
}

pub fn seconds_to_musical(seconds: f64, bpm: f64, signature: TimeSignature) -> MusicalPosition {
    position_for_beats_per_bar(seconds, bpm, signature.numerator as f64)
}

/// Inverse of [`seconds_to_musical`]: the time of the grid line where the
/// given sixteenth starts.
pub fn musical_to_seconds(position: MusicalPosition, bpm: f64, signature: TimeSignature) -> f64 {
    if !(bpm > 0.0) {
        return 0.0;
    }
    let per_bar = sixteenths_per_bar(signature.numerator as f64);
    let bars = position.bar.max(1) as u64 - 1;
    let beats = position.beat.max(1) as u64 - 1;
    let sixteenths = position.sixteenth.max(1) as u64 - 1;

    let total_sixteenths = bars * per_bar + beats * SIXTEENTHS_PER_BEAT + sixteenths;
    (total_sixteenths as f64 / SIXTEENTHS_PER_BEAT as f64) * 60.0 / bpm
}

/// Holds data for a single grid line on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLine {
    /// The exact time in seconds corresponding to this line.
    pub time: f64,
    /// Is this line the very start of a bar? (e.g., 1:1:1, 2:1:1)
    pub is_bar_start: bool,
    /// The human-readable bar number (1-indexed).
    pub bar_number: u32,
}

/// Relates real time (seconds) to musical time (bars/beats) for one song.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TempoMap {
    pub bpm: f64,
    pub signature: TimeSignature,
    #[serde(default)]
    pub beat_value: BeatValue,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            signature: TimeSignature::default(),
            beat_value: BeatValue::default(),
        }
    }
}

impl TempoMap {
    pub fn new(bpm: f64, signature: TimeSignature, beat_value: BeatValue) -> Self {
        Self { bpm, signature, beat_value }
    }

    /// Seconds per counted beat (e.g., 120 BPM -> 0.5s)
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Seconds per bar (e.g., 4/4 @ 120 BPM -> 2.0s)
    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_beat() * self.signature.numerator as f64
    }

    /// How much of the song the timeline shows at once.
    pub fn visible_duration(&self) -> f64 {
        self.seconds_per_bar() * VISIBLE_MEASURES as f64
    }

    pub fn position_at(&self, seconds: f64) -> MusicalPosition {
        seconds_to_musical(seconds, self.bpm, self.signature)
    }

    pub fn timestamp_to_musical(&self, position: Duration) -> MusicalPosition {
        self.position_at(position.as_secs_f64())
    }

    pub fn seconds_at(&self, position: MusicalPosition) -> f64 {
        musical_to_seconds(position, self.bpm, self.signature)
    }

    /// One line per bar start covering `[0, duration)`.
    pub fn bar_lines(&self, duration: f64) -> Vec<GridLine> {
        let spb = self.seconds_per_bar();
        let count = step_count(duration, spb);
        (0..count)
            .map(|i| GridLine {
                time: i as f64 * spb,
                is_bar_start: true,
                bar_number: i as u32 + 1,
            })
            .collect()
    }

    /// One line per beat covering `[0, duration)`, bar starts flagged.
    pub fn beat_lines(&self, duration: f64) -> Vec<GridLine> {
        let spb = self.seconds_per_beat();
        let beats_per_bar = self.signature.numerator.max(1) as u64;
        let count = step_count(duration, spb);
        (0..count)
            .map(|i| GridLine {
                time: i as f64 * spb,
                is_bar_start: i % beats_per_bar == 0,
                bar_number: (i / beats_per_bar) as u32 + 1,
            })
            .collect()
    }

    /// Grid lines for a visible time range.
    /// `resolution`: 1 = one line per bar, 4 = quarter notes, 8 = eighths,
    /// 16 = sixteenths
    pub fn get_grid_lines(&self, start: Duration, end: Duration, resolution: u32) -> Vec<GridLine> {
        if !(self.bpm > 0.0) || resolution == 0 {
            return Vec::new();
        }

        let spb = self.seconds_per_beat();
        let beats_per_bar = self.signature.numerator.max(1) as f64;

        // How many beats are in one grid step?
        let beats_per_step = if resolution == 1 {
            beats_per_bar
        } else {
            4.0 / resolution as f64
        };

        let seconds_per_step = spb * beats_per_step;
        let steps_per_bar = (beats_per_bar / beats_per_step).round().max(1.0) as u64;

        let start_sec = start.as_secs_f64();
        let end_sec = end.as_secs_f64();

        // Loop by integer steps so there is no float accumulation drift
        let mut step_index = (start_sec / seconds_per_step - SIXTEENTH_EPSILON).ceil().max(0.0) as u64;
        let mut lines = Vec::new();

        loop {
            let time = step_index as f64 * seconds_per_step;
            if time > end_sec + 0.001 {
                break;
            }

            lines.push(GridLine {
                time,
                is_bar_start: step_index % steps_per_bar == 0,
                bar_number: (step_index / steps_per_bar) as u32 + 1,
            });

            step_index += 1;
        }

        lines
    }
}

fn step_count(duration: f64, step: f64) -> u64 {
    if !(duration > 0.0) || !(step > 0.0) {
        return 0;
    }
    (duration / step - SIXTEENTH_EPSILON).ceil() as u64
}
