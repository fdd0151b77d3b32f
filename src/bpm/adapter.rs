// src/bpm/adapter.rs

use std::path::Path;

use crate::bpm::{analyze, AnalysisStatus, BpmOptions, BpmResult};
use crate::decoder::{self, DecodedAudio};
use crate::error::{RehearsalError, Result};

/// Analyze a decoded click track. Only the first channel is looked at;
/// stereo click tracks are not mixed down.
pub fn analyze_decoded(audio: &DecodedAudio, opts: &BpmOptions) -> BpmResult {
    let res = match audio.first_channel() {
        Some(samples) => analyze(samples, audio.sample_rate, opts),
        None => analyze(&[], audio.sample_rate, opts),
    };

    match res.status {
        AnalysisStatus::Detected => log::info!(
            "Click analysis: {} BPM, {} onsets ({} {})",
            res.tempo.bpm,
            res.beats.len(),
            res.tempo.time_signature,
            res.tempo.beat_value
        ),
        AnalysisStatus::Degenerate(reason) => {
            log::warn!("Click analysis inconclusive ({reason:?}), using {} BPM without a beat grid", res.tempo.bpm)
        }
    }
    res
}

pub fn analyze_bpm_for_file(path: impl AsRef<Path>, opts: &BpmOptions) -> Result<BpmResult> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let audio = decoder::decode(bytes).map_err(|source| RehearsalError::Decode {
        track: path.display().to_string(),
        source,
    })?;
    Ok(analyze_decoded(&audio, opts))
}
