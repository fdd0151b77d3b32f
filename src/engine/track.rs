// src/engine/track.rs

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decoder::DecodedAudio;

/// Identifier for a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role of a stem inside a song. Unknown store types survive as `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TrackKind {
    Click,
    Piano,
    AllVocals,
    Tenor1,
    Tenor2,
    Bass,
    Other(String),
}

impl TrackKind {
    /// Store identifier (`"tenor_1"`).
    pub fn as_str(&self) -> &str {
        match self {
            TrackKind::Click => "click",
            TrackKind::Piano => "piano",
            TrackKind::AllVocals => "all_vocals",
            TrackKind::Tenor1 => "tenor_1",
            TrackKind::Tenor2 => "tenor_2",
            TrackKind::Bass => "bass",
            TrackKind::Other(name) => name,
        }
    }

    /// Display name (`"Tenor 1"`).
    pub fn label(&self) -> String {
        match self {
            TrackKind::Click => "Click".into(),
            TrackKind::Piano => "Piano".into(),
            TrackKind::AllVocals => "All Vocals".into(),
            TrackKind::Tenor1 => "Tenor 1".into(),
            TrackKind::Tenor2 => "Tenor 2".into(),
            TrackKind::Bass => "Bass".into(),
            TrackKind::Other(name) => name.replace('_', " "),
        }
    }

    pub fn is_click(&self) -> bool {
        matches!(self, TrackKind::Click)
    }
}

impl FromStr for TrackKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "click" => TrackKind::Click,
            "piano" => TrackKind::Piano,
            "all_vocals" => TrackKind::AllVocals,
            "tenor_1" => TrackKind::Tenor1,
            "tenor_2" => TrackKind::Tenor2,
            "bass" => TrackKind::Bass,
            _ => TrackKind::Other(s.to_string()),
        })
    }
}

impl From<String> for TrackKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<TrackKind> for String {
    fn from(kind: TrackKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded stem, immutable once built. The audio is shared with the
/// output routes playing it.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub name: String,
    /// Id of the record in the song store.
    pub store_id: String,
    pub audio: Arc<DecodedAudio>,
}

impl Track {
    pub fn new(id: TrackId, kind: TrackKind, name: String, store_id: String, audio: Arc<DecodedAudio>) -> Self {
        Self { id, kind, name, store_id, audio }
    }

    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs()
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.audio.channel_count()
    }
}
