// src/session/serialization.rs
//
// Records of the upload API's song database (`songs.json`). Read-only: the
// API owns this format.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::time::{BeatValue, TimeSignature};
use crate::engine::TrackKind;
use crate::error::{RehearsalError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    /// Server path, e.g. `/uploads/3f2c....mp3`.
    pub file_path: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub time_signature: Option<TimeSignature>,
    #[serde(default)]
    pub beat_value: Option<BeatValue>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

impl TrackRecord {
    pub fn display_name(&self) -> String {
        match &self.original_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.kind.label(),
        }
    }

    /// Changes whenever the stored file does.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.id, self.file_path)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub voicing: Option<String>,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl SongRecord {
    pub fn track_of_kind(&self, kind: &TrackKind) -> Option<&TrackRecord> {
        self.tracks.iter().find(|t| &t.kind == kind)
    }

    pub fn click(&self) -> Option<&TrackRecord> {
        self.track_of_kind(&TrackKind::Click)
    }
}

pub fn load_songs_from_disk(path: &Path) -> Result<Vec<SongRecord>> {
    let file = File::open(path).map_err(|e| RehearsalError::Store(format!("{}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| RehearsalError::Store(format!("{}: {e}", path.display())))
}
