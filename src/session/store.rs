// src/session/store.rs

use std::path::{Component, Path, PathBuf};

use super::serialization::{load_songs_from_disk, SongRecord, TrackRecord};
use crate::error::{RehearsalError, Result};

/// Read side of the song database. Implementations must be usable from the
/// background load threads.
pub trait SongStore: Send + Sync {
    fn songs(&self) -> Result<Vec<SongRecord>>;

    /// Lookup by id first, then by exact title.
    fn song(&self, key: &str) -> Result<SongRecord> {
        let songs = self.songs()?;
        songs
            .iter()
            .find(|s| s.id == key)
            .or_else(|| songs.iter().find(|s| s.title == key))
            .cloned()
            .ok_or_else(|| RehearsalError::UnknownSong(key.to_string()))
    }

    fn tracks_for_song(&self, key: &str) -> Result<Vec<TrackRecord>> {
        Ok(self.song(key)?.tracks)
    }

    fn read_track(&self, record: &TrackRecord) -> Result<Vec<u8>>;
}

/// `songs.json` plus the uploads directory of the admin API.
#[derive(Debug, Clone)]
pub struct JsonSongStore {
    data_file: PathBuf,
    uploads_root: PathBuf,
}

impl JsonSongStore {
    pub fn new(data_file: impl Into<PathBuf>, uploads_root: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            uploads_root: uploads_root.into(),
        }
    }

    /// Map a server path (`/uploads/x.mp3`) onto the uploads directory.
    /// Anything trying to climb out of it is rejected.
    pub fn resolve(&self, file_path: &str) -> Result<PathBuf> {
        let trimmed = file_path.trim_start_matches('/');
        let relative = trimmed.strip_prefix("uploads/").unwrap_or(trimmed);
        let relative = Path::new(relative);

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.as_os_str().is_empty() || escapes {
            return Err(RehearsalError::Store(format!("bad track path {file_path:?}")));
        }
        Ok(self.uploads_root.join(relative))
    }
}

impl SongStore for JsonSongStore {
    fn songs(&self) -> Result<Vec<SongRecord>> {
        if !self.data_file.exists() {
            log::warn!("No song database at {}", self.data_file.display());
            return Ok(Vec::new());
        }
        load_songs_from_disk(&self.data_file)
    }

    fn read_track(&self, record: &TrackRecord) -> Result<Vec<u8>> {
        let path = self.resolve(&record.file_path)?;
        std::fs::read(&path).map_err(|e| RehearsalError::Store(format!("{}: {e}", path.display())))
    }
}
