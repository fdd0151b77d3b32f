// src/lib.rs

pub mod audio;
pub mod bpm;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod session;

pub use bpm::{analyze, analyze_bpm_for_file, BpmOptions, BpmResult};
pub use config::RehearsalConfig;
pub use engine::time::{musical_to_seconds, seconds_to_musical, MusicalPosition, TempoMap};
pub use engine::{MixControl, Transport, TransportState, TransportStatus};
pub use error::{DecodeError, RehearsalError};
pub use session::{JsonSongStore, RehearsalSession, SongStore};
