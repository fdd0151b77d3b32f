// src/error.rs

use thiserror::Error;

use crate::engine::TransportStatus;

/// Why a single track could not be turned into playable audio.
/// Fatal for that track only: the rest of the song still plays.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    #[error("malformed audio data: {0}")]
    Malformed(String),

    #[error("no default audio track in stream")]
    NoTrack,

    #[error("stream decoded to zero frames")]
    Empty,

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("decode cancelled")]
    Cancelled,
}

impl From<symphonia::core::errors::Error> for DecodeError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;
        match err {
            SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum RehearsalError {
    /// A transport operation that is not legal from the current state.
    /// The transport is left untouched.
    #[error("cannot {op} while {status:?}: {reason}")]
    InvalidTransition {
        op: &'static str,
        status: TransportStatus,
        reason: &'static str,
    },

    /// Play was requested while the reference track is still decoding.
    #[error("reference track is still loading ({pending} track(s) pending)")]
    NotReady { pending: usize },

    #[error("track {track} failed to decode: {source}")]
    Decode {
        track: String,
        #[source]
        source: DecodeError,
    },

    #[error("song not found: {0}")]
    UnknownSong(String),

    #[error("song store error: {0}")]
    Store(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RehearsalError {
    fn from(err: std::io::Error) -> Self {
        RehearsalError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RehearsalError>;
