pub mod detector;
pub mod utils;
pub mod adapter;

pub use detector::{
    analyze, AnalysisStatus, BeatMarker, BeatTimeline, BpmOptions, BpmResult, DegenerateReason, TempoEstimate,
};
pub use adapter::{analyze_bpm_for_file, analyze_decoded};
