// src/config.rs

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bpm::BpmOptions;
use crate::engine::TrackKind;
use crate::error::{RehearsalError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The upload API's song database.
    pub data_file: PathBuf,
    /// Directory that `/uploads/...` file paths resolve against.
    pub uploads_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/songs.json"),
            uploads_dir: PathBuf::from("uploads"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Kind of the track that defines the song clock.
    pub reference_kind: TrackKind,
    pub click_enabled: bool,
    pub start_lead_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reference_kind: TrackKind::Piano,
            click_enabled: false,
            start_lead_ms: 50,
        }
    }
}

impl TransportConfig {
    pub fn start_lead_secs(&self) -> f64 {
        self.start_lead_ms as f64 / 1000.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RehearsalConfig {
    pub store: StoreConfig,
    pub analysis: BpmOptions,
    pub transport: TransportConfig,
}

impl RehearsalConfig {
    pub fn load_from_disk(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| RehearsalError::Config(format!("{}: {e}", path.display())))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| RehearsalError::Config(format!("{}: {e}", path.display())))
    }

    /// Config file if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let cfg = Self::load_from_disk(p)?;
                log::info!("Loaded config from {}", p.display());
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: RehearsalConfig =
            serde_json::from_str(r#"{ "transport": { "click_enabled": true } }"#).unwrap();
        assert!(cfg.transport.click_enabled);
        assert_eq!(cfg.transport.reference_kind, TrackKind::Piano);
        assert_eq!(cfg.transport.start_lead_ms, 50);
        assert_eq!(cfg.analysis, BpmOptions::default());
        assert_eq!(cfg.store.data_file, PathBuf::from("data/songs.json"));
    }

    #[test]
    fn reads_analysis_and_meter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "analysis": {{ "threshold": 0.3, "time_signature": "3/4" }},
                "transport": {{ "reference_kind": "all_vocals" }}
            }}"#
        )
        .unwrap();

        let cfg = RehearsalConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.analysis.threshold, 0.3);
        assert_eq!(cfg.analysis.time_signature.numerator, 3);
        assert_eq!(cfg.analysis.min_peak_spacing, 1024);
        assert_eq!(cfg.transport.reference_kind, TrackKind::AllVocals);
    }

    #[test]
    fn bad_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            RehearsalConfig::load(Some(file.path())),
            Err(RehearsalError::Config(_))
        ));
        assert!(matches!(
            RehearsalConfig::load(Some(Path::new("/nonexistent/rehearse.json"))),
            Err(RehearsalError::Config(_))
        ));
    }
}
