// src/session/mod.rs

pub mod loader;
pub mod serialization;
pub mod store;

pub use loader::{LoadOutcome, LoadRequest, LoadedTrack, TrackLoader};
pub use serialization::{SongRecord, TrackRecord};
pub use store::{JsonSongStore, SongStore};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bpm::{BpmOptions, BpmResult, TempoEstimate};
use crate::config::RehearsalConfig;
use crate::engine::{AudioOutput, TempoMap, Track, TrackId, TrackKind, Transport, TransportStatus};
use crate::error::{RehearsalError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SlotStatus {
    Loading,
    Ready,
    Failed(String),
}

/// One track of the current song, whether or not it has decoded yet.
#[derive(Debug, Clone)]
pub struct TrackSlot {
    pub id: TrackId,
    pub record: TrackRecord,
    pub status: SlotStatus,
}

/// A song loaded onto a transport: track set, tempo analysis, load state.
pub struct RehearsalSession<O: AudioOutput> {
    store: Arc<dyn SongStore>,
    transport: Transport<O>,
    loader: TrackLoader,
    analysis_options: BpmOptions,
    reference_kind: TrackKind,
    song: Option<SongRecord>,
    slots: Vec<TrackSlot>,
    analysis: Option<BpmResult>,
    /// Click record the cached analysis belongs to.
    click_identity: Option<String>,
}

impl<O: AudioOutput> RehearsalSession<O> {
    pub fn new(store: Arc<dyn SongStore>, output: O, config: &RehearsalConfig) -> Self {
        let loader = TrackLoader::new(store.clone(), output.sample_rate());
        let transport = Transport::new(output)
            .with_start_lead(config.transport.start_lead_secs())
            .with_click_enabled(config.transport.click_enabled);

        Self {
            store,
            transport,
            loader,
            analysis_options: config.analysis.clone(),
            reference_kind: config.transport.reference_kind.clone(),
            song: None,
            slots: Vec::new(),
            analysis: None,
            click_identity: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn SongStore> {
        &self.store
    }

    /// Switch to another song. The previous track set, its mix and any load
    /// still running are dropped. Tracks arrive later through `poll`.
    pub fn load_song(&mut self, key: &str) -> Result<&SongRecord> {
        let song = self.store.song(key)?;

        // 1. Tear down the old song
        self.loader.cancel();
        self.transport.unload();

        // 2. Track ids follow store order
        self.slots = song
            .tracks
            .iter()
            .enumerate()
            .map(|(i, record)| TrackSlot {
                id: TrackId(i as u32),
                record: record.clone(),
                status: SlotStatus::Loading,
            })
            .collect();

        let reference = self.slots.iter().find(|s| s.record.kind == self.reference_kind).map(|s| s.id);
        if reference.is_none() {
            log::warn!("'{}' has no {} track, playback is disabled", song.title, self.reference_kind.label());
        }
        self.transport.set_reference(reference);

        // 3. Tempo: reuse the analysis while the click file is unchanged
        let click = song.click();
        let options = self.options_for(&song);
        let click_identity = click.map(|c| c.identity());
        let reanalyze = click_identity.is_some() && click_identity != self.click_identity;

        if reanalyze || click_identity.is_none() {
            self.analysis = None;
            self.click_identity = None;
        }
        if click_identity.is_none() {
            log::info!("'{}' has no click track: {} BPM, no beat grid", song.title, TempoEstimate::fallback(&options).bpm);
        }
        match (&self.analysis, reanalyze) {
            (Some(cached), false) => self.transport.set_tempo(cached.tempo.tempo_map()),
            _ => self.transport.set_tempo(TempoEstimate::fallback(&options).tempo_map()),
        }

        // 4. Kick off the loads
        let requests = self
            .slots
            .iter()
            .map(|s| LoadRequest {
                track_id: s.id,
                record: s.record.clone(),
                analyze: (reanalyze && s.record.kind.is_click()).then(|| options.clone()),
            })
            .collect();
        self.loader.start(requests);

        log::info!("🎵 Loading '{}' ({} tracks)", song.title, self.slots.len());
        Ok(&*self.song.insert(song))
    }

    /// Drop the current song entirely.
    pub fn unload(&mut self) {
        self.loader.cancel();
        self.transport.unload();
        self.slots.clear();
        self.song = None;
    }

    /// Analysis options with the song's meter applied. The click record's
    /// metadata wins, then the first track that carries any.
    fn options_for(&self, song: &SongRecord) -> BpmOptions {
        let carrier = song
            .click()
            .filter(|c| c.time_signature.is_some() || c.beat_value.is_some())
            .or_else(|| song.tracks.iter().find(|t| t.time_signature.is_some() || t.beat_value.is_some()));
        match carrier {
            Some(t) => self.analysis_options.clone().with_song_metadata(t.time_signature, t.beat_value),
            None => self.analysis_options.clone(),
        }
    }

    /// Install whatever finished loading. Returns how many tracks settled.
    pub fn poll(&mut self) -> usize {
        let outcomes = self.loader.poll();
        let settled = outcomes.len();

        for LoadOutcome { track_id, result } in outcomes {
            let Some(idx) = self.slots.iter().position(|s| s.id == track_id) else {
                continue;
            };

            match result {
                Ok(loaded) => {
                    let record = &self.slots[idx].record;
                    if let Some(analysis) = loaded.analysis {
                        self.click_identity = Some(record.identity());
                        self.transport.set_tempo(analysis.tempo.tempo_map());
                        self.analysis = Some(analysis);
                    }

                    let track = Track::new(
                        track_id,
                        record.kind.clone(),
                        record.display_name(),
                        record.id.clone(),
                        loaded.audio,
                    );
                    log::info!(
                        "Loaded {} ({}) | {:.2}s {}Hz {}ch",
                        track.name,
                        track.kind,
                        track.duration_secs(),
                        track.sample_rate(),
                        track.channel_count()
                    );
                    self.slots[idx].status = match self.transport.install_track(track) {
                        Ok(()) => SlotStatus::Ready,
                        Err(e) => {
                            log::warn!("⚠️ Could not route track {track_id}: {e}");
                            SlotStatus::Failed(e.to_string())
                        }
                    };
                }
                Err(e) => {
                    log::warn!("⚠️ {e}");
                    self.slots[idx].status = SlotStatus::Failed(e.to_string());
                }
            }
        }
        settled
    }

    /// Block until every track settled or `timeout` passed. True when
    /// nothing is pending anymore.
    pub fn wait_until_loaded(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.loader.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // --- TRANSPORT ---

    /// Fails fast with `NotReady` while the reference track is decoding.
    pub fn play(&mut self) -> Result<()> {
        self.poll();
        if let Some(reference) = self.transport.reference() {
            if self.loader.is_pending(reference) {
                return Err(RehearsalError::NotReady { pending: self.loader.pending() });
            }
        }
        self.transport.play()
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        if self.transport.status() == TransportStatus::Playing {
            self.transport.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Per-frame housekeeping for the render loop.
    pub fn refresh(&mut self) -> TransportStatus {
        self.poll();
        self.transport.refresh()
    }

    pub fn transport(&self) -> &Transport<O> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<O> {
        &mut self.transport
    }

    // --- QUERIES ---

    pub fn song(&self) -> Option<&SongRecord> {
        self.song.as_ref()
    }

    pub fn slots(&self) -> &[TrackSlot] {
        &self.slots
    }

    pub fn pending(&self) -> usize {
        self.loader.pending()
    }

    pub fn analysis(&self) -> Option<&BpmResult> {
        self.analysis.as_ref()
    }

    pub fn tempo(&self) -> &TempoMap {
        self.transport.tempo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockOutput;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    const RATE: u32 = 48_000;

    struct MemStore {
        songs: Vec<SongRecord>,
        files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl SongStore for MemStore {
        fn songs(&self) -> Result<Vec<SongRecord>> {
            Ok(self.songs.clone())
        }

        fn read_track(&self, record: &TrackRecord) -> Result<Vec<u8>> {
            let files = self.files.lock().unwrap();
            files
                .get(&record.file_path)
                .cloned()
                .ok_or_else(|| RehearsalError::Store(format!("missing {}", record.file_path)))
        }
    }

    fn wav(samples: &[f32]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut w = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for &s in samples {
                w.write_sample((s * i16::MAX as f32) as i16).unwrap();
            }
            w.finalize().unwrap();
        }
        bytes
    }

    /// Impulses at 0.5, 1.0, 1.5 and 2.0 seconds.
    fn click_wav() -> Vec<u8> {
        let mut x = vec![0.0f32; RATE as usize * 5 / 2];
        for k in 1..=4 {
            x[k * RATE as usize / 2] = 0.9;
        }
        wav(&x)
    }

    fn record(id: &str, kind: &str, file: &str) -> TrackRecord {
        serde_json::from_value(serde_json::json!({ "id": id, "type": kind, "filePath": file })).unwrap()
    }

    fn session_with(tracks: Vec<TrackRecord>, files: HashMap<String, Vec<u8>>) -> RehearsalSession<MockOutput> {
        let song = SongRecord {
            id: "s1".into(),
            title: "Homeward".into(),
            voicing: Some("SATB".into()),
            tracks,
            created_at: None,
            updated_at: None,
        };
        let store = Arc::new(MemStore { songs: vec![song], files: Mutex::new(files) });
        RehearsalSession::new(store, MockOutput::new(), &RehearsalConfig::default())
    }

    fn session() -> RehearsalSession<MockOutput> {
        let mut files = HashMap::new();
        files.insert("/uploads/piano.wav".to_string(), wav(&vec![0.1; RATE as usize * 3]));
        files.insert("/uploads/click.wav".to_string(), click_wav());
        session_with(
            vec![
                record("a", "piano", "/uploads/piano.wav"),
                record("b", "click", "/uploads/click.wav"),
                record("c", "bass", "/uploads/missing.wav"),
            ],
            files,
        )
    }

    #[test]
    fn loads_tracks_and_analyzes_click() {
        let mut s = session();
        s.load_song("Homeward").unwrap();
        assert_eq!(s.slots().len(), 3);
        assert_eq!(s.transport().reference(), Some(TrackId(0)));
        assert!(s.wait_until_loaded(Duration::from_secs(10)));

        assert_eq!(s.slots()[0].status, SlotStatus::Ready);
        assert_eq!(s.slots()[1].status, SlotStatus::Ready);
        assert!(matches!(s.slots()[2].status, SlotStatus::Failed(_)));
        assert_eq!(s.transport().tracks().len(), 2);

        let analysis = s.analysis().unwrap();
        assert_eq!(analysis.tempo.bpm, 120.0);
        assert_eq!(analysis.beats.times(), vec![0.5, 1.0, 1.5, 2.0]);
        assert_eq!(s.tempo().bpm, 120.0);
    }

    #[test]
    fn play_waits_for_reference_install() {
        let mut s = session();
        s.load_song("s1").unwrap();
        // Nothing polled yet, so the transport has no piano
        let err = s.transport_mut().play().unwrap_err();
        assert!(matches!(err, RehearsalError::InvalidTransition { .. }));

        assert!(s.wait_until_loaded(Duration::from_secs(10)));
        s.play().unwrap();
        assert_eq!(s.transport().status(), TransportStatus::Playing);
        assert_eq!(s.transport().active_route_count(), 2);
    }

    #[test]
    fn not_ready_reports_pending_loads() {
        let mut s = session();
        s.load_song("s1").unwrap();
        s.loader.cancel();
        s.loader.pending.insert(TrackId(0));
        assert!(matches!(s.play(), Err(RehearsalError::NotReady { pending: 1 })));
        assert_eq!(s.transport().status(), TransportStatus::Stopped);
    }

    #[test]
    fn reload_keeps_analysis_of_unchanged_click() {
        let mut s = session();
        s.load_song("s1").unwrap();
        assert!(s.wait_until_loaded(Duration::from_secs(10)));
        assert!(s.analysis().is_some());

        s.transport_mut().set_mix(TrackId(0), crate::engine::MixControl::Mute(true));
        s.load_song("s1").unwrap();
        assert!(s.analysis().is_some());
        assert_eq!(s.tempo().bpm, 120.0);
        assert!(!s.transport().mix_state(TrackId(0)).muted);
    }

    #[test]
    fn undecodable_track_fails_alone() {
        let mut files = HashMap::new();
        files.insert("/uploads/piano.wav".to_string(), wav(&vec![0.1; RATE as usize * 3]));
        files.insert("/uploads/tenor.mp3".to_string(), b"this is not audio at all".to_vec());
        files.insert("/uploads/bass.wav".to_string(), wav(&vec![0.2; RATE as usize * 2]));
        let mut s = session_with(
            vec![
                record("a", "piano", "/uploads/piano.wav"),
                record("b", "tenor_1", "/uploads/tenor.mp3"),
                record("c", "bass", "/uploads/bass.wav"),
            ],
            files,
        );

        s.load_song("s1").unwrap();
        assert!(s.wait_until_loaded(Duration::from_secs(10)));

        assert_eq!(s.slots()[0].status, SlotStatus::Ready);
        assert_eq!(s.slots()[2].status, SlotStatus::Ready);
        match &s.slots()[1].status {
            SlotStatus::Failed(msg) => assert!(msg.contains("failed to decode"), "{msg}"),
            other => panic!("tenor should have failed, got {other:?}"),
        }

        s.play().unwrap();
        assert_eq!(s.transport().tracks().len(), 2);
        assert_eq!(s.transport().active_route_count(), 2);
        assert!(s.transport().track(TrackId(1)).is_none());
    }

    #[test]
    fn unknown_song() {
        let mut s = session();
        assert!(matches!(s.load_song("nope"), Err(RehearsalError::UnknownSong(_))));
        assert!(s.song().is_none());
    }
}
