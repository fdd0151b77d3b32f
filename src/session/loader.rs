// src/session/loader.rs
//
// Background decode of a song's tracks: one thread per track, results come
// back over a channel and are picked up by `poll` without blocking.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;

use super::serialization::TrackRecord;
use super::store::SongStore;
use crate::bpm::{analyze_decoded, BpmOptions, BpmResult};
use crate::decoder::{self, DecodedAudio};
use crate::engine::TrackId;
use crate::error::{DecodeError, RehearsalError, Result};

pub struct LoadRequest {
    pub track_id: TrackId,
    pub record: TrackRecord,
    /// Run tempo analysis on the decoded audio with these options.
    pub analyze: Option<BpmOptions>,
}

#[derive(Debug)]
pub struct LoadedTrack {
    /// Already at the output sample rate.
    pub audio: Arc<DecodedAudio>,
    pub analysis: Option<BpmResult>,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub track_id: TrackId,
    pub result: Result<LoadedTrack>,
}

struct LoadMessage {
    generation: u64,
    outcome: LoadOutcome,
}

pub struct TrackLoader {
    store: Arc<dyn SongStore>,
    target_rate: u32,
    tx: Sender<LoadMessage>,
    rx: Receiver<LoadMessage>,
    generation: u64,
    cancel: Arc<AtomicBool>,
    pub(super) pending: BTreeSet<TrackId>,
}

impl TrackLoader {
    pub fn new(store: Arc<dyn SongStore>, target_rate: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            store,
            target_rate,
            tx,
            rx,
            generation: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            pending: BTreeSet::new(),
        }
    }

    /// Abandon whatever is loading. Late results of the old batch are dropped.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.cancel = Arc::new(AtomicBool::new(false));
        self.generation += 1;
        self.pending.clear();
    }

    /// Replace the current batch with `requests`.
    pub fn start(&mut self, requests: Vec<LoadRequest>) {
        self.cancel();
        let generation = self.generation;

        for req in requests {
            let track_id = req.track_id;
            self.pending.insert(track_id);

            let store = self.store.clone();
            let cancel = self.cancel.clone();
            let tx = self.tx.clone();
            let target_rate = self.target_rate;

            let spawned = thread::Builder::new()
                .name(format!("load-track-{}", track_id.0))
                .spawn(move || {
                    let result = load_one(store.as_ref(), &req, target_rate, &cancel);
                    // Receiver gone means the session was dropped
                    let _ = tx.send(LoadMessage { generation, outcome: LoadOutcome { track_id, result } });
                });

            if let Err(e) = spawned {
                let _ = self.tx.send(LoadMessage {
                    generation,
                    outcome: LoadOutcome {
                        track_id,
                        result: Err(RehearsalError::Store(format!("failed to spawn loader: {e}"))),
                    },
                });
            }
        }
    }

    /// Finished loads of the current batch. Never blocks.
    pub fn poll(&mut self) -> Vec<LoadOutcome> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) if msg.generation == self.generation => {
                    self.pending.remove(&msg.outcome.track_id);
                    out.push(msg.outcome);
                }
                Ok(_) => {} // stale batch
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: TrackId) -> bool {
        self.pending.contains(&id)
    }
}

fn load_one(store: &dyn SongStore, req: &LoadRequest, target_rate: u32, cancel: &AtomicBool) -> Result<LoadedTrack> {
    let decode_err = |source: DecodeError| RehearsalError::Decode { track: req.record.display_name(), source };

    // 1. Fetch
    let bytes = store.read_track(&req.record)?;
    if cancel.load(Ordering::Relaxed) {
        return Err(decode_err(DecodeError::Cancelled));
    }

    // 2. Decode
    let audio = decoder::decode_cancellable(bytes, cancel).map_err(decode_err)?;

    // 3. Analyze at the source rate, before any resampling touches the onsets
    let analysis = req.analyze.as_ref().map(|opts| analyze_decoded(&audio, opts));

    // 4. Match the device
    let audio = decoder::resample_to(audio, target_rate).map_err(decode_err)?;

    log::debug!("Decoded {} at {}Hz", req.record.display_name(), audio.sample_rate);
    Ok(LoadedTrack { audio: Arc::new(audio), analysis })
}
