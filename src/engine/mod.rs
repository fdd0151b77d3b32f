// src/engine/mod.rs

pub mod clock;
pub mod mix_state;
pub mod mixer;
pub mod output;
pub mod route;
pub mod time;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::FrameClock;
pub use mix_state::{MixBoard, MixControl, TrackMixState};
pub use mixer::VoiceMixer;
pub use output::MixerOutput;
pub use route::{AudioOutput, AudioRoute};
pub use time::{MusicalPosition, TempoMap};
pub use track::{Track, TrackId, TrackKind};

use serde::Serialize;

use crate::error::{RehearsalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransportStatus {
    Stopped,
    Playing,
    Paused,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransportState {
    pub status: TransportStatus,
    pub position_seconds: f64,
    pub reference_track_id: Option<TrackId>,
}

struct LiveRoute {
    track: TrackId,
    route: Box<dyn AudioRoute>,
}

/// Multi-track transport. Every route of one Play starts on the same engine
/// clock instant; position is derived from that clock, never from the routes.
pub struct Transport<O: AudioOutput> {
    output: O,
    tracks: Vec<Track>,
    routes: Vec<LiveRoute>,
    mix: MixBoard,
    tempo: TempoMap,
    status: TransportStatus,
    reference: Option<TrackId>,
    /// Source offset the next Play starts from (and the current one started from).
    pause_offset: f64,
    /// Engine time at which the source position was zero.
    clock_origin: f64,
    /// Epoch the running Play was issued under.
    play_epoch: u64,
    start_lead: f64,
}

impl<O: AudioOutput> Transport<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            tracks: Vec::new(),
            routes: Vec::new(),
            mix: MixBoard::default(),
            tempo: TempoMap::default(),
            status: TransportStatus::Stopped,
            reference: None,
            pause_offset: 0.0,
            clock_origin: 0.0,
            play_epoch: 0,
            start_lead: 0.0,
        }
    }

    /// Delay between a Play request and the instant the routes start, so the
    /// start commands reach the device before it renders that frame.
    pub fn with_start_lead(mut self, seconds: f64) -> Self {
        self.start_lead = seconds.max(0.0);
        self
    }

    pub fn with_click_enabled(mut self, enabled: bool) -> Self {
        self.mix.set_click_enabled(enabled);
        self
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    // --- TRACK SET ---

    /// Stop and drop every track, mix state included.
    pub fn unload(&mut self) {
        self.stop();
        self.tracks.clear();
        self.mix.reset();
        self.reference = None;
        self.output.collect_garbage();
        log::debug!("Transport unloaded");
    }

    pub fn set_reference(&mut self, id: Option<TrackId>) {
        self.reference = id;
    }

    pub fn reference(&self) -> Option<TrackId> {
        self.reference
    }

    pub fn reference_loaded(&self) -> bool {
        self.reference.map(|id| self.track(id).is_some()).unwrap_or(false)
    }

    /// Add (or replace) a decoded track. While playing it joins immediately,
    /// aligned to the running clock. If its route can't be created the track
    /// set is left as it was.
    pub fn install_track(&mut self, track: Track) -> Result<()> {
        let id = track.id;

        if self.status != TransportStatus::Playing {
            self.remove_track(id);
            self.insert_sorted(track);
            return Ok(());
        }

        // 1. Route first, so a failure commits nothing
        let epoch = self.play_epoch; // a fresh epoch would drop the running Play's queued starts
        let at = self.output.now() + self.start_lead;
        let offset = (at - self.clock_origin).max(0.0);
        let any_solo = self.any_solo() || self.mix.get(id).soloed;
        let route = start_route(&mut self.output, &self.mix, &track, any_solo, at, offset, epoch)?;

        // 2. Commit
        self.remove_track(id);
        self.insert_sorted(track);
        self.routes.push(LiveRoute { track: id, route });

        // A newly soloed track changes everyone else
        self.apply_gains();
        Ok(())
    }

    fn insert_sorted(&mut self, track: Track) {
        self.tracks.push(track);
        self.tracks.sort_by_key(|t| t.id);
    }

    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        for live in self.routes.iter_mut().filter(|r| r.track == id) {
            live.route.stop();
        }
        self.routes.retain(|r| r.track != id);
        let idx = self.tracks.iter().position(|t| t.id == id)?;
        Some(self.tracks.remove(idx))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Song length: the reference track's, or the longest loaded one.
    pub fn duration(&self) -> f64 {
        if let Some(t) = self.reference.and_then(|id| self.track(id)) {
            return t.duration_secs();
        }
        self.tracks.iter().map(|t| t.duration_secs()).fold(0.0, f64::max)
    }

    // --- STATE MACHINE ---

    pub fn play(&mut self) -> Result<()> {
        if self.status == TransportStatus::Playing {
            return Err(self.invalid("play", "already playing"));
        }
        if self.reference.is_none() {
            return Err(self.invalid("play", "song has no reference track"));
        }
        if !self.reference_loaded() {
            return Err(self.invalid("play", "reference track is not loaded"));
        }

        // 1. Invalidate anything still in flight from earlier gestures
        let epoch = self.output.advance_epoch();
        self.output.collect_garbage();

        // 2. One start instant for every route
        let at = self.output.now() + self.start_lead;
        let offset = self.pause_offset;
        let any_solo = self.any_solo();

        let mut routes = Vec::with_capacity(self.tracks.len());
        for t in &self.tracks {
            match start_route(&mut self.output, &self.mix, t, any_solo, at, offset, epoch) {
                Ok(route) => routes.push(LiveRoute { track: t.id, route }),
                Err(e) => {
                    for mut live in routes {
                        live.route.stop();
                    }
                    return Err(e);
                }
            }
        }

        // 3. Commit
        self.routes = routes;
        self.clock_origin = at - offset;
        self.play_epoch = epoch;
        self.status = TransportStatus::Playing;
        log::debug!("▶ Play {} route(s) from {:.3}s at engine {:.3}s", self.routes.len(), offset, at);
        Ok(())
    }

    /// No-op unless playing.
    pub fn pause(&mut self) {
        if self.status != TransportStatus::Playing {
            return;
        }
        let position = self.position_seconds();
        self.halt_routes();
        self.pause_offset = position;
        self.status = TransportStatus::Paused;
        log::debug!("⏸ Pause at {position:.3}s");
    }

    pub fn stop(&mut self) {
        self.halt_routes();
        self.pause_offset = 0.0;
        self.clock_origin = 0.0;
        self.status = TransportStatus::Stopped;
        log::debug!("⏹ Stop");
    }

    /// Move to `seconds`, clamped to the song. A playing transport pauses
    /// there; nothing resumes on its own.
    pub fn seek(&mut self, seconds: f64) {
        let target = if seconds.is_nan() { 0.0 } else { seconds.clamp(0.0, self.duration()) };
        if self.status == TransportStatus::Playing {
            self.status = TransportStatus::Paused;
        }
        self.halt_routes();
        self.pause_offset = target;
        log::debug!("⏩ Seek to {target:.3}s ({:?})", self.status);
    }

    /// Called once per UI frame: releases finished voices and stops the
    /// transport when the song has run out.
    pub fn refresh(&mut self) -> TransportStatus {
        self.output.collect_garbage();
        if self.status == TransportStatus::Playing {
            let duration = self.duration();
            if duration > 0.0 && self.position_seconds() >= duration {
                log::info!("Reached end of song ({duration:.2}s)");
                self.stop();
            }
        }
        self.status
    }

    fn halt_routes(&mut self) {
        self.output.advance_epoch();
        for live in &mut self.routes {
            live.route.stop();
        }
        self.routes.clear();
    }

    fn invalid(&self, op: &'static str, reason: &'static str) -> RehearsalError {
        RehearsalError::InvalidTransition { op, status: self.status, reason }
    }

    // --- MIX ---

    /// Apply one mix gesture. Live routes follow immediately; otherwise the
    /// value waits for the next Play.
    pub fn set_mix(&mut self, id: TrackId, control: MixControl) -> TrackMixState {
        let state = self.mix.apply(id, control);
        if control.is_global() {
            self.apply_gains();
        } else {
            let any_solo = self.any_solo();
            let kind = self.track(id).map(|t| t.kind.clone());
            if let Some(kind) = kind {
                let gain = self.mix.effective_gain(id, &kind, any_solo);
                for live in self.routes.iter_mut().filter(|r| r.track == id) {
                    live.route.set_gain(gain);
                    live.route.set_pan(state.pan);
                }
            }
        }
        state
    }

    pub fn mix_state(&self, id: TrackId) -> TrackMixState {
        self.mix.get(id)
    }

    pub fn click_enabled(&self) -> bool {
        self.mix.click_enabled()
    }

    pub fn set_click_enabled(&mut self, enabled: bool) {
        self.mix.set_click_enabled(enabled);
        self.apply_gains();
    }

    fn any_solo(&self) -> bool {
        self.mix.any_solo(self.tracks.iter().map(|t| t.id))
    }

    fn apply_gains(&mut self) {
        let any_solo = self.any_solo();
        for live in &mut self.routes {
            if let Some(t) = self.tracks.iter().find(|t| t.id == live.track) {
                live.route.set_gain(self.mix.effective_gain(t.id, &t.kind, any_solo));
            }
        }
    }

    // --- QUERIES ---

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    /// Non-blocking. While the routes wait for their start instant the
    /// position holds at the start offset.
    pub fn position_seconds(&self) -> f64 {
        match self.status {
            TransportStatus::Playing => {
                let live = self.output.now() - self.clock_origin;
                let end = self.duration().max(self.pause_offset);
                live.clamp(self.pause_offset, end)
            }
            _ => self.pause_offset,
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            status: self.status,
            position_seconds: self.position_seconds(),
            reference_track_id: self.reference,
        }
    }

    pub fn active_route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn tempo(&self) -> &TempoMap {
        &self.tempo
    }

    pub fn set_tempo(&mut self, tempo: TempoMap) {
        self.tempo = tempo;
    }

    pub fn musical_position(&self) -> MusicalPosition {
        self.tempo.position_at(self.position_seconds())
    }
}

fn start_route<O: AudioOutput>(
    output: &mut O,
    mix: &MixBoard,
    track: &Track,
    any_solo: bool,
    at: f64,
    offset: f64,
    epoch: u64,
) -> Result<Box<dyn AudioRoute>> {
    let mut route = output.create_route(track.audio.clone())?;
    route.set_gain(mix.effective_gain(track.id, &track.kind, any_solo));
    route.set_pan(mix.get(track.id).pan);
    route.start(at, offset, epoch);
    Ok(route)
}
