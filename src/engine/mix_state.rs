// src/engine/mix_state.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::track::{TrackId, TrackKind};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackMixState {
    pub volume: f32,
    pub pan: f32, // -1.0 left, 0 center, +1.0 right
    pub muted: bool,
    pub soloed: bool,
}

impl Default for TrackMixState {
    fn default() -> Self {
        Self { volume: 1.0, pan: 0.0, muted: false, soloed: false }
    }
}

/// A single mix gesture on one track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MixControl {
    Volume(f32),
    Pan(f32),
    Mute(bool),
    Solo(bool),
}

impl MixControl {
    /// Whether applying this can change other tracks' audibility.
    pub fn is_global(&self) -> bool {
        matches!(self, MixControl::Solo(_))
    }
}

/// Mix settings per track id. Entries appear on first touch and survive
/// pause/resume; a song reload clears them.
#[derive(Clone, Debug, Default)]
pub struct MixBoard {
    states: BTreeMap<TrackId, TrackMixState>,
    click_enabled: bool,
}

impl MixBoard {
    pub fn new(click_enabled: bool) -> Self {
        Self { states: BTreeMap::new(), click_enabled }
    }

    pub fn get(&self, id: TrackId) -> TrackMixState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    pub fn apply(&mut self, id: TrackId, control: MixControl) -> TrackMixState {
        let state = self.states.entry(id).or_default();
        match control {
            MixControl::Volume(v) => state.volume = clamp_or(v, 0.0, 1.0, state.volume),
            MixControl::Pan(p) => state.pan = clamp_or(p, -1.0, 1.0, state.pan),
            MixControl::Mute(m) => state.muted = m,
            MixControl::Solo(s) => state.soloed = s,
        }
        *state
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn click_enabled(&self) -> bool {
        self.click_enabled
    }

    pub fn set_click_enabled(&mut self, enabled: bool) {
        self.click_enabled = enabled;
    }

    /// True when any of `loaded` is soloed.
    pub fn any_solo<I>(&self, loaded: I) -> bool
    where
        I: IntoIterator<Item = TrackId>,
    {
        loaded.into_iter().any(|id| self.get(id).soloed)
    }

    /// Gain a route should play at. Solo wins over mute; a disabled click
    /// stays silent whatever its mix says.
    pub fn effective_gain(&self, id: TrackId, kind: &TrackKind, any_solo: bool) -> f32 {
        if kind.is_click() && !self.click_enabled {
            return 0.0;
        }
        let state = self.get(id);
        let audible = if any_solo { state.soloed } else { !state.muted };
        if audible { state.volume } else { 0.0 }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() { fallback } else { value.clamp(min, max) }
}
