// src/engine/mixer.rs
//
// Render side of the output. Runs inside the device callback: no locks, no
// allocation, no dropping of audio buffers. Everything arrives through the
// command ring and finished voices leave through the retire ring.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};

use super::clock::FrameClock;
use super::route::EpochGate;
use crate::decoder::dsp::fade_samples_ms;
use crate::decoder::DecodedAudio;

/// Fixed voice pool size. One voice per playing route, plus the ones still
/// fading out after a pause.
pub const MAX_VOICES: usize = 32;
pub const EDGE_FADE_MS: u32 = 5;

/// Gain and pan of one route, written by the control thread and read once
/// per block by the voice.
#[derive(Debug)]
pub struct RouteControls {
    gain: AtomicU32,
    pan: AtomicU32,
}

impl RouteControls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
        })
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum VoiceState {
    Idle,
    Scheduled { at_frame: u64 },
    Playing,
    Stopping { remaining: usize },
    Done,
}

pub struct Voice {
    id: u64,
    audio: Arc<DecodedAudio>,
    controls: Arc<RouteControls>,
    state: VoiceState,
    cursor: usize,
    ramp_gain: f32,
}

impl Voice {
    pub fn new(id: u64, audio: Arc<DecodedAudio>, controls: Arc<RouteControls>) -> Self {
        Self {
            id,
            audio,
            controls,
            state: VoiceState::Idle,
            cursor: 0,
            ramp_gain: 0.0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn is_done(&self) -> bool {
        self.state == VoiceState::Done
    }

    fn start(&mut self, at_frame: u64, offset_frame: usize) {
        if matches!(self.state, VoiceState::Idle | VoiceState::Scheduled { .. }) {
            self.state = VoiceState::Scheduled { at_frame };
            self.cursor = offset_frame;
            self.ramp_gain = 0.0;
        }
    }

    fn stop(&mut self, fade_frames: usize) {
        self.state = match self.state {
            VoiceState::Playing if fade_frames > 0 => VoiceState::Stopping { remaining: fade_frames },
            VoiceState::Stopping { remaining } => VoiceState::Stopping { remaining },
            _ => VoiceState::Done,
        };
    }

    /// Add this voice into `out` (interleaved, `channels` wide) for the block
    /// starting at engine frame `block_start`.
    fn render(&mut self, out: &mut [f32], channels: usize, block_start: u64, fade_frames: usize) {
        let frames = out.len() / channels;
        let src_frames = self.audio.frames();
        let src = &self.audio.channels;
        let stereo_src = src.len() >= 2;

        let target = self.controls.gain();
        let pan = self.controls.pan();
        let (pan_l, pan_r) = if channels >= 2 {
            let angle = (pan + 1.0) * 0.25 * std::f32::consts::PI;
            (angle.cos(), angle.sin())
        } else {
            (1.0, 1.0)
        };
        let step = 1.0 / fade_frames.max(1) as f32;

        for f in 0..frames {
            match self.state {
                VoiceState::Idle | VoiceState::Done => return,
                VoiceState::Scheduled { at_frame } => {
                    let now = block_start + f as u64;
                    if now < at_frame {
                        continue;
                    }
                    // Late command: skip ahead so the voice stays in lockstep
                    self.cursor += (now - at_frame) as usize;
                    self.state = VoiceState::Playing;
                }
                VoiceState::Playing | VoiceState::Stopping { .. } => {}
            }

            if self.cursor >= src_frames {
                self.state = VoiceState::Done;
                return;
            }

            // Per-sample ramp toward the target keeps gain changes click-free
            if self.ramp_gain < target {
                self.ramp_gain = (self.ramp_gain + step).min(target);
            } else if self.ramp_gain > target {
                self.ramp_gain = (self.ramp_gain - step).max(target);
            }
            let mut g = self.ramp_gain;

            if let VoiceState::Stopping { remaining } = &mut self.state {
                if *remaining == 0 {
                    self.state = VoiceState::Done;
                    return;
                }
                g *= *remaining as f32 / fade_frames as f32;
                *remaining -= 1;
            }

            let l = src[0][self.cursor];
            let r = if stereo_src { src[1][self.cursor] } else { l };
            let base = f * channels;
            if channels >= 2 {
                out[base] += l * g * pan_l;
                out[base + 1] += r * g * pan_r;
            } else {
                out[base] += 0.5 * (l + r) * g;
            }
            self.cursor += 1;
        }
    }
}

pub enum RouteCommand {
    Attach {
        slot: usize,
        voice: Voice,
    },
    Start {
        slot: usize,
        voice_id: u64,
        epoch: u64,
        at_frame: u64,
        offset_frame: usize,
    },
    Stop {
        slot: usize,
        voice_id: u64,
    },
}

/// A voice handed back to the control thread. `slot` is `None` when the
/// voice was never installed.
pub struct Retired {
    pub slot: Option<usize>,
    pub voice: Voice,
}

pub struct VoiceMixer {
    voices: Vec<Option<Voice>>,
    commands: HeapCons<RouteCommand>,
    retired: HeapProd<Retired>,
    clock: Arc<FrameClock>,
    epoch: Arc<EpochGate>,
    fade_frames: usize,
}

impl VoiceMixer {
    pub fn new(
        commands: HeapCons<RouteCommand>,
        retired: HeapProd<Retired>,
        clock: Arc<FrameClock>,
        epoch: Arc<EpochGate>,
    ) -> Self {
        let fade_frames = fade_samples_ms(clock.sample_rate(), EDGE_FADE_MS).max(1);
        Self {
            voices: (0..MAX_VOICES).map(|_| None).collect(),
            commands,
            retired,
            clock,
            epoch,
            fade_frames,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }

    fn voice_mut(&mut self, slot: usize, voice_id: u64) -> Option<&mut Voice> {
        self.voices
            .get_mut(slot)?
            .as_mut()
            .filter(|v| v.id == voice_id)
    }

    fn drain_commands(&mut self) {
        while let Some(cmd) = self.commands.try_pop() {
            match cmd {
                RouteCommand::Attach { slot, voice } => match self.voices.get_mut(slot) {
                    Some(entry) if entry.is_none() => *entry = Some(voice),
                    _ => {
                        let _ = self.retired.try_push(Retired { slot: None, voice });
                    }
                },
                RouteCommand::Start { slot, voice_id, epoch, at_frame, offset_frame } => {
                    if !self.epoch.admits(epoch) {
                        continue;
                    }
                    if let Some(v) = self.voice_mut(slot, voice_id) {
                        v.start(at_frame, offset_frame);
                    }
                }
                RouteCommand::Stop { slot, voice_id } => {
                    let fade = self.fade_frames;
                    if let Some(v) = self.voice_mut(slot, voice_id) {
                        v.stop(fade);
                    }
                }
            }
        }
    }

    fn retire_finished(&mut self) {
        for slot in 0..self.voices.len() {
            let done = self.voices[slot].as_ref().map(|v| v.is_done()).unwrap_or(false);
            if !done {
                continue;
            }
            if let Some(voice) = self.voices[slot].take() {
                // Ring full: keep the voice parked and try again next block
                if let Err(back) = self.retired.try_push(Retired { slot: Some(slot), voice }) {
                    self.voices[slot] = Some(back.voice);
                }
            }
        }
    }

    /// Fill one interleaved output block and advance the engine clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;

        // 1. Control changes land at block boundaries
        self.drain_commands();

        // 2. Mix every voice, sample-accurate against the engine clock
        let block_start = self.clock.frames();
        let fade = self.fade_frames;
        for voice in self.voices.iter_mut().flatten() {
            voice.render(out, channels, block_start, fade);
        }

        // 3. Soft clip the sum
        for sample in out.iter_mut() {
            if sample.abs() < 1e-10 {
                *sample = 0.0;
                continue;
            }
            *sample = sample.tanh();
        }

        self.retire_finished();
        self.clock.advance(frames as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Split;
    use ringbuf::HeapRb;

    struct Rig {
        mixer: VoiceMixer,
        commands: HeapProd<RouteCommand>,
        retired: HeapCons<Retired>,
        epoch: Arc<EpochGate>,
    }

    fn rig(sample_rate: u32) -> Rig {
        let (commands, cmd_rx) = HeapRb::<RouteCommand>::new(64).split();
        let (retire_tx, retired) = HeapRb::<Retired>::new(64).split();
        let epoch = EpochGate::new();
        let clock = Arc::new(FrameClock::new(sample_rate));
        Rig {
            mixer: VoiceMixer::new(cmd_rx, retire_tx, clock, epoch.clone()),
            commands,
            retired,
            epoch,
        }
    }

    fn ones(frames: usize, sample_rate: u32) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(vec![vec![0.5; frames]], sample_rate))
    }

    fn push(rig: &mut Rig, cmd: RouteCommand) {
        assert!(rig.commands.try_push(cmd).is_ok());
    }

    #[test]
    fn voice_starts_on_its_frame() {
        let mut rig = rig(1000);
        let controls = RouteControls::new();
        push(&mut rig, RouteCommand::Attach { slot: 0, voice: Voice::new(7, ones(100, 1000), controls) });
        let epoch = rig.epoch.advance();
        push(
            &mut rig,
            RouteCommand::Start { slot: 0, voice_id: 7, epoch, at_frame: 10, offset_frame: 0 },
        );

        let mut out = vec![0.0f32; 32];
        rig.mixer.render(&mut out, 1);
        assert!(out[..10].iter().all(|&s| s == 0.0));
        assert!(out[10] > 0.0);
        assert!(out[31] > 0.0);
    }

    #[test]
    fn stale_start_is_dropped() {
        let mut rig = rig(1000);
        push(&mut rig, RouteCommand::Attach { slot: 3, voice: Voice::new(1, ones(100, 1000), RouteControls::new()) });
        let old = rig.epoch.advance();
        rig.epoch.advance();
        push(&mut rig, RouteCommand::Start { slot: 3, voice_id: 1, epoch: old, at_frame: 0, offset_frame: 0 });

        let mut out = vec![0.0f32; 64];
        rig.mixer.render(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(rig.mixer.active_voices(), 1);
    }

    #[test]
    fn stop_fades_then_retires() {
        let mut rig = rig(1000); // 5 frame fade
        push(&mut rig, RouteCommand::Attach { slot: 0, voice: Voice::new(2, ones(1000, 1000), RouteControls::new()) });
        let epoch = rig.epoch.advance();
        push(&mut rig, RouteCommand::Start { slot: 0, voice_id: 2, epoch, at_frame: 0, offset_frame: 0 });
        let mut out = vec![0.0f32; 16];
        rig.mixer.render(&mut out, 1);

        push(&mut rig, RouteCommand::Stop { slot: 0, voice_id: 2 });
        rig.mixer.render(&mut out, 1);
        assert!(out[0] > 0.0);
        assert!(out[8..].iter().all(|&s| s == 0.0));

        let retired = rig.retired.try_pop().expect("voice handed back");
        assert_eq!(retired.slot, Some(0));
        assert_eq!(retired.voice.id(), 2);
        assert_eq!(rig.mixer.active_voices(), 0);
    }

    #[test]
    fn stop_for_another_voice_is_ignored() {
        let mut rig = rig(1000);
        push(&mut rig, RouteCommand::Attach { slot: 0, voice: Voice::new(5, ones(100, 1000), RouteControls::new()) });
        push(&mut rig, RouteCommand::Stop { slot: 0, voice_id: 4 });
        let mut out = vec![0.0f32; 8];
        rig.mixer.render(&mut out, 1);
        assert_eq!(rig.mixer.active_voices(), 1);
    }

    #[test]
    fn offset_skips_into_the_source() {
        let mut rig = rig(100);
        let mut samples = vec![0.0f32; 50];
        samples[20..].fill(0.8);
        let audio = Arc::new(DecodedAudio::new(vec![samples], 100));
        let controls = RouteControls::new();
        push(&mut rig, RouteCommand::Attach { slot: 0, voice: Voice::new(1, audio, controls) });
        let epoch = rig.epoch.advance();
        push(&mut rig, RouteCommand::Start { slot: 0, voice_id: 1, epoch, at_frame: 0, offset_frame: 20 });

        let mut out = vec![0.0f32; 4];
        rig.mixer.render(&mut out, 1);
        // Ramp from zero, but audible straight away
        assert!(out[1] > 0.0);
    }

    #[test]
    fn hard_left_pan_silences_right() {
        let mut rig = rig(1000);
        let controls = RouteControls::new();
        controls.set_pan(-1.0);
        push(&mut rig, RouteCommand::Attach { slot: 0, voice: Voice::new(1, ones(100, 1000), controls) });
        let epoch = rig.epoch.advance();
        push(&mut rig, RouteCommand::Start { slot: 0, voice_id: 1, epoch, at_frame: 0, offset_frame: 0 });

        let mut out = vec![0.0f32; 40];
        rig.mixer.render(&mut out, 2);
        assert!(out[38] > 0.0);
        assert!(out[39].abs() < 1e-6);
    }
}
