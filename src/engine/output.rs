// src/engine/output.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::clock::FrameClock;
use super::mixer::{Retired, RouteCommand, RouteControls, Voice, VoiceMixer, MAX_VOICES};
use super::route::{AudioOutput, AudioRoute, EpochGate};
use crate::decoder::DecodedAudio;
use crate::error::{RehearsalError, Result};

const COMMAND_CAPACITY: usize = 256;
/// Commands parked on the control side while the ring is full.
const BACKLOG_CAPACITY: usize = 256;

/// Control-thread end of the two rings feeding a `VoiceMixer`.
pub struct MixerLink {
    commands: HeapProd<RouteCommand>,
    retired: HeapCons<Retired>,
    free_slots: Vec<usize>,
    next_voice_id: u64,
    backlog: VecDeque<RouteCommand>,
}

impl MixerLink {
    /// Queue `cmd` behind anything still parked. A full ring parks it until
    /// the next `flush_backlog`; only a full backlog hands it back.
    fn send(&mut self, cmd: RouteCommand) -> std::result::Result<(), RouteCommand> {
        self.flush_backlog();
        if !self.backlog.is_empty() {
            return self.park(cmd);
        }
        match self.commands.try_push(cmd) {
            Ok(()) => Ok(()),
            Err(cmd) => self.park(cmd),
        }
    }

    fn park(&mut self, cmd: RouteCommand) -> std::result::Result<(), RouteCommand> {
        if self.backlog.len() >= BACKLOG_CAPACITY {
            return Err(cmd);
        }
        self.backlog.push_back(cmd);
        Ok(())
    }

    /// Move parked commands into the ring, oldest first.
    fn flush_backlog(&mut self) {
        while let Some(cmd) = self.backlog.pop_front() {
            if let Err(cmd) = self.commands.try_push(cmd) {
                self.backlog.push_front(cmd);
                break;
            }
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Drop voices the render side is done with, recycle their slots and
    /// retry parked commands.
    pub fn collect_garbage(&mut self) -> usize {
        self.flush_backlog();
        let mut n = 0;
        while let Some(Retired { slot, voice }) = self.retired.try_pop() {
            if let Some(slot) = slot {
                self.free_slots.push(slot);
            }
            drop(voice);
            n += 1;
        }
        n
    }

    fn attach(&mut self, audio: Arc<DecodedAudio>, controls: Arc<RouteControls>) -> Result<(usize, u64)> {
        self.collect_garbage();
        let slot = self
            .free_slots
            .pop()
            .ok_or_else(|| RehearsalError::Device(format!("all {MAX_VOICES} voices busy")))?;

        let voice_id = self.next_voice_id;
        self.next_voice_id += 1;

        if self.send(RouteCommand::Attach { slot, voice: Voice::new(voice_id, audio, controls) }).is_err() {
            self.free_slots.push(slot);
            return Err(RehearsalError::Device("route command backlog full".into()));
        }
        Ok((slot, voice_id))
    }
}

fn lock(link: &Mutex<MixerLink>) -> MutexGuard<'_, MixerLink> {
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `AudioOutput` over a `VoiceMixer`. Whoever owns the mixer decides where
/// the rendered audio goes: a device callback, or a test pulling blocks.
pub struct MixerOutput {
    link: Arc<Mutex<MixerLink>>,
    clock: Arc<FrameClock>,
    epoch: Arc<EpochGate>,
}

impl MixerOutput {
    pub fn new(sample_rate: u32) -> (Self, VoiceMixer) {
        let (cmd_tx, cmd_rx) = HeapRb::<RouteCommand>::new(COMMAND_CAPACITY).split();
        let (retire_tx, retire_rx) = HeapRb::<Retired>::new(MAX_VOICES * 2).split();
        let clock = Arc::new(FrameClock::new(sample_rate));
        let epoch = EpochGate::new();

        let link = MixerLink {
            commands: cmd_tx,
            retired: retire_rx,
            free_slots: (0..MAX_VOICES).rev().collect(),
            next_voice_id: 1,
            backlog: VecDeque::new(),
        };
        let mixer = VoiceMixer::new(cmd_rx, retire_tx, clock.clone(), epoch.clone());

        (Self { link: Arc::new(Mutex::new(link)), clock, epoch }, mixer)
    }

    pub fn clock(&self) -> &Arc<FrameClock> {
        &self.clock
    }
}

impl AudioOutput for MixerOutput {
    fn now(&self) -> f64 {
        self.clock.seconds()
    }

    fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    fn advance_epoch(&mut self) -> u64 {
        self.epoch.advance()
    }

    fn create_route(&mut self, audio: Arc<DecodedAudio>) -> Result<Box<dyn AudioRoute>> {
        let controls = RouteControls::new();
        let (slot, voice_id) = lock(&self.link).attach(audio, controls.clone())?;
        Ok(Box::new(MixerRoute {
            link: self.link.clone(),
            clock: self.clock.clone(),
            controls,
            slot,
            voice_id,
            stopped: false,
        }))
    }

    fn collect_garbage(&mut self) {
        let n = lock(&self.link).collect_garbage();
        if n > 0 {
            log::trace!("Released {n} finished voice(s)");
        }
    }
}

pub struct MixerRoute {
    link: Arc<Mutex<MixerLink>>,
    clock: Arc<FrameClock>,
    controls: Arc<RouteControls>,
    slot: usize,
    voice_id: u64,
    stopped: bool,
}

impl AudioRoute for MixerRoute {
    fn set_gain(&mut self, gain: f32) {
        self.controls.set_gain(gain);
    }

    fn set_pan(&mut self, pan: f32) {
        self.controls.set_pan(pan);
    }

    fn start(&mut self, at: f64, offset: f64, epoch: u64) {
        let cmd = RouteCommand::Start {
            slot: self.slot,
            voice_id: self.voice_id,
            epoch,
            at_frame: self.clock.seconds_to_frames(at),
            offset_frame: self.clock.seconds_to_frames(offset) as usize,
        };
        if lock(&self.link).send(cmd).is_err() {
            log::warn!("Route command backlog full, start of voice {} dropped", self.voice_id);
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let cmd = RouteCommand::Stop { slot: self.slot, voice_id: self.voice_id };
        if lock(&self.link).send(cmd).is_err() {
            log::warn!("Route command backlog full, stop of voice {} dropped", self.voice_id);
        }
    }
}

impl Drop for MixerRoute {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, sample_rate: u32) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(vec![vec![0.25; frames]; 2], sample_rate))
    }

    #[test]
    fn routes_render_and_recycle_slots() {
        let (mut output, mut mixer) = MixerOutput::new(1000);
        let epoch = output.advance_epoch();

        let mut route = output.create_route(tone(200, 1000)).unwrap();
        route.start(0.0, 0.0, epoch);

        let mut block = vec![0.0f32; 64 * 2];
        mixer.render(&mut block, 2);
        assert!(block[40] > 0.0);
        assert_eq!(mixer.active_voices(), 1);
        assert!((output.now() - 0.064).abs() < 1e-9);

        drop(route);
        mixer.render(&mut block, 2);
        assert_eq!(mixer.active_voices(), 0);

        let free_before = lock(&output.link).free_slots.len();
        output.collect_garbage();
        assert_eq!(lock(&output.link).free_slots.len(), free_before + 1);
    }

    #[test]
    fn commands_past_a_full_ring_are_delivered_later() {
        let (mut output, mut mixer) = MixerOutput::new(1000);
        let epoch = output.advance_epoch();
        let mut route = output.create_route(tone(10_000, 1000)).unwrap();

        // Attach plus these fill the ring; the rest park
        for _ in 0..COMMAND_CAPACITY + 20 {
            route.start(0.0, 0.0, epoch);
        }
        route.stop();
        assert_eq!(lock(&output.link).backlog_len(), 22);

        let mut block = vec![0.0f32; 64 * 2];
        mixer.render(&mut block, 2);
        assert_eq!(mixer.active_voices(), 1);

        // The parked stop reaches the mixer instead of being lost
        output.collect_garbage();
        assert_eq!(lock(&output.link).backlog_len(), 0);
        mixer.render(&mut block, 2);
        mixer.render(&mut block, 2);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn pool_exhaustion_is_a_device_error() {
        let (mut output, _mixer) = MixerOutput::new(1000);
        let mut routes = Vec::new();
        for _ in 0..MAX_VOICES {
            routes.push(output.create_route(tone(10, 1000)).unwrap());
        }
        let err = output.create_route(tone(10, 1000)).err().unwrap();
        assert!(matches!(err, RehearsalError::Device(_)));
    }
}
