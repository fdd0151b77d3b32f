// src/engine/testing.rs
//
// Recording output for transport tests. The clock only moves when a test
// moves it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::route::{AudioOutput, AudioRoute};
use crate::decoder::DecodedAudio;
use crate::error::{RehearsalError, Result};

#[derive(Debug, Clone)]
pub struct RouteLog {
    pub frames: usize,
    pub gain: f32,
    pub pan: f32,
    pub starts: Vec<(f64, f64, u64)>,
    pub stopped: bool,
}

impl RouteLog {
    pub fn is_live(&self) -> bool {
        !self.starts.is_empty() && !self.stopped
    }
}

#[derive(Default)]
pub struct MockOutput {
    pub now: f64,
    pub epoch: u64,
    pub fail_create: bool,
    pub routes: Rc<RefCell<Vec<RouteLog>>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<RouteLog> {
        self.routes.borrow().clone()
    }

    pub fn live(&self) -> Vec<RouteLog> {
        self.routes.borrow().iter().filter(|r| r.is_live()).cloned().collect()
    }
}

impl AudioOutput for MockOutput {
    fn now(&self) -> f64 {
        self.now
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn create_route(&mut self, audio: Arc<DecodedAudio>) -> Result<Box<dyn AudioRoute>> {
        if self.fail_create {
            return Err(RehearsalError::Device("mock refuses routes".into()));
        }
        let mut routes = self.routes.borrow_mut();
        routes.push(RouteLog {
            frames: audio.frames(),
            gain: 1.0,
            pan: 0.0,
            starts: Vec::new(),
            stopped: false,
        });
        Ok(Box::new(MockRoute { index: routes.len() - 1, routes: self.routes.clone() }))
    }
}

pub struct MockRoute {
    index: usize,
    routes: Rc<RefCell<Vec<RouteLog>>>,
}

impl MockRoute {
    fn with<F: FnOnce(&mut RouteLog)>(&self, f: F) {
        f(&mut self.routes.borrow_mut()[self.index]);
    }
}

impl AudioRoute for MockRoute {
    fn set_gain(&mut self, gain: f32) {
        self.with(|r| r.gain = gain);
    }

    fn set_pan(&mut self, pan: f32) {
        self.with(|r| r.pan = pan);
    }

    fn start(&mut self, at: f64, offset: f64, epoch: u64) {
        self.with(|r| r.starts.push((at, offset, epoch)));
    }

    fn stop(&mut self) {
        self.with(|r| r.stopped = true);
    }
}

pub fn silent_audio(seconds: f64) -> Arc<DecodedAudio> {
    let sr = 1000;
    Arc::new(DecodedAudio::new(vec![vec![0.0; (seconds * sr as f64) as usize]], sr))
}
