// src/engine/route.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::DecodedAudio;
use crate::error::Result;

/// The device side of the transport: a clock plus a factory for routes.
pub trait AudioOutput {
    /// Engine clock in seconds. Monotonic, pulled on demand.
    fn now(&self) -> f64;

    fn sample_rate(&self) -> u32;

    /// Invalidate every start command issued so far and return the new epoch.
    fn advance_epoch(&mut self) -> u64;

    /// A stopped route for `audio`, gain 1 and centred.
    fn create_route(&mut self, audio: Arc<DecodedAudio>) -> Result<Box<dyn AudioRoute>>;

    /// Release resources handed back by the render side.
    fn collect_garbage(&mut self) {}
}

/// One track's path through the output: source, gain, pan.
pub trait AudioRoute {
    fn set_gain(&mut self, gain: f32);

    /// -1.0 left, 0 centre, +1.0 right.
    fn set_pan(&mut self, pan: f32);

    /// Start at engine time `at`, reading the source from `offset` seconds.
    /// Starts issued under an older `epoch` are ignored.
    fn start(&mut self, at: f64, offset: f64, epoch: u64);

    fn stop(&mut self);
}

/// Shared epoch counter between the control thread and the render callback.
#[derive(Debug, Default)]
pub struct EpochGate {
    current: AtomicU64,
}

impl EpochGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn admits(&self, epoch: u64) -> bool {
        epoch >= self.current()
    }
}
