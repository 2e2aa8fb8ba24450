//! Apply context and callback traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific progress UI.

use crate::planner::Step;
use crate::types::{ApplyResult, ResourceId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation signal shared between the executor and provider calls
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token; every holder observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
/// Callbacks are invoked from the calling thread, never from workers.
pub trait ProgressCallback: Send {
    /// Called when a wave is about to be dispatched
    fn on_wave_start(&mut self, index: usize, total: usize, steps: usize);

    /// Called when a plan step finishes (successfully or not)
    fn on_step_complete(&mut self, step: &Step, result: &ApplyResult);

    /// Called once every step of the wave has finished
    fn on_wave_complete(&mut self, index: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&mut self, _index: usize, _total: usize, _steps: usize) {}
    fn on_step_complete(&mut self, _step: &Step, _result: &ApplyResult) {}
    fn on_wave_complete(&mut self, _index: usize) {}
}

/// Context passed to provider operations
pub struct ApplyContext<'a> {
    /// Resource the call is made for
    pub resource: &'a ResourceId,
    /// Whether to output verbose information
    pub verbose: bool,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Tripped when the run is being cancelled
    pub cancel: &'a CancelToken,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(resource: &'a ResourceId, cancel: &'a CancelToken) -> Self {
        Self {
            resource,
            verbose: false,
            attempt: 1,
            cancel,
        }
    }

    /// Whether the provider should abandon the call
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
