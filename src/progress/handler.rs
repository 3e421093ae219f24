//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a provisioning run progresses
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run started
    Started { intent: String },

    /// Host capabilities are known
    ProbeComplete {
        os_family: String,
        probe_time: Duration,
    },

    /// Topology chosen
    TopologySelected { topology: String },

    PhaseStarted { phase: String },

    PhaseComplete { phase: String, duration: Duration },

    /// A step is about to run
    StepStarted {
        step_id: String,
        index: usize,
        total: usize,
    },

    /// An attempt failed and the step will be retried
    StepRetrying {
        step_id: String,
        attempt: u32,
        error: String,
        backoff: Duration,
    },

    /// A step reached its final status
    StepFinished {
        step_id: String,
        status: String,
        attempts: u32,
        duration: Duration,
    },

    /// One health probe was sent
    HealthPoll {
        attempt: u32,
        healthy: bool,
        error: Option<String>,
    },

    /// Run finished with a summary
    Completed {
        outcome: String,
        total_time: Duration,
    },

    /// Run aborted before producing a summary
    Failed { error: String },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}
