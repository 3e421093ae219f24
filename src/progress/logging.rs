//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { intent } => {
                info!(intent = %intent, "Starting provisioning run");
            }
            ProgressEvent::ProbeComplete {
                os_family,
                probe_time,
            } => {
                info!(
                    os_family = %os_family,
                    probe_time_ms = probe_time.as_millis(),
                    "Host probe complete"
                );
            }
            ProgressEvent::TopologySelected { topology } => {
                info!(topology = %topology, "Topology selected");
            }
            ProgressEvent::PhaseStarted { phase } => {
                info!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                info!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::StepStarted {
                step_id,
                index,
                total,
            } => {
                info!(
                    step = %step_id,
                    progress = format!("{}/{}", index, total),
                    "Running step"
                );
            }
            ProgressEvent::StepRetrying {
                step_id,
                attempt,
                error,
                backoff,
            } => {
                warn!(
                    step = %step_id,
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %error,
                    "Step attempt failed, retrying"
                );
            }
            ProgressEvent::StepFinished {
                step_id,
                status,
                attempts,
                duration,
            } => {
                if status.starts_with("failed") {
                    warn!(
                        step = %step_id,
                        status = %status,
                        attempts,
                        duration_ms = duration.as_millis(),
                        "Step failed"
                    );
                } else {
                    info!(
                        step = %step_id,
                        status = %status,
                        attempts,
                        duration_ms = duration.as_millis(),
                        "Step finished"
                    );
                }
            }
            ProgressEvent::HealthPoll {
                attempt,
                healthy,
                error,
            } => {
                if *healthy {
                    info!(attempt, "Health check passed");
                } else {
                    debug!(
                        attempt,
                        error = error.as_deref().unwrap_or("unknown"),
                        "Health check not passing yet"
                    );
                }
            }
            ProgressEvent::Completed {
                outcome,
                total_time,
            } => {
                info!(
                    outcome = %outcome,
                    total_time_ms = total_time.as_millis(),
                    "Provisioning run complete"
                );
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Provisioning run failed");
            }
        }
    }
}
