//! Run summary and outcome classification

use crate::descriptor::DeploymentDescriptor;
use crate::health::{HealthState, SmokeCheck};
use crate::steps::StepResult;
use crate::strategy::strategy_for;
use crate::topology::Topology;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_PARTIAL_FAILURE: i32 = 2;
pub const EXIT_UNHEALTHY: i32 = 3;
pub const EXIT_UNSUPPORTED_TOPOLOGY: i32 = 4;
pub const EXIT_PREFLIGHT: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialFailure,
    Unhealthy,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => EXIT_SUCCESS,
            RunOutcome::PartialFailure => EXIT_PARTIAL_FAILURE,
            RunOutcome::Unhealthy => EXIT_UNHEALTHY,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::PartialFailure => f.write_str("partial failure"),
            RunOutcome::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub topology: Topology,
    pub outcome: RunOutcome,
    pub steps: Vec<StepResult>,
    pub health: HealthState,
    /// Only populated on success
    pub access_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smoke_checks: Vec<SmokeCheck>,
}

impl Summary {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// Smoke checks that did not pass; reported but not counted against the outcome
    pub fn warnings(&self) -> Vec<String> {
        self.smoke_checks
            .iter()
            .filter(|c| !c.ok)
            .map(|c| {
                format!(
                    "smoke check {} failed: {}",
                    c.path,
                    c.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }
}

/// Success only with no Halt/Fatal failure and a healthy service
pub fn classify(results: &[StepResult], health: &HealthState) -> RunOutcome {
    if results.iter().any(|r| r.status.is_blocking_failure()) {
        RunOutcome::PartialFailure
    } else if health.healthy {
        RunOutcome::Success
    } else {
        RunOutcome::Unhealthy
    }
}

/// Timing and identity of a run, filled in by the caller
#[derive(Debug, Clone, Copy)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunMeta {
    pub fn started_now() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

pub fn report(
    meta: RunMeta,
    results: Vec<StepResult>,
    health: HealthState,
    smoke_checks: Vec<SmokeCheck>,
    descriptor: &DeploymentDescriptor,
    topology: Topology,
) -> Summary {
    let outcome = classify(&results, &health);
    let access_urls = if outcome == RunOutcome::Success {
        strategy_for(topology).access_urls(descriptor)
    } else {
        Vec::new()
    };

    Summary {
        run_id: meta.run_id,
        started_at: meta.started_at,
        finished_at: meta.finished_at,
        topology,
        outcome,
        steps: results,
        health,
        access_urls,
        smoke_checks,
    }
}
