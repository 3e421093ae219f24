//! End-to-end control flow of a provisioning run
//!
//! probe → select → validate → prerequisites → artifacts → plan → steps →
//! health → smoke checks → report. Everything before the step runner is
//! read-only; a failure there is returned as a pre-flight [`ProvisionError`]
//! and the host is left untouched.

use crate::artifacts::Artifact;
use crate::config::HostrigConfig;
use crate::descriptor::DeploymentDescriptor;
use crate::error::ProvisionError;
use crate::health::{smoke_checks, HealthPolicy, HealthProbe, HealthState, HealthVerifier};
use crate::host::Host;
use crate::probe::{self, HostCapabilities};
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::report::{report, RunMeta, Summary};
use crate::steps::{LockManager, PlannedStep, ProvisioningPlan, RetryPolicy, StepRunner};
use crate::strategy::strategy_for;
use crate::topology::{self, Topology, TopologyIntent};
use crate::validation::Validator;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

/// Knobs for one run, usually derived from [`HostrigConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub health: HealthPolicy,
    pub max_parallel: usize,
    pub lock_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            health: HealthPolicy::default(),
            max_parallel: 1,
            lock_dir: None,
        }
    }
}

impl From<&HostrigConfig> for RunSettings {
    fn from(config: &HostrigConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            health: config.health_policy(),
            max_parallel: config.max_parallel,
            lock_dir: config.lock_dir.clone(),
        }
    }
}

/// Everything decided before the host is touched
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub capabilities: HostCapabilities,
    pub topology: Topology,
    pub artifacts: Vec<Artifact>,
    pub plan: ProvisioningPlan,
}

/// What a dry run prints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunPlan {
    pub topology: Topology,
    pub capabilities: HostCapabilities,
    pub artifacts: Vec<Artifact>,
    pub steps: Vec<PlannedStep>,
}

impl From<PreparedRun> for DryRunPlan {
    fn from(prepared: PreparedRun) -> Self {
        Self {
            topology: prepared.topology,
            capabilities: prepared.capabilities,
            steps: prepared.plan.planned(),
            artifacts: prepared.artifacts,
        }
    }
}

pub struct Orchestrator {
    host: Arc<dyn Host>,
    probe: Arc<dyn HealthProbe>,
    settings: RunSettings,
    progress: Option<Arc<dyn ProgressHandler>>,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn Host>, probe: Arc<dyn HealthProbe>, settings: RunSettings) -> Self {
        Self {
            host,
            probe,
            settings,
            progress: None,
        }
    }

    pub fn with_progress(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(handler);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(handler) = &self.progress {
            handler.on_progress(&event);
        }
    }

    fn fail(&self, error: ProvisionError) -> ProvisionError {
        self.emit(ProgressEvent::Failed {
            error: error.to_string(),
        });
        error
    }

    /// Run every read-only phase and return the plan that would execute.
    pub async fn prepare(
        &self,
        descriptor: &DeploymentDescriptor,
        intent: TopologyIntent,
    ) -> Result<PreparedRun, ProvisionError> {
        self.emit(ProgressEvent::Started {
            intent: intent.to_string(),
        });

        let probe_start = Instant::now();
        let capabilities = probe::probe(self.host.as_ref()).await;
        self.emit(ProgressEvent::ProbeComplete {
            os_family: capabilities.os_family.clone(),
            probe_time: probe_start.elapsed(),
        });

        let topology = topology::select(intent, &capabilities).map_err(|e| self.fail(e))?;
        self.emit(ProgressEvent::TopologySelected {
            topology: topology.to_string(),
        });

        Validator::new()
            .validate(descriptor, topology)
            .map_err(|e| self.fail(ProvisionError::InvalidDescriptor(format!("{:#}", e))))?;
        descriptor
            .check_prerequisites()
            .map_err(|e| self.fail(e))?;

        let strategy = strategy_for(topology);
        let artifacts = strategy.artifacts(descriptor).map_err(|e| {
            self.fail(ProvisionError::InvalidPlan(format!(
                "artifact generation failed: {:#}",
                e
            )))
        })?;
        let plan = strategy
            .plan(descriptor, &artifacts)
            .map_err(|e| self.fail(e))?;

        info!(
            "Prepared {} deployment of '{}': {} artifact(s), {} step(s)",
            topology,
            descriptor.name,
            artifacts.len(),
            plan.len()
        );

        Ok(PreparedRun {
            capabilities,
            topology,
            artifacts,
            plan,
        })
    }

    pub async fn dry_run(
        &self,
        descriptor: &DeploymentDescriptor,
        intent: TopologyIntent,
    ) -> Result<DryRunPlan, ProvisionError> {
        self.prepare(descriptor, intent).await.map(DryRunPlan::from)
    }

    /// Provision the host and verify the service.
    ///
    /// Pre-flight failures return `Err` with no summary. Once steps start,
    /// the run always ends in a [`Summary`], whatever happened on the host.
    pub async fn provision(
        &self,
        descriptor: &DeploymentDescriptor,
        intent: TopologyIntent,
        cancel: watch::Receiver<bool>,
    ) -> Result<Summary, ProvisionError> {
        let run_start = Instant::now();
        let meta = RunMeta::started_now();
        let prepared = self.prepare(descriptor, intent).await?;
        let strategy = strategy_for(prepared.topology);

        self.emit(ProgressEvent::PhaseStarted {
            phase: "steps".to_string(),
        });
        let phase_start = Instant::now();
        let locks = match &self.settings.lock_dir {
            Some(dir) => LockManager::with_dir(dir.clone()),
            None => LockManager::new(),
        };
        let mut runner = StepRunner::new(self.host.clone())
            .with_policy(self.settings.retry)
            .with_locks(Arc::new(locks))
            .with_max_parallel(self.settings.max_parallel)
            .with_firewall(prepared.capabilities.firewall_active);
        if let Some(handler) = &self.progress {
            runner = runner.with_progress(handler.clone());
        }
        let results = runner.run(&prepared.plan).await;
        self.emit(ProgressEvent::PhaseComplete {
            phase: "steps".to_string(),
            duration: phase_start.elapsed(),
        });

        let mut checks = Vec::new();
        let health = if results.iter().any(|r| r.status.is_blocking_failure()) {
            warn!("Skipping health verification: provisioning did not complete");
            HealthState::default()
        } else {
            self.emit(ProgressEvent::PhaseStarted {
                phase: "health".to_string(),
            });
            let phase_start = Instant::now();
            let target = strategy.health_target(descriptor);
            let mut verifier = HealthVerifier::new(self.probe.clone());
            if let Some(handler) = &self.progress {
                verifier = verifier.with_progress(handler.clone());
            }
            let state = verifier
                .verify(&target, self.settings.health, cancel)
                .await;
            if state.healthy && !descriptor.smoke_paths.is_empty() {
                checks = smoke_checks(self.probe.as_ref(), &target, &descriptor.smoke_paths).await;
            }
            self.emit(ProgressEvent::PhaseComplete {
                phase: "health".to_string(),
                duration: phase_start.elapsed(),
            });
            state
        };

        let summary = report(
            meta.finish(),
            results,
            health,
            checks,
            descriptor,
            prepared.topology,
        );

        info!(
            "Run {} finished: {} ({} step(s))",
            summary.run_id,
            summary.outcome,
            summary.steps.len()
        );
        self.emit(ProgressEvent::Completed {
            outcome: summary.outcome.to_string(),
            total_time: run_start.elapsed(),
        });

        Ok(summary)
    }
}
