//! Provisioning steps and the runner that applies them
//!
//! A plan is a DAG of [`ProvisioningStep`]s. The [`StepRunner`] executes it in
//! topological order and records one [`StepResult`] per step.

mod actions;
mod locks;
mod plan;
mod runner;

pub use locks::{LockGuard, LockManager};
pub use plan::{PlannedStep, ProvisioningPlan};
pub use runner::{RetryPolicy, StepRunner};

use crate::artifacts::{Artifact, ArtifactKind};
use crate::host::ServiceRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const LOCK_PACKAGE_MANAGER: &str = "package-manager";
pub const LOCK_SERVICE_SUPERVISOR: &str = "service-supervisor";
pub const LOCK_REVERSE_PROXY: &str = "reverse-proxy-config";
pub const LOCK_CONTAINER_ENGINE: &str = "container-engine";
pub const LOCK_FIREWALL: &str = "firewall";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    InstallPackages { packages: Vec<String> },
    WriteArtifact { artifact: Artifact },
    EnableService { service: ServiceRef },
    /// Start the service, or reload it when it runs with a configuration
    /// other than `config`
    StartService {
        service: ServiceRef,
        config: Option<String>,
    },
    OpenFirewallPort { port: u16 },
}

impl StepAction {
    /// Stable label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::InstallPackages { .. } => "install_packages",
            StepAction::WriteArtifact { .. } => "write_artifact",
            StepAction::EnableService { .. } => "enable_service",
            StepAction::StartService { .. } => "start_service",
            StepAction::OpenFirewallPort { .. } => "open_firewall_port",
        }
    }

    /// How a failure of this action affects the rest of the run
    pub fn severity(&self) -> Severity {
        match self {
            StepAction::InstallPackages { .. } | StepAction::WriteArtifact { .. } => Severity::Halt,
            StepAction::EnableService { .. } | StepAction::StartService { .. } => Severity::Fatal,
            StepAction::OpenFirewallPort { .. } => Severity::NonFatal,
        }
    }

    /// Name of the host resource lock this action needs
    pub fn lock_name(&self) -> &'static str {
        match self {
            StepAction::InstallPackages { .. } => LOCK_PACKAGE_MANAGER,
            StepAction::WriteArtifact { artifact } => match artifact.kind {
                ArtifactKind::ServiceUnit => LOCK_SERVICE_SUPERVISOR,
                ArtifactKind::ProxyRoute => LOCK_REVERSE_PROXY,
                ArtifactKind::ComposeStack => LOCK_CONTAINER_ENGINE,
            },
            StepAction::EnableService { service } | StepAction::StartService { service, .. } => {
                match service {
                    ServiceRef::Unit { .. } => LOCK_SERVICE_SUPERVISOR,
                    ServiceRef::Stack { .. } => LOCK_CONTAINER_ENGINE,
                }
            }
            StepAction::OpenFirewallPort { .. } => LOCK_FIREWALL,
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::InstallPackages { packages } => {
                write!(f, "install packages [{}]", packages.join(", "))
            }
            StepAction::WriteArtifact { artifact } => {
                write!(f, "write {} {}", artifact.kind, artifact.path.display())
            }
            StepAction::EnableService { service } => write!(f, "enable {}", service),
            StepAction::StartService { service, .. } => write!(f, "start {}", service),
            StepAction::OpenFirewallPort { port } => write!(f, "open firewall port {}/tcp", port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningStep {
    pub id: String,
    pub action: StepAction,
    pub idempotent: bool,
    pub depends_on: BTreeSet<String>,
}

impl ProvisioningStep {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            action,
            idempotent: true,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on
            .extend(deps.iter().map(|d| d.to_string()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Stop scheduling further steps
    Halt,
    /// Dependents are skipped, independent steps continue
    Fatal,
    /// Recorded only
    NonFatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Halt => f.write_str("halt"),
            Severity::Fatal => f.write_str("fatal"),
            Severity::NonFatal => f.write_str("non-fatal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySatisfied,
    DependencyFailed,
    CapabilityAbsent,
    RunHalted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadySatisfied => f.write_str("already satisfied"),
            SkipReason::DependencyFailed => f.write_str("dependency failed"),
            SkipReason::CapabilityAbsent => f.write_str("capability absent"),
            SkipReason::RunHalted => f.write_str("run halted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Skipped { reason: SkipReason },
    Failed { reason: String, severity: Severity },
}

impl StepStatus {
    pub fn skipped(reason: SkipReason) -> Self {
        StepStatus::Skipped { reason }
    }

    /// Whether dependents may run after this status
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            StepStatus::Success
                | StepStatus::Skipped {
                    reason: SkipReason::AlreadySatisfied | SkipReason::CapabilityAbsent
                }
        )
    }

    /// A Halt or Fatal failure
    pub fn is_blocking_failure(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed {
                severity: Severity::Halt | Severity::Fatal,
                ..
            }
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => f.write_str("success"),
            StepStatus::Skipped { reason } => write!(f, "skipped ({})", reason),
            StepStatus::Failed { severity, .. } => write!(f, "failed ({})", severity),
        }
    }
}

/// Outcome of one step, appended to the run log in topological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub action: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_by_action() {
        assert_eq!(
            StepAction::InstallPackages { packages: vec![] }.severity(),
            Severity::Halt
        );
        assert_eq!(
            StepAction::StartService {
                service: ServiceRef::unit("nginx"),
                config: None,
            }
            .severity(),
            Severity::Fatal
        );
        assert_eq!(
            StepAction::OpenFirewallPort { port: 80 }.severity(),
            Severity::NonFatal
        );
    }

    #[test]
    fn test_lock_names() {
        assert_eq!(
            StepAction::EnableService {
                service: ServiceRef::unit("webapp")
            }
            .lock_name(),
            LOCK_SERVICE_SUPERVISOR
        );
        assert_eq!(
            StepAction::StartService {
                service: ServiceRef::stack("webapp", "/srv/webapp/docker-compose.yml"),
                config: None,
            }
            .lock_name(),
            LOCK_CONTAINER_ENGINE
        );
        assert_eq!(
            StepAction::OpenFirewallPort { port: 80 }.lock_name(),
            LOCK_FIREWALL
        );
    }

    #[test]
    fn test_status_satisfied() {
        assert!(StepStatus::Success.is_satisfied());
        assert!(StepStatus::skipped(SkipReason::AlreadySatisfied).is_satisfied());
        assert!(StepStatus::skipped(SkipReason::CapabilityAbsent).is_satisfied());
        assert!(!StepStatus::skipped(SkipReason::DependencyFailed).is_satisfied());
        assert!(!StepStatus::skipped(SkipReason::RunHalted).is_satisfied());
        let nonfatal = StepStatus::Failed {
            reason: "no".to_string(),
            severity: Severity::NonFatal,
        };
        assert!(!nonfatal.is_satisfied());
        assert!(!nonfatal.is_blocking_failure());
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(StepStatus::skipped(SkipReason::RunHalted)).unwrap();
        assert_eq!(json["state"], "skipped");
        assert_eq!(json["reason"], "run_halted");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::Success.to_string(), "success");
        assert_eq!(
            StepStatus::skipped(SkipReason::AlreadySatisfied).to_string(),
            "skipped (already satisfied)"
        );
        let failed = StepStatus::Failed {
            reason: "boom".to_string(),
            severity: Severity::Halt,
        };
        assert_eq!(failed.to_string(), "failed (halt)");
    }
}
