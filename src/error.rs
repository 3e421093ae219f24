//! Error taxonomy for provisioning runs
//!
//! Pre-flight errors (`CapabilityMissing`, `UnsupportedTopology`,
//! `InvalidDescriptor`, `InvalidPlan`) are raised before the host is touched.
//! Action errors describe what happened to a single step and end up in the
//! step log rather than aborting the run.

use crate::probe::Capability;
use crate::topology::TopologyIntent;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Something the run needs is absent on the host (pre-flight)
    #[error("Missing capability: {0}")]
    CapabilityMissing(String),

    /// The requested topology cannot be deployed on this host (pre-flight)
    #[error(
        "Unsupported topology '{intent}': missing {}",
        missing.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    )]
    UnsupportedTopology {
        intent: TopologyIntent,
        missing: Vec<Capability>,
    },

    #[error("Invalid deployment descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid provisioning plan: {0}")]
    InvalidPlan(String),

    /// A single attempt failed; eligible for retry
    #[error("Attempt {attempt} of step '{step}' failed: {message}")]
    TransientActionFailure {
        step: String,
        attempt: u32,
        message: String,
    },

    /// Retries exhausted
    #[error("Step '{step}' failed after {attempts} attempt(s): {last_error}")]
    FatalActionFailure {
        step: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Health check did not pass within {}s: {}", timeout.as_secs(), last_error.as_deref().unwrap_or("no response"))]
    HealthCheckTimeout {
        timeout: Duration,
        last_error: Option<String>,
    },
}

impl ProvisionError {
    /// Pre-flight errors are reported before any host mutation was attempted.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            ProvisionError::CapabilityMissing(_)
                | ProvisionError::UnsupportedTopology { .. }
                | ProvisionError::InvalidDescriptor(_)
                | ProvisionError::InvalidPlan(_)
        )
    }

    pub fn missing_capabilities(&self) -> &[Capability] {
        match self {
            ProvisionError::UnsupportedTopology { missing, .. } => missing,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_topology_lists_missing() {
        let err = ProvisionError::UnsupportedTopology {
            intent: TopologyIntent::Native,
            missing: vec![
                Capability::PackageManager,
                Capability::ProcessSupervisor,
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("native"));
        assert!(msg.contains("package manager"));
        assert!(msg.contains("process supervisor"));
        assert!(err.is_preflight());
        assert_eq!(err.missing_capabilities().len(), 2);
    }

    #[test]
    fn test_action_failures_are_not_preflight() {
        let err = ProvisionError::FatalActionFailure {
            step: "write-service-unit".to_string(),
            attempts: 3,
            last_error: "Permission denied".to_string(),
        };
        assert!(!err.is_preflight());
        assert!(err.to_string().contains("3 attempt(s)"));
        assert!(err.missing_capabilities().is_empty());
    }

    #[test]
    fn test_health_timeout_message() {
        let err = ProvisionError::HealthCheckTimeout {
            timeout: Duration::from_secs(120),
            last_error: None,
        };
        assert_eq!(
            err.to_string(),
            "Health check did not pass within 120s: no response"
        );
    }
}
