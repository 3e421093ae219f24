//! One strategy per topology: which artifacts, which steps, where to probe
//!
//! Adding a topology means adding a [`Topology`] variant and one
//! [`TopologyStrategy`] implementation.

use crate::artifacts::{self, Artifact, ArtifactKind};
use crate::descriptor::DeploymentDescriptor;
use crate::error::ProvisionError;
use crate::health::HealthTarget;
use crate::host::ServiceRef;
use crate::steps::{ProvisioningPlan, ProvisioningStep, StepAction};
use crate::topology::Topology;
use anyhow::Result;

pub trait TopologyStrategy: Send + Sync {
    /// Render the configuration files, in the order they are written
    fn artifacts(&self, descriptor: &DeploymentDescriptor) -> Result<Vec<Artifact>>;

    /// Build the step DAG that applies `artifacts` to the host
    fn plan(
        &self,
        descriptor: &DeploymentDescriptor,
        artifacts: &[Artifact],
    ) -> Result<ProvisioningPlan, ProvisionError>;

    /// Endpoint polled after the steps ran
    fn health_target(&self, descriptor: &DeploymentDescriptor) -> HealthTarget;

    /// URLs operators use to reach the service
    fn access_urls(&self, descriptor: &DeploymentDescriptor) -> Vec<String>;
}

pub fn strategy_for(topology: Topology) -> Box<dyn TopologyStrategy> {
    match topology {
        Topology::Native => Box::new(NativeStrategy),
        Topology::Containerized => Box::new(ContainerizedStrategy),
    }
}

fn find_artifact(artifacts: &[Artifact], kind: ArtifactKind) -> Result<Artifact, ProvisionError> {
    artifacts
        .iter()
        .find(|a| a.kind == kind)
        .cloned()
        .ok_or_else(|| ProvisionError::InvalidPlan(format!("no {} artifact generated", kind)))
}

/// Start step that also reloads the service once its artifacts change
fn start_with(artifacts: &[Artifact], service: ServiceRef) -> StepAction {
    let config = artifacts::config_fingerprint(artifacts, &service);
    StepAction::StartService { service, config }
}

/// Supervised process behind a reverse proxy
pub struct NativeStrategy;

impl TopologyStrategy for NativeStrategy {
    fn artifacts(&self, descriptor: &DeploymentDescriptor) -> Result<Vec<Artifact>> {
        Ok(vec![
            artifacts::service_unit_artifact(descriptor),
            artifacts::proxy_route_artifact(descriptor),
        ])
    }

    fn plan(
        &self,
        descriptor: &DeploymentDescriptor,
        artifacts: &[Artifact],
    ) -> Result<ProvisioningPlan, ProvisionError> {
        let unit = find_artifact(artifacts, ArtifactKind::ServiceUnit)?;
        let route = find_artifact(artifacts, ArtifactKind::ProxyRoute)?;

        let mut packages = vec![artifacts::PROXY_SERVICE.to_string()];
        packages.extend(
            descriptor
                .packages
                .iter()
                .filter(|p| p.as_str() != artifacts::PROXY_SERVICE)
                .cloned(),
        );

        let app = artifacts::app_service(descriptor);
        let proxy = artifacts::proxy_service();
        let firewall_id = format!("open-firewall-{}", descriptor.public_port);

        ProvisioningPlan::new(vec![
            ProvisioningStep::new("install-packages", StepAction::InstallPackages { packages }),
            ProvisioningStep::new("write-service-unit", StepAction::WriteArtifact { artifact: unit }),
            ProvisioningStep::new("write-proxy-route", StepAction::WriteArtifact { artifact: route })
                .after(&["install-packages"]),
            ProvisioningStep::new("enable-app", StepAction::EnableService { service: app.clone() })
                .after(&["write-service-unit"]),
            ProvisioningStep::new("start-app", start_with(artifacts, app))
                .after(&["install-packages", "enable-app"]),
            ProvisioningStep::new(
                "enable-proxy",
                StepAction::EnableService {
                    service: proxy.clone(),
                },
            )
            .after(&["install-packages", "write-proxy-route"]),
            ProvisioningStep::new("start-proxy", start_with(artifacts, proxy))
                .after(&["enable-proxy", "start-app"]),
            ProvisioningStep::new(
                firewall_id,
                StepAction::OpenFirewallPort {
                    port: descriptor.public_port,
                },
            ),
        ])
    }

    fn health_target(&self, descriptor: &DeploymentDescriptor) -> HealthTarget {
        let target = HealthTarget::new(format!(
            "http://127.0.0.1:{}{}",
            descriptor.public_port, descriptor.health_path
        ));
        match descriptor.public_host_names.first() {
            Some(host) => target.with_host_header(host.clone()),
            None => target,
        }
    }

    fn access_urls(&self, descriptor: &DeploymentDescriptor) -> Vec<String> {
        descriptor
            .public_host_names
            .iter()
            .map(|host| {
                if descriptor.public_port == 80 {
                    format!("http://{}", host)
                } else {
                    format!("http://{}:{}", host, descriptor.public_port)
                }
            })
            .collect()
    }
}

/// Compose-managed container stack
pub struct ContainerizedStrategy;

impl TopologyStrategy for ContainerizedStrategy {
    fn artifacts(&self, descriptor: &DeploymentDescriptor) -> Result<Vec<Artifact>> {
        Ok(vec![artifacts::compose_artifact(descriptor)?])
    }

    fn plan(
        &self,
        descriptor: &DeploymentDescriptor,
        artifacts: &[Artifact],
    ) -> Result<ProvisioningPlan, ProvisionError> {
        let compose = find_artifact(artifacts, ArtifactKind::ComposeStack)?;
        let engine = artifacts::engine_service();
        let stack = artifacts::stack_service(descriptor);

        let mut steps = Vec::new();
        let mut stack_deps = vec!["write-stack", "start-engine"];
        if !descriptor.packages.is_empty() {
            steps.push(ProvisioningStep::new(
                "install-packages",
                StepAction::InstallPackages {
                    packages: descriptor.packages.iter().cloned().collect(),
                },
            ));
            stack_deps.push("install-packages");
        }

        steps.extend([
            ProvisioningStep::new("write-stack", StepAction::WriteArtifact { artifact: compose }),
            ProvisioningStep::new(
                "enable-engine",
                StepAction::EnableService {
                    service: engine.clone(),
                },
            ),
            ProvisioningStep::new(
                "start-engine",
                StepAction::StartService {
                    service: engine,
                    config: None,
                },
            )
            .after(&["enable-engine"]),
            ProvisioningStep::new("start-stack", start_with(artifacts, stack))
                .after(&stack_deps),
            ProvisioningStep::new(
                format!("open-firewall-{}", descriptor.bind_port),
                StepAction::OpenFirewallPort {
                    port: descriptor.bind_port,
                },
            ),
        ]);

        ProvisioningPlan::new(steps)
    }

    fn health_target(&self, descriptor: &DeploymentDescriptor) -> HealthTarget {
        HealthTarget::new(format!(
            "http://127.0.0.1:{}{}",
            descriptor.bind_port, descriptor.health_path
        ))
    }

    fn access_urls(&self, descriptor: &DeploymentDescriptor) -> Vec<String> {
        descriptor
            .public_host_names
            .iter()
            .map(|host| format!("http://{}:{}", host, descriptor.bind_port))
            .collect()
    }
}
