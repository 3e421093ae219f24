//! Idempotent application of a single step action

use super::StepAction;
use crate::host::Host;
use anyhow::Result;
use tracing::{debug, info};

/// Bring the host to the state `action` describes.
///
/// Returns `true` when the host was changed and `false` when it already
/// matched. Each branch queries before it mutates. Whether a running
/// service has picked up its configuration is read back from the host, so
/// a reload that failed in an earlier run is retried by the next one.
pub async fn apply(host: &dyn Host, action: &StepAction) -> Result<bool> {
    match action {
        StepAction::InstallPackages { packages } => {
            let mut missing = Vec::new();
            for package in packages {
                if !host.package_installed(package).await? {
                    missing.push(package.clone());
                }
            }
            if missing.is_empty() {
                debug!("All {} package(s) already installed", packages.len());
                return Ok(false);
            }
            info!("Installing packages: {}", missing.join(", "));
            host.install_packages(&missing).await?;
            Ok(true)
        }

        StepAction::WriteArtifact { artifact } => {
            let current = host.read_file(&artifact.path).await?;
            if artifact.matches(current.as_deref()) {
                debug!("{} unchanged", artifact.path.display());
                return Ok(false);
            }
            info!(
                "Writing {} ({})",
                artifact.path.display(),
                &artifact.digest()[..12]
            );
            host.write_file(&artifact.path, artifact.content.as_bytes(), artifact.mode)
                .await?;
            Ok(true)
        }

        StepAction::EnableService { service } => {
            if host.service_enabled(service).await? {
                return Ok(false);
            }
            info!("Enabling {}", service);
            host.enable_service(service).await?;
            Ok(true)
        }

        StepAction::StartService { service, config } => {
            if host.service_active(service).await? {
                let Some(wanted) = config else {
                    return Ok(false);
                };
                let applied = host.applied_config(service).await?;
                if applied.as_deref() == Some(wanted.as_str()) {
                    return Ok(false);
                }
                info!(
                    "Reloading {} to apply configuration {}",
                    service,
                    wanted.get(..12).unwrap_or(wanted.as_str())
                );
                host.reload_service(service).await?;
            } else {
                info!("Starting {}", service);
                host.start_service(service).await?;
            }
            if let Some(wanted) = config {
                host.record_applied_config(service, wanted).await?;
            }
            Ok(true)
        }

        StepAction::OpenFirewallPort { port } => {
            if host.firewall_allows(*port).await? {
                return Ok(false);
            }
            info!("Allowing {}/tcp through the firewall", port);
            host.allow_firewall_port(*port).await?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{Artifact, ArtifactKind};
    use crate::host::{MockHost, MockOperation, ServiceRef};
    use std::path::PathBuf;

    const ROUTE_V1: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const ROUTE_V2: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn artifact(content: &str) -> Artifact {
        Artifact {
            name: "webapp.conf".to_string(),
            kind: ArtifactKind::ProxyRoute,
            path: PathBuf::from("/etc/nginx/conf.d/webapp.conf"),
            content: content.to_string(),
            mode: 0o644,
            reloads: vec![ServiceRef::unit("nginx")],
        }
    }

    fn start(service: &ServiceRef, config: &str) -> StepAction {
        StepAction::StartService {
            service: service.clone(),
            config: Some(config.to_string()),
        }
    }

    #[tokio::test]
    async fn test_install_only_missing() {
        let host = MockHost::native_ready().with_installed("nginx");
        let action = StepAction::InstallPackages {
            packages: vec!["nginx".to_string(), "python3-venv".to_string()],
        };

        assert!(apply(&host, &action).await.unwrap());
        assert_eq!(host.mutations(), vec!["install python3-venv"]);

        assert!(!apply(&host, &action).await.unwrap());
        assert_eq!(host.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_write_artifact_only_on_change() {
        let host = MockHost::native_ready();
        let action = StepAction::WriteArtifact {
            artifact: artifact("server {}\n"),
        };

        assert!(apply(&host, &action).await.unwrap());
        assert_eq!(
            host.file("/etc/nginx/conf.d/webapp.conf").as_deref(),
            Some("server {}\n")
        );
        assert!(!apply(&host, &action).await.unwrap());
        assert_eq!(host.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_start_records_applied_config() {
        let host = MockHost::native_ready();
        let nginx = ServiceRef::unit("nginx");

        assert!(apply(&host, &start(&nginx, ROUTE_V1)).await.unwrap());
        assert!(host.is_active(&nginx));
        assert_eq!(
            host.applied_config(&nginx).await.unwrap().as_deref(),
            Some(ROUTE_V1)
        );
        assert!(host.reloads().is_empty());

        assert!(!apply(&host, &start(&nginx, ROUTE_V1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_service_reloads_on_new_config() {
        let nginx = ServiceRef::unit("nginx");
        let host = MockHost::native_ready().with_active(nginx.clone());
        host.record_applied_config(&nginx, ROUTE_V1).await.unwrap();

        assert!(!apply(&host, &start(&nginx, ROUTE_V1)).await.unwrap());
        assert!(host.reloads().is_empty());

        assert!(apply(&host, &start(&nginx, ROUTE_V2)).await.unwrap());
        assert_eq!(host.reloads(), vec![nginx.clone()]);
        assert_eq!(
            host.applied_config(&nginx).await.unwrap().as_deref(),
            Some(ROUTE_V2)
        );
    }

    #[tokio::test]
    async fn test_running_service_without_record_is_reloaded() {
        let nginx = ServiceRef::unit("nginx");
        let host = MockHost::native_ready().with_active(nginx.clone());

        assert!(apply(&host, &start(&nginx, ROUTE_V1)).await.unwrap());
        assert_eq!(host.reloads(), vec![nginx]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_old_record() {
        let nginx = ServiceRef::unit("nginx");
        let host = MockHost::native_ready().with_active(nginx.clone());
        host.record_applied_config(&nginx, ROUTE_V1).await.unwrap();
        host.fail_next(MockOperation::ReloadService, 1, "config test failed");

        assert!(apply(&host, &start(&nginx, ROUTE_V2)).await.is_err());
        assert_eq!(
            host.applied_config(&nginx).await.unwrap().as_deref(),
            Some(ROUTE_V1)
        );

        assert!(apply(&host, &start(&nginx, ROUTE_V2)).await.unwrap());
        assert_eq!(host.reloads(), vec![nginx]);
    }

    #[tokio::test]
    async fn test_unconfigured_active_service_is_left_alone() {
        let docker = ServiceRef::unit("docker");
        let host = MockHost::native_ready().with_active(docker.clone());
        let action = StepAction::StartService {
            service: docker.clone(),
            config: None,
        };

        assert!(!apply(&host, &action).await.unwrap());
        assert!(host.reloads().is_empty());
        assert_eq!(host.applied_config(&docker).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_enable_and_firewall_idempotent() {
        let host = MockHost::native_ready();
        let enable = StepAction::EnableService {
            service: ServiceRef::unit("webapp"),
        };
        let open = StepAction::OpenFirewallPort { port: 80 };

        assert!(apply(&host, &enable).await.unwrap());
        assert!(!apply(&host, &enable).await.unwrap());
        assert!(apply(&host, &open).await.unwrap());
        assert!(!apply(&host, &open).await.unwrap());
        assert!(host.allows(80));
    }
}
