//! Configuration artifacts rendered from a descriptor
//!
//! Rendering is pure: equal descriptors produce byte-identical artifacts.
//! Every map that reaches the output is ordered.

mod compose;
mod nginx;
mod systemd;

pub use compose::render_compose;
pub use nginx::render_proxy_route;
pub use systemd::render_unit;

use crate::descriptor::DeploymentDescriptor;
use crate::host::ServiceRef;
use crate::strategy::strategy_for;
use crate::topology::Topology;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

pub const UNIT_DIR: &str = "/etc/systemd/system";
pub const PROXY_CONF_DIR: &str = "/etc/nginx/conf.d";
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub const PROXY_SERVICE: &str = "nginx";
pub const ENGINE_SERVICE: &str = "docker";

const DEFAULT_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ServiceUnit,
    ProxyRoute,
    ComposeStack,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::ServiceUnit => f.write_str("service unit"),
            ArtifactKind::ProxyRoute => f.write_str("proxy route"),
            ArtifactKind::ComposeStack => f.write_str("compose stack"),
        }
    }
}

/// A generated file plus the services that must pick up changes to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub content: String,
    pub mode: u32,
    pub reloads: Vec<ServiceRef>,
}

impl Artifact {
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.content.as_bytes()))
    }

    /// Whether `current` already matches this artifact byte for byte
    pub fn matches(&self, current: Option<&[u8]>) -> bool {
        current == Some(self.content.as_bytes())
    }
}

/// The supervisor unit for the application process
pub fn app_service(descriptor: &DeploymentDescriptor) -> ServiceRef {
    ServiceRef::unit(&descriptor.name)
}

pub fn proxy_service() -> ServiceRef {
    ServiceRef::unit(PROXY_SERVICE)
}

pub fn engine_service() -> ServiceRef {
    ServiceRef::unit(ENGINE_SERVICE)
}

pub fn compose_path(descriptor: &DeploymentDescriptor) -> PathBuf {
    descriptor.working_directory.join(COMPOSE_FILE_NAME)
}

pub fn stack_service(descriptor: &DeploymentDescriptor) -> ServiceRef {
    ServiceRef::stack(&descriptor.name, compose_path(descriptor))
}

pub fn unit_path(descriptor: &DeploymentDescriptor) -> PathBuf {
    Path::new(UNIT_DIR).join(format!("{}.service", descriptor.name))
}

pub fn proxy_route_path(descriptor: &DeploymentDescriptor) -> PathBuf {
    Path::new(PROXY_CONF_DIR).join(format!("{}.conf", descriptor.name))
}

pub fn service_unit_artifact(descriptor: &DeploymentDescriptor) -> Artifact {
    Artifact {
        name: format!("{}.service", descriptor.name),
        kind: ArtifactKind::ServiceUnit,
        path: unit_path(descriptor),
        content: render_unit(descriptor),
        mode: DEFAULT_MODE,
        reloads: vec![app_service(descriptor)],
    }
}

pub fn proxy_route_artifact(descriptor: &DeploymentDescriptor) -> Artifact {
    Artifact {
        name: format!("{}.conf", descriptor.name),
        kind: ArtifactKind::ProxyRoute,
        path: proxy_route_path(descriptor),
        content: render_proxy_route(descriptor),
        mode: DEFAULT_MODE,
        reloads: vec![proxy_service()],
    }
}

pub fn compose_artifact(descriptor: &DeploymentDescriptor) -> Result<Artifact> {
    Ok(Artifact {
        name: COMPOSE_FILE_NAME.to_string(),
        kind: ArtifactKind::ComposeStack,
        path: compose_path(descriptor),
        content: render_compose(descriptor)?,
        mode: DEFAULT_MODE,
        reloads: vec![stack_service(descriptor)],
    })
}

/// Combined digest of every artifact `service` must pick up, in artifact
/// order. `None` when no artifact configures the service.
pub fn config_fingerprint(artifacts: &[Artifact], service: &ServiceRef) -> Option<String> {
    let mut hasher = Sha256::new();
    let mut any = false;
    for artifact in artifacts.iter().filter(|a| a.reloads.contains(service)) {
        hasher.update(artifact.path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(artifact.digest().as_bytes());
        hasher.update([b'\n']);
        any = true;
    }
    any.then(|| hex::encode(hasher.finalize()))
}

/// Render every artifact the topology needs, in a fixed order
pub fn generate(descriptor: &DeploymentDescriptor, topology: Topology) -> Result<Vec<Artifact>> {
    strategy_for(topology).artifacts(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeploymentDescriptor {
        let mut d = DeploymentDescriptor::new(5000, "/srv/webapp");
        d.public_host_names = vec!["example.com".to_string(), "www.example.com".to_string()];
        d.command = vec!["/srv/webapp/venv/bin/gunicorn".to_string(), "app:app".to_string()];
        d.environment.insert("MODE".to_string(), "live".to_string());
        d.environment.insert("API_KEY".to_string(), "abc".to_string());
        d
    }

    #[test]
    fn test_native_artifacts() {
        let artifacts = generate(&descriptor(), Topology::Native).unwrap();
        assert_eq!(artifacts.len(), 2);

        assert_eq!(artifacts[0].kind, ArtifactKind::ServiceUnit);
        assert_eq!(
            artifacts[0].path,
            PathBuf::from("/etc/systemd/system/webapp.service")
        );
        assert_eq!(artifacts[0].reloads, vec![ServiceRef::unit("webapp")]);

        assert_eq!(artifacts[1].kind, ArtifactKind::ProxyRoute);
        assert_eq!(artifacts[1].path, PathBuf::from("/etc/nginx/conf.d/webapp.conf"));
        assert_eq!(artifacts[1].reloads, vec![ServiceRef::unit("nginx")]);
    }

    #[test]
    fn test_containerized_artifacts() {
        let artifacts = generate(&descriptor(), Topology::Containerized).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, PathBuf::from("/srv/webapp/docker-compose.yml"));
        assert_eq!(
            artifacts[0].reloads,
            vec![ServiceRef::stack("webapp", "/srv/webapp/docker-compose.yml")]
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        for topology in [Topology::Native, Topology::Containerized] {
            let first = generate(&descriptor(), topology).unwrap();
            let second = generate(&descriptor(), topology).unwrap();
            assert_eq!(first, second);
            let digests: Vec<_> = first.iter().map(Artifact::digest).collect();
            let again: Vec<_> = second.iter().map(Artifact::digest).collect();
            assert_eq!(digests, again);
        }
    }

    #[test]
    fn test_environment_insertion_order_does_not_matter() {
        let a = descriptor();
        let mut b = DeploymentDescriptor::new(5000, "/srv/webapp");
        b.public_host_names = a.public_host_names.clone();
        b.command = a.command.clone();
        b.environment.insert("API_KEY".to_string(), "abc".to_string());
        b.environment.insert("MODE".to_string(), "live".to_string());
        assert_eq!(
            generate(&a, Topology::Native).unwrap(),
            generate(&b, Topology::Native).unwrap()
        );
    }

    #[test]
    fn test_config_fingerprint_follows_content() {
        let d = descriptor();
        let artifacts = generate(&d, Topology::Native).unwrap();
        let app = app_service(&d);
        let nginx = proxy_service();

        let app_fp = config_fingerprint(&artifacts, &app).unwrap();
        let nginx_fp = config_fingerprint(&artifacts, &nginx).unwrap();
        assert_eq!(app_fp.len(), 64);
        assert_ne!(app_fp, nginx_fp);
        assert_eq!(config_fingerprint(&artifacts, &engine_service()), None);

        let mut changed = d.clone();
        changed.environment.insert("MODE".to_string(), "test".to_string());
        let changed = generate(&changed, Topology::Native).unwrap();
        assert_ne!(config_fingerprint(&changed, &app).unwrap(), app_fp);
        assert_eq!(config_fingerprint(&changed, &nginx).unwrap(), nginx_fp);
    }

    #[test]
    fn test_digest_and_matches() {
        let artifacts = generate(&descriptor(), Topology::Native).unwrap();
        let artifact = &artifacts[0];
        assert_eq!(artifact.digest().len(), 64);
        assert!(artifact.matches(Some(artifact.content.as_bytes())));
        assert!(!artifact.matches(Some(b"stale".as_slice())));
        assert!(!artifact.matches(None));
    }
}
