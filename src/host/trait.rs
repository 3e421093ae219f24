//! Host trait definition

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A service the host supervises: either a supervisor unit or a compose stack
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceRef {
    Unit { name: String },
    Stack { project: String, file: PathBuf },
}

impl ServiceRef {
    pub fn unit(name: impl Into<String>) -> Self {
        ServiceRef::Unit { name: name.into() }
    }

    pub fn stack(project: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        ServiceRef::Stack {
            project: project.into(),
            file: file.into(),
        }
    }

    /// Short identifier used in step ids
    pub fn slug(&self) -> &str {
        match self {
            ServiceRef::Unit { name } => name,
            ServiceRef::Stack { project, .. } => project,
        }
    }

    /// File name for per-service host state, distinct across kinds
    pub fn state_key(&self) -> String {
        match self {
            ServiceRef::Unit { name } => format!("unit-{}", name),
            ServiceRef::Stack { project, .. } => format!("stack-{}", project),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRef::Unit { name } => write!(f, "unit {}", name),
            ServiceRef::Stack { project, file } => {
                write!(f, "stack {} ({})", project, file.display())
            }
        }
    }
}

/// Abstraction over the operating-system facilities the orchestrator drives.
///
/// Query methods never mutate host state. Mutating methods are expected to be
/// called only after the matching query said the change is needed.
#[async_trait]
pub trait Host: Send + Sync {
    /// Contents of the release-identification file, if readable
    async fn os_release(&self) -> Option<String>;

    /// Resolve an executable on the search path
    async fn which(&self, program: &str) -> Option<PathBuf>;

    /// Name of the firewall front-end that is currently active, if any
    async fn active_firewall(&self) -> Option<String>;

    /// Whether the container engine daemon answers
    async fn container_engine_reachable(&self) -> bool;

    async fn package_installed(&self, package: &str) -> Result<bool>;

    async fn install_packages(&self, packages: &[String]) -> Result<()>;

    /// Current file contents, `None` when the file does not exist
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write a file, creating parent directories
    async fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> Result<()>;

    async fn service_enabled(&self, service: &ServiceRef) -> Result<bool>;

    async fn enable_service(&self, service: &ServiceRef) -> Result<()>;

    async fn service_active(&self, service: &ServiceRef) -> Result<bool>;

    async fn start_service(&self, service: &ServiceRef) -> Result<()>;

    /// Pick up changed configuration of a running service
    async fn reload_service(&self, service: &ServiceRef) -> Result<()>;

    /// Fingerprint of the configuration the service last started or reloaded
    /// with, as recorded on this host. `None` if nothing was recorded.
    async fn applied_config(&self, service: &ServiceRef) -> Result<Option<String>>;

    /// Persist the fingerprint of the configuration the service now runs with
    async fn record_applied_config(&self, service: &ServiceRef, fingerprint: &str) -> Result<()>;

    async fn firewall_allows(&self, port: u16) -> Result<bool>;

    async fn allow_firewall_port(&self, port: u16) -> Result<()>;
}
