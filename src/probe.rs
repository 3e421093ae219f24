//! Capability probe - read-only inspection of the host

use crate::host::Host;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const PACKAGE_MANAGERS: &[&str] = &["apt-get", "dnf", "yum"];
const CONTAINER_ENGINE: &str = "docker";
const PROCESS_SUPERVISOR: &str = "systemctl";
const UNKNOWN_OS: &str = "unknown";

/// A host facility a topology may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PackageManager,
    ContainerEngine,
    ProcessSupervisor,
    Firewall,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::PackageManager => "package manager",
            Capability::ContainerEngine => "container engine",
            Capability::ProcessSupervisor => "process supervisor",
            Capability::Firewall => "firewall",
        };
        f.write_str(name)
    }
}

/// What the host can do, as seen once at the start of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub os_family: String,
    pub package_manager_available: bool,
    pub container_engine_available: bool,
    pub process_supervisor_available: bool,
    pub firewall_active: bool,
    /// Which package manager binary was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    /// Whether the engine daemon answered a ping
    pub container_engine_reachable: bool,
    /// Which firewall front-end is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall: Option<String>,
}

impl HostCapabilities {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::PackageManager => self.package_manager_available,
            Capability::ContainerEngine => self.container_engine_available,
            Capability::ProcessSupervisor => self.process_supervisor_available,
            Capability::Firewall => self.firewall_active,
        }
    }

    /// Capabilities from `required` this host lacks, in the given order
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required
            .iter()
            .copied()
            .filter(|c| !self.has(*c))
            .collect()
    }

    /// Every flag set, for tests and dry runs against an idealised host
    pub fn all() -> Self {
        Self {
            os_family: "debian".to_string(),
            package_manager_available: true,
            container_engine_available: true,
            process_supervisor_available: true,
            firewall_active: true,
            package_manager: Some("apt-get".to_string()),
            container_engine_reachable: true,
            firewall: Some("ufw".to_string()),
        }
    }

    /// Nothing available
    pub fn none() -> Self {
        Self {
            os_family: UNKNOWN_OS.to_string(),
            package_manager_available: false,
            container_engine_available: false,
            process_supervisor_available: false,
            firewall_active: false,
            package_manager: None,
            container_engine_reachable: false,
            firewall: None,
        }
    }
}

/// Inspect the host. Never mutates anything and never fails: whatever cannot
/// be determined is reported as absent.
pub async fn probe(host: &dyn Host) -> HostCapabilities {
    let os_family = host
        .os_release()
        .await
        .and_then(|content| parse_os_family(&content))
        .unwrap_or_else(|| UNKNOWN_OS.to_string());

    let mut package_manager = None;
    for candidate in PACKAGE_MANAGERS {
        if host.which(candidate).await.is_some() {
            package_manager = Some(candidate.to_string());
            break;
        }
    }

    let container_engine_available = host.which(CONTAINER_ENGINE).await.is_some();
    let container_engine_reachable =
        container_engine_available && host.container_engine_reachable().await;
    let process_supervisor_available = host.which(PROCESS_SUPERVISOR).await.is_some();
    let firewall = host.active_firewall().await;

    let caps = HostCapabilities {
        os_family,
        package_manager_available: package_manager.is_some(),
        container_engine_available,
        process_supervisor_available,
        firewall_active: firewall.is_some(),
        package_manager,
        container_engine_reachable,
        firewall,
    };

    debug!(?caps, "Host capabilities probed");
    caps
}

/// Extract the distribution family from os-release content.
///
/// `ID` wins; `ID_LIKE` (first entry) is the fallback.
pub fn parse_os_family(content: &str) -> Option<String> {
    let field = |key: &str| {
        content.lines().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            if k.trim() != key {
                return None;
            }
            let v = v.trim().trim_matches('"').trim_matches('\'');
            (!v.is_empty()).then(|| v.to_lowercase())
        })
    };

    field("ID").or_else(|| {
        field("ID_LIKE").and_then(|like| like.split_whitespace().next().map(str::to_string))
    })
}
