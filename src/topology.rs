//! Topology selection

use crate::error::ProvisionError;
use crate::probe::{Capability, HostCapabilities};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

const NATIVE_REQUIRES: &[Capability] = &[Capability::PackageManager, Capability::ProcessSupervisor];
const CONTAINERIZED_REQUIRES: &[Capability] = &[Capability::ContainerEngine];

/// Operator intent as given on the command line or in the descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyIntent {
    Native,
    Containerized,
    #[default]
    Auto,
}

impl fmt::Display for TopologyIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyIntent::Native => f.write_str("native"),
            TopologyIntent::Containerized => f.write_str("containerized"),
            TopologyIntent::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for TopologyIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(TopologyIntent::Native),
            "containerized" | "container" | "docker" => Ok(TopologyIntent::Containerized),
            "auto" => Ok(TopologyIntent::Auto),
            other => Err(format!(
                "Invalid topology: {}. Valid options: native, containerized, auto",
                other
            )),
        }
    }
}

/// The shape the deployed service takes on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Supervised process behind a reverse proxy
    Native,
    /// Compose-managed container stack
    Containerized,
}

impl Topology {
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            Topology::Native => NATIVE_REQUIRES,
            Topology::Containerized => CONTAINERIZED_REQUIRES,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Native => f.write_str("native"),
            Topology::Containerized => f.write_str("containerized"),
        }
    }
}

/// Pick a topology for `intent` on a host with `caps`.
///
/// Explicit intents are checked against their required capabilities. `Auto`
/// prefers the container stack when an engine is present, then falls back to
/// the native path.
pub fn select(intent: TopologyIntent, caps: &HostCapabilities) -> Result<Topology, ProvisionError> {
    let check = |topology: Topology| {
        let missing = caps.missing(topology.required_capabilities());
        if missing.is_empty() {
            Ok(topology)
        } else {
            Err(ProvisionError::UnsupportedTopology { intent, missing })
        }
    };

    let selected = match intent {
        TopologyIntent::Native => check(Topology::Native)?,
        TopologyIntent::Containerized => check(Topology::Containerized)?,
        TopologyIntent::Auto => {
            if caps.container_engine_available {
                Topology::Containerized
            } else {
                check(Topology::Native).map_err(|_| {
                    let mut missing = caps.missing(NATIVE_REQUIRES);
                    missing.push(Capability::ContainerEngine);
                    ProvisionError::UnsupportedTopology { intent, missing }
                })?
            }
        }
    };

    info!(intent = %intent, topology = %selected, "Topology selected");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn caps(pkg: bool, engine: bool, supervisor: bool) -> HostCapabilities {
        HostCapabilities {
            package_manager_available: pkg,
            container_engine_available: engine,
            process_supervisor_available: supervisor,
            ..HostCapabilities::all()
        }
    }

    #[parameterized(
        native_on_full_host = { TopologyIntent::Native, true, true, true, Topology::Native },
        containerized_on_full_host = { TopologyIntent::Containerized, true, true, true, Topology::Containerized },
        containerized_without_pkg = { TopologyIntent::Containerized, false, true, false, Topology::Containerized },
        auto_prefers_containers = { TopologyIntent::Auto, true, true, true, Topology::Containerized },
        auto_falls_back_to_native = { TopologyIntent::Auto, true, false, true, Topology::Native },
    )]
    fn test_select_ok(intent: TopologyIntent, pkg: bool, engine: bool, sup: bool, expected: Topology) {
        assert_eq!(select(intent, &caps(pkg, engine, sup)).unwrap(), expected);
    }

    #[test]
    fn test_native_without_package_manager_lists_exactly_that() {
        let err = select(TopologyIntent::Native, &caps(false, true, true)).unwrap_err();
        match err {
            ProvisionError::UnsupportedTopology { intent, missing } => {
                assert_eq!(intent, TopologyIntent::Native);
                assert_eq!(missing, vec![Capability::PackageManager]);
            }
            other => panic!("Expected UnsupportedTopology, got {:?}", other),
        }
    }

    #[test]
    fn test_containerized_without_engine() {
        let err = select(TopologyIntent::Containerized, &caps(true, false, true)).unwrap_err();
        assert_eq!(err.missing_capabilities(), &[Capability::ContainerEngine]);
    }

    #[test]
    fn test_auto_with_nothing_fails() {
        let err = select(TopologyIntent::Auto, &HostCapabilities::none()).unwrap_err();
        assert_eq!(
            err.missing_capabilities(),
            &[
                Capability::PackageManager,
                Capability::ProcessSupervisor,
                Capability::ContainerEngine
            ]
        );
    }

    #[test]
    fn test_intent_from_str() {
        assert_eq!("Native".parse::<TopologyIntent>().unwrap(), TopologyIntent::Native);
        assert_eq!(
            "docker".parse::<TopologyIntent>().unwrap(),
            TopologyIntent::Containerized
        );
        assert!("kubernetes".parse::<TopologyIntent>().is_err());
    }
}
