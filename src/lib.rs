//! hostrig - single-host provisioning and service lifecycle
//!
//! Given a small deployment descriptor, hostrig inspects the host, chooses
//! between a native deployment (systemd unit behind an nginx route) and a
//! containerized one (docker compose stack), renders the configuration,
//! applies an idempotent, dependency-ordered set of provisioning steps and
//! polls the service until it reports healthy.
//!
//! # Example Usage
//!
//! ```ignore
//! use hostrig::{DeploymentDescriptor, HttpHealthProbe, Orchestrator, RunSettings, SystemHost};
//! use hostrig::topology::TopologyIntent;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! async fn deploy() -> anyhow::Result<()> {
//!     let mut descriptor = DeploymentDescriptor::new(5000, "/srv/webapp");
//!     descriptor.public_host_names = vec!["example.com".to_string()];
//!     descriptor.command = vec!["/srv/webapp/venv/bin/gunicorn".into(), "app:app".into()];
//!
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(SystemHost::new()),
//!         Arc::new(HttpHealthProbe::new()?),
//!         RunSettings::default(),
//!     );
//!     let (_tx, cancel) = watch::channel(false);
//!     let summary = orchestrator
//!         .provision(&descriptor, TopologyIntent::Auto, cancel)
//!         .await?;
//!     println!("{}", summary.outcome);
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`host`]: the seam to the operating system, with a real and a mock implementation
//! - [`probe`] and [`topology`]: what the host can do and which shape to deploy
//! - [`artifacts`] and [`strategy`]: rendered configuration and the step plan per topology
//! - [`steps`]: DAG execution with retries, locks and idempotence checks
//! - [`health`]: bounded, cancellable health polling
//! - [`orchestrator`] and [`report`]: the end-to-end run and its summary

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod host;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod report;
pub mod steps;
pub mod strategy;
pub mod topology;
pub mod util;
pub mod validation;

pub use config::{ConfigError, HostrigConfig};
pub use descriptor::DeploymentDescriptor;
pub use error::ProvisionError;
pub use health::{HealthProbe, HealthState, HealthTarget, HttpHealthProbe};
pub use host::{Host, MockHost, SystemHost};
pub use orchestrator::{DryRunPlan, Orchestrator, RunSettings};
pub use probe::HostCapabilities;
pub use report::{RunOutcome, Summary};
pub use topology::{Topology, TopologyIntent};
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
