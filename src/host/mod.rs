//! Host abstraction for testable provisioning
//!
//! Everything the orchestrator does to a machine goes through the [`Host`]
//! trait. [`SystemHost`] drives the real tools (package manager, systemd,
//! docker compose, ufw/firewalld); [`MockHost`] keeps the same state in memory.

pub mod docker;
mod mock;
mod real;
mod r#trait;

pub use mock::{MockHost, MockOperation};
pub use r#trait::{Host, ServiceRef};
pub use real::SystemHost;
