//! Subcommand handlers. Each returns the process exit code.

use super::commands::{ConfigArgs, ProbeArgs, ProvisionArgs, VerifyArgs};
use super::output::OutputFormatter;
use crate::config::{ConfigError, HostrigConfig};
use crate::error::ProvisionError;
use crate::health::{HealthProbe, HealthTarget, HealthVerifier, HttpHealthProbe};
use crate::host::{Host, SystemHost};
use crate::orchestrator::{Orchestrator, RunSettings};
use crate::probe;
use crate::progress::LoggingHandler;
use crate::report::{
    EXIT_PREFLIGHT, EXIT_SUCCESS, EXIT_UNHEALTHY, EXIT_UNSUPPORTED_TOPOLOGY, EXIT_USAGE,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// Exit code for an error raised before the host was touched
pub fn preflight_exit_code(err: &ProvisionError) -> i32 {
    match err {
        ProvisionError::UnsupportedTopology { .. } => EXIT_UNSUPPORTED_TOPOLOGY,
        _ => EXIT_PREFLIGHT,
    }
}

fn print(rendered: Result<String>) -> bool {
    match rendered {
        Ok(output) => {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            true
        }
        Err(e) => {
            error!("Failed to format output: {:#}", e);
            eprintln!("Error: {:#}", e);
            false
        }
    }
}

fn provision_config(args: &ProvisionArgs) -> Result<HostrigConfig, ConfigError> {
    let mut config = HostrigConfig::from_env()?;
    if let Some(timeout) = args.health_timeout {
        config.health_timeout_secs = timeout;
    }
    if let Some(interval) = args.health_interval {
        config.health_interval_secs = interval;
    }
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel = max_parallel;
    }
    if let Some(dir) = &args.lock_dir {
        config.lock_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

pub async fn handle_provision(args: &ProvisionArgs, cancel: watch::Receiver<bool>) -> i32 {
    let config = match provision_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    debug!("{}", config);

    let descriptor = match args.to_descriptor() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let probe: Arc<dyn HealthProbe> = match HttpHealthProbe::new() {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_PREFLIGHT;
        }
    };
    let host: Arc<dyn Host> = Arc::new(SystemHost::new());
    let orchestrator = Orchestrator::new(host, probe, RunSettings::from(&config))
        .with_progress(Arc::new(LoggingHandler));
    let formatter = OutputFormatter::new(args.format.into());
    let intent = descriptor.topology;

    if args.dry_run {
        return match orchestrator.dry_run(&descriptor, intent).await {
            Ok(plan) => {
                if print(formatter.format_dry_run(&plan)) {
                    EXIT_SUCCESS
                } else {
                    EXIT_USAGE
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                preflight_exit_code(&e)
            }
        };
    }

    match orchestrator.provision(&descriptor, intent, cancel).await {
        Ok(summary) => {
            print(formatter.format_summary(&summary));
            summary.exit_code()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            preflight_exit_code(&e)
        }
    }
}

pub async fn handle_probe(args: &ProbeArgs) -> i32 {
    let host = SystemHost::new();
    let caps = probe::probe(&host).await;
    let formatter = OutputFormatter::new(args.format.into());
    if print(formatter.format_capabilities(&caps)) {
        EXIT_SUCCESS
    } else {
        EXIT_USAGE
    }
}

fn verify_config(args: &VerifyArgs) -> Result<HostrigConfig, ConfigError> {
    let mut config = HostrigConfig::from_env()?;
    if let Some(timeout) = args.timeout {
        config.health_timeout_secs = timeout;
    }
    if let Some(interval) = args.interval {
        config.health_interval_secs = interval;
    }
    config.validate()?;
    Ok(config)
}

pub async fn handle_verify(args: &VerifyArgs, cancel: watch::Receiver<bool>) -> i32 {
    let config = match verify_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };

    let probe = match HttpHealthProbe::new() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_PREFLIGHT;
        }
    };
    let mut target = HealthTarget::new(args.url.clone());
    if let Some(host) = &args.host_header {
        target = target.with_host_header(host.clone());
    }

    let state = HealthVerifier::new(Arc::new(probe))
        .with_progress(Arc::new(LoggingHandler))
        .verify(&target, config.health_policy(), cancel)
        .await;

    let formatter = OutputFormatter::new(args.format.into());
    print(formatter.format_health(&target.url, &state));
    if state.healthy {
        EXIT_SUCCESS
    } else {
        EXIT_UNHEALTHY
    }
}

pub fn handle_config(args: &ConfigArgs) -> i32 {
    let config = match HostrigConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let formatter = OutputFormatter::new(args.format.into());
    if !print(formatter.format_config(&config)) {
        return EXIT_USAGE;
    }
    match config.validate() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    }
}
