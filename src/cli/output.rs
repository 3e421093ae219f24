//! Output formatting for multiple formats
//!
//! Everything the CLI prints to stdout goes through [`OutputFormatter`]:
//! capabilities, dry-run plans, run summaries, health states and the
//! effective configuration, as JSON, YAML or human-readable text.
//!
//! # Example
//!
//! ```ignore
//! use hostrig::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! let output = formatter.format_summary(&summary)?;
//! println!("{}", output);
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::{self, Write as _};

use crate::config::HostrigConfig;
use crate::health::HealthState;
use crate::orchestrator::DryRunPlan;
use crate::probe::HostCapabilities;
use crate::report::{RunOutcome, Summary};
use crate::steps::StepStatus;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";
const CHECK: &str = "\u{2713}";
const CROSS: &str = "\u{2717}";
const WARN: &str = "\u{26A0}";
const SKIP: &str = "\u{2013}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// JSON or YAML; human output is rendered by the callers
    fn structured<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            _ => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    pub fn format_capabilities(&self, caps: &HostCapabilities) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(capabilities_human(caps)?),
            _ => self.structured(caps, "capabilities"),
        }
    }

    pub fn format_dry_run(&self, plan: &DryRunPlan) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(dry_run_human(plan)?),
            _ => self.structured(plan, "dry-run plan"),
        }
    }

    pub fn format_summary(&self, summary: &Summary) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(summary_human(summary)?),
            _ => self.structured(summary, "run summary"),
        }
    }

    pub fn format_health(&self, url: &str, state: &HealthState) -> Result<String> {
        match self.format {
            OutputFormat::Human => {
                let mut output = String::new();
                output.push_str("Health Verification\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                writeln!(output, "URL: {}", url)?;
                health_human(&mut output, state)?;
                Ok(output)
            }
            _ => self.structured(
                &serde_json::json!({ "url": url, "health": state }),
                "health state",
            ),
        }
    }

    pub fn format_config(&self, config: &HostrigConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => {
                let mut output = String::new();
                output.push_str("hostrig Configuration\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                for (key, value) in config.to_display_map() {
                    writeln!(output, "  {:<16} {}", format!("{}:", key), value)?;
                }
                Ok(output)
            }
            _ => self.structured(&config.to_display_map(), "config"),
        }
    }
}

fn mark(present: bool) -> &'static str {
    if present {
        CHECK
    } else {
        CROSS
    }
}

fn capabilities_human(caps: &HostCapabilities) -> Result<String, fmt::Error> {
    let mut output = String::new();
    output.push_str("Host Capabilities\n");
    output.push_str(RULE);
    output.push_str("\n\n");

    writeln!(output, "OS Family: {}\n", caps.os_family)?;
    writeln!(
        output,
        "{} Package manager     {}",
        mark(caps.package_manager_available),
        caps.package_manager.as_deref().unwrap_or("(none)")
    )?;
    let engine = if !caps.container_engine_available {
        "(none)"
    } else if caps.container_engine_reachable {
        "docker (daemon reachable)"
    } else {
        "docker (daemon not responding)"
    };
    writeln!(
        output,
        "{} Container engine    {}",
        mark(caps.container_engine_available),
        engine
    )?;
    writeln!(
        output,
        "{} Process supervisor  {}",
        mark(caps.process_supervisor_available),
        if caps.process_supervisor_available {
            "systemd"
        } else {
            "(none)"
        }
    )?;
    writeln!(
        output,
        "{} Firewall            {}",
        mark(caps.firewall_active),
        caps.firewall.as_deref().unwrap_or("(inactive)")
    )?;
    Ok(output)
}

fn dry_run_human(plan: &DryRunPlan) -> Result<String, fmt::Error> {
    let mut output = String::new();
    writeln!(output, "Dry Run: {} topology", plan.topology)?;
    output.push_str(RULE);
    output.push_str("\n\n");

    output.push_str("Artifacts:\n");
    for artifact in &plan.artifacts {
        writeln!(
            output,
            "\n--- {} ({}, {:o}) ---",
            artifact.path.display(),
            artifact.kind,
            artifact.mode
        )?;
        output.push_str(&artifact.content);
        if !artifact.content.ends_with('\n') {
            output.push('\n');
        }
    }

    output.push_str("\nPlanned Steps:\n");
    for (i, step) in plan.steps.iter().enumerate() {
        let is_last = i == plan.steps.len() - 1;
        let connector = if is_last { "\u{2514}" } else { "\u{251C}" };
        write!(output, "{}\u{2500} {:<22} {}", connector, step.id, step.description)?;
        if !step.depends_on.is_empty() {
            write!(output, "  (after {})", step.depends_on.join(", "))?;
        }
        output.push('\n');
    }
    Ok(output)
}

fn status_symbol(status: &StepStatus) -> &'static str {
    match status {
        StepStatus::Success => CHECK,
        StepStatus::Skipped { .. } => SKIP,
        StepStatus::Failed { .. } => CROSS,
    }
}

fn health_human(output: &mut String, state: &HealthState) -> fmt::Result {
    let verdict = if state.healthy {
        format!("{} healthy", CHECK)
    } else if !state.checked {
        format!("{} not checked", SKIP)
    } else if state.cancelled() {
        format!("{} cancelled", WARN)
    } else {
        format!("{} unhealthy", CROSS)
    };
    writeln!(
        output,
        "Health: {} after {} failed probe(s) in {}ms",
        verdict, state.attempts, state.elapsed_ms
    )?;
    if let Some(error) = &state.last_error {
        if !state.healthy {
            writeln!(output, "  Last error: {}", error)?;
        }
    }
    Ok(())
}

fn summary_human(summary: &Summary) -> Result<String, fmt::Error> {
    let mut output = String::new();
    let headline = match summary.outcome {
        RunOutcome::Success => format!("{} Provisioning succeeded", CHECK),
        RunOutcome::PartialFailure => format!("{} Provisioning partially failed", CROSS),
        RunOutcome::Unhealthy => format!("{} Service is not healthy", WARN),
    };
    writeln!(output, "{} ({} topology)", headline, summary.topology)?;
    output.push_str(RULE);
    output.push_str("\n\n");

    writeln!(output, "Run: {}", summary.run_id)?;
    writeln!(
        output,
        "Started:  {}\nFinished: {}\n",
        summary.started_at.to_rfc3339(),
        summary.finished_at.to_rfc3339()
    )?;

    output.push_str("Steps:\n");
    for step in &summary.steps {
        write!(
            output,
            "  {} {:<22} {}",
            status_symbol(&step.status),
            step.step_id,
            step.status
        )?;
        if step.attempts > 1 {
            write!(output, " after {} attempts", step.attempts)?;
        }
        writeln!(output, " ({}ms)", step.duration_ms)?;
        if let StepStatus::Failed { reason, .. } = &step.status {
            writeln!(output, "      {}", reason)?;
        }
    }
    output.push('\n');

    health_human(&mut output, &summary.health)?;

    if !summary.access_urls.is_empty() {
        output.push_str("\nAccess URLs:\n");
        for url in &summary.access_urls {
            writeln!(output, "  {}", url)?;
        }
    }

    let warnings = summary.warnings();
    if !warnings.is_empty() {
        writeln!(output, "\n{} Warnings:", WARN)?;
        for warning in &warnings {
            writeln!(output, "  - {}", warning)?;
        }
    }

    Ok(output)
}
