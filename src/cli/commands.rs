use crate::descriptor::DeploymentDescriptor;
use crate::topology::TopologyIntent;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Provision a single host and bring a web service up behind it
#[derive(Parser, Debug)]
#[command(
    name = "hostrig",
    about = "Provision a single host and verify the web service running on it",
    version,
    author,
    long_about = "hostrig probes the host, picks a native (systemd + nginx) or containerized \
                  (docker compose) topology, writes the configuration, installs and starts \
                  what is missing, and polls the service until it reports healthy."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Provision the host and start the service",
        long_about = "Probes the host, selects a topology, renders the configuration and applies \
                      the provisioning steps, then verifies the health endpoint.\n\n\
                      Examples:\n  \
                      hostrig provision --descriptor webapp.toml\n  \
                      hostrig provision --port 5000 --workdir /srv/webapp --host example.com \\\n      \
                      -- /srv/webapp/venv/bin/gunicorn --bind 127.0.0.1:5000 app:app\n  \
                      hostrig provision --descriptor webapp.yaml --dry-run --format json"
    )]
    Provision(ProvisionArgs),

    #[command(
        about = "Show what this host can do",
        long_about = "Reports the package manager, container engine, process supervisor and \
                      firewall found on this host. Nothing is modified.\n\n\
                      Examples:\n  \
                      hostrig probe\n  \
                      hostrig probe --format json"
    )]
    Probe(ProbeArgs),

    #[command(
        about = "Poll an already deployed service until it is healthy",
        long_about = "Runs only the health verification against a URL.\n\n\
                      Examples:\n  \
                      hostrig verify --url http://127.0.0.1/health --host-header example.com"
    )]
    Verify(VerifyArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ProvisionArgs {
    #[arg(
        short = 'd',
        long,
        value_name = "FILE",
        help = "Deployment descriptor (TOML, YAML or JSON)"
    )]
    pub descriptor: Option<PathBuf>,

    #[arg(
        short = 't',
        long,
        value_parser = parse_topology,
        help = "Topology: native, containerized or auto"
    )]
    pub topology: Option<TopologyIntent>,

    #[arg(short = 'p', long, value_name = "PORT", help = "Application port")]
    pub port: Option<u16>,

    #[arg(long, value_name = "PORT", help = "Port the reverse proxy listens on")]
    pub public_port: Option<u16>,

    #[arg(short = 'w', long, value_name = "DIR", help = "Working directory of the service")]
    pub workdir: Option<PathBuf>,

    #[arg(long = "host", value_name = "NAME", help = "Public host name (repeatable)")]
    pub hosts: Vec<String>,

    #[arg(long, value_name = "PATH", help = "Health endpoint path")]
    pub health_path: Option<String>,

    #[arg(long = "package", value_name = "PKG", help = "Extra OS package (repeatable)")]
    pub packages: Vec<String>,

    #[arg(
        last = true,
        value_name = "CMD",
        help = "Service process and its arguments, after --"
    )]
    pub command: Vec<String>,

    #[arg(short = 'n', long, value_name = "NAME", help = "Service name")]
    pub name: Option<String>,

    #[arg(
        short = 'e',
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_env_pair,
        help = "Service environment variable (repeatable)"
    )]
    pub env: Vec<(String, String)>,

    #[arg(long, help = "Print artifacts and planned steps without touching the host")]
    pub dry_run: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(long, value_name = "SECONDS", help = "Give up on health after this long")]
    pub health_timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS", help = "Seconds between health probes")]
    pub health_interval: Option<u64>,

    #[arg(long, value_name = "N", help = "Run up to N independent steps at once")]
    pub max_parallel: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Directory for cross-process lock files")]
    pub lock_dir: Option<PathBuf>,
}

impl ProvisionArgs {
    /// Load the descriptor file, if any, and apply flag overrides on top.
    pub fn to_descriptor(&self) -> Result<DeploymentDescriptor> {
        let mut descriptor = match &self.descriptor {
            Some(path) => DeploymentDescriptor::from_file(path)?,
            None => {
                let Some(port) = self.port else {
                    bail!("--port is required without --descriptor");
                };
                let Some(workdir) = &self.workdir else {
                    bail!("--workdir is required without --descriptor");
                };
                DeploymentDescriptor::new(port, workdir.clone())
            }
        };

        if let Some(port) = self.port {
            descriptor.bind_port = port;
        }
        if let Some(port) = self.public_port {
            descriptor.public_port = port;
        }
        if let Some(workdir) = &self.workdir {
            descriptor.working_directory = workdir.clone();
        }
        if !self.hosts.is_empty() {
            descriptor.public_host_names = self.hosts.clone();
        }
        if let Some(path) = &self.health_path {
            descriptor.health_path = path.clone();
        }
        descriptor.packages.extend(self.packages.iter().cloned());
        if !self.command.is_empty() {
            if self.command[0].trim().is_empty() {
                bail!("Service command must start with a program");
            }
            descriptor.command = self.command.clone();
        }
        if let Some(name) = &self.name {
            descriptor.name = name.clone();
        }
        for (key, value) in &self.env {
            descriptor.environment.insert(key.clone(), value.clone());
        }
        if let Some(topology) = self.topology {
            descriptor.topology = topology;
        }

        Ok(descriptor)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(short = 'u', long, value_name = "URL", help = "Health endpoint URL")]
    pub url: String,

    #[arg(long, value_name = "HOST", help = "Host header sent with each probe")]
    pub host_header: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Give up after this long")]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS", help = "Seconds between probes")]
    pub interval: Option<u64>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_topology(s: &str) -> Result<TopologyIntent, String> {
    s.parse()
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid environment entry '{}': expected KEY=VALUE", s))?;
    Ok((key.to_string(), value.to_string()))
}
