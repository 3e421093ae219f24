use crate::descriptor::DeploymentDescriptor;
use crate::topology::Topology;
use anyhow::Result;
use regex::Regex;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, descriptor: &DeploymentDescriptor, topology: Topology) -> Result<()>;
}

pub struct NameRule;

impl ValidationRule for NameRule {
    fn name(&self) -> &'static str {
        "Name"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, _topology: Topology) -> Result<()> {
        // Used verbatim as a unit name, a config file stem and a compose project
        let name_re = Regex::new(r"^[a-z0-9][a-z0-9_-]{0,62}$").expect("valid regex");
        if !name_re.is_match(&descriptor.name) {
            anyhow::bail!(
                "Service name '{}' must be lowercase alphanumeric with '-' or '_'",
                descriptor.name
            );
        }
        Ok(())
    }
}

pub struct PortsRule;

impl ValidationRule for PortsRule {
    fn name(&self) -> &'static str {
        "Ports"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, _topology: Topology) -> Result<()> {
        if descriptor.bind_port == 0 {
            anyhow::bail!("Bind port cannot be 0");
        }
        if descriptor.public_port == 0 {
            anyhow::bail!("Public port cannot be 0");
        }
        if descriptor.bind_port == descriptor.public_port {
            anyhow::bail!(
                "Bind port and public port must differ, both are {}",
                descriptor.bind_port
            );
        }
        Ok(())
    }
}

pub struct HostNamesRule;

impl ValidationRule for HostNamesRule {
    fn name(&self) -> &'static str {
        "HostNames"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, topology: Topology) -> Result<()> {
        if topology == Topology::Native && descriptor.public_host_names.is_empty() {
            anyhow::bail!("At least one public host name is required for the reverse proxy");
        }

        let host_re = Regex::new(
            r"^(\*\.)?[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
        )
        .expect("valid regex");
        for (i, host) in descriptor.public_host_names.iter().enumerate() {
            if !host_re.is_match(host) {
                anyhow::bail!("Public host name[{}] '{}' is not a valid host name", i, host);
            }
        }
        Ok(())
    }
}

/// Characters that would end or break an nginx `location` directive
const LOCATION_DELIMITERS: &[char] = &[';', '{', '}', '"', '\''];

pub struct HealthPathRule;

impl ValidationRule for HealthPathRule {
    fn name(&self) -> &'static str {
        "HealthPath"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, _topology: Topology) -> Result<()> {
        if !descriptor.health_path.starts_with('/') {
            anyhow::bail!(
                "Health path must start with '/', got '{}'",
                descriptor.health_path
            );
        }
        if descriptor.health_path.chars().any(char::is_whitespace) {
            anyhow::bail!("Health path cannot contain whitespace");
        }
        if let Some(c) = descriptor.health_path.chars().find(|c| LOCATION_DELIMITERS.contains(c)) {
            anyhow::bail!("Health path cannot contain '{}'", c);
        }
        for (i, path) in descriptor.smoke_paths.iter().enumerate() {
            if !path.starts_with('/') {
                anyhow::bail!("Smoke path[{}] must start with '/', got '{}'", i, path);
            }
        }
        Ok(())
    }
}

pub struct WorkingDirectoryRule;

impl ValidationRule for WorkingDirectoryRule {
    fn name(&self) -> &'static str {
        "WorkingDirectory"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, _topology: Topology) -> Result<()> {
        if !descriptor.working_directory.is_absolute() {
            anyhow::bail!(
                "Working directory must be absolute, got '{}'",
                descriptor.working_directory.display()
            );
        }
        for (i, file) in descriptor.required_files.iter().enumerate() {
            if file.is_absolute() {
                anyhow::bail!(
                    "Required file[{}] '{}' must be relative to the working directory",
                    i,
                    file.display()
                );
            }
        }
        Ok(())
    }
}

pub struct CommandRule;

impl ValidationRule for CommandRule {
    fn name(&self) -> &'static str {
        "Command"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, topology: Topology) -> Result<()> {
        if topology == Topology::Native {
            match descriptor.command.first() {
                None => anyhow::bail!("A command is required for the native topology"),
                Some(program) if program.trim().is_empty() => {
                    anyhow::bail!("Command program cannot be empty")
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub struct EnvironmentRule;

impl ValidationRule for EnvironmentRule {
    fn name(&self) -> &'static str {
        "Environment"
    }

    fn validate(&self, descriptor: &DeploymentDescriptor, _topology: Topology) -> Result<()> {
        let key_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex");
        for (key, value) in &descriptor.environment {
            if !key_re.is_match(key) {
                anyhow::bail!("Environment variable name '{}' is invalid", key);
            }
            if value.contains('\n') {
                anyhow::bail!("Environment variable '{}' cannot contain a newline", key);
            }
        }
        Ok(())
    }
}
