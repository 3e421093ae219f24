//! Deployment descriptor - the small typed input the whole run derives from

use crate::error::ProvisionError;
use crate::topology::TopologyIntent;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_NAME: &str = "webapp";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_PUBLIC_PORT: u16 = 80;

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

fn default_public_port() -> u16 {
    DEFAULT_PUBLIC_PORT
}

/// Everything needed to render artifacts and plan steps for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    /// Unit, site and compose project name
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub topology: TopologyIntent,
    /// Application port on the loopback interface
    pub bind_port: u16,
    /// Port the reverse proxy listens on
    #[serde(default = "default_public_port")]
    pub public_port: u16,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub public_host_names: Vec<String>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub packages: BTreeSet<String>,
    /// Process command line for the supervised service
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Container image; the stack builds from the working directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Files that must exist under the working directory before anything runs
    #[serde(default)]
    pub required_files: Vec<PathBuf>,
    /// Paths fetched once after the service reports healthy
    #[serde(default)]
    pub smoke_paths: Vec<String>,
}

impl DeploymentDescriptor {
    pub fn new(bind_port: u16, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: default_name(),
            topology: TopologyIntent::Auto,
            bind_port,
            public_port: DEFAULT_PUBLIC_PORT,
            working_directory: working_directory.into(),
            public_host_names: Vec::new(),
            health_path: default_health_path(),
            packages: BTreeSet::new(),
            command: Vec::new(),
            environment: BTreeMap::new(),
            image: None,
            user: None,
            required_files: Vec::new(),
            smoke_paths: Vec::new(),
        }
    }

    /// Load a descriptor from a TOML or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML descriptor {}", path.display())),
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON descriptor {}", path.display())),
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML descriptor {}", path.display())),
        }
    }

    /// Environment handed to the service: the descriptor's own map plus `PORT`
    pub fn service_environment(&self) -> BTreeMap<String, String> {
        let mut env = self.environment.clone();
        env.insert("PORT".to_string(), self.bind_port.to_string());
        env
    }

    /// Prerequisite files that are not present on disk
    pub fn missing_required_files(&self) -> Vec<PathBuf> {
        self.required_files
            .iter()
            .map(|f| self.working_directory.join(f))
            .filter(|p| !p.exists())
            .collect()
    }

    /// Fail before touching the host when the working directory or any
    /// prerequisite file is absent
    pub fn check_prerequisites(&self) -> Result<(), ProvisionError> {
        if !self.working_directory.is_dir() {
            return Err(ProvisionError::CapabilityMissing(format!(
                "working directory {} does not exist",
                self.working_directory.display()
            )));
        }
        let missing = self.missing_required_files();
        if !missing.is_empty() {
            return Err(ProvisionError::CapabilityMissing(format!(
                "required files not found: {}",
                missing
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_toml_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        fs::write(
            &path,
            r#"
bind_port = 5000
working_directory = "/srv/webapp"
public_host_names = ["example.com", "www.example.com"]
command = ["/srv/webapp/venv/bin/gunicorn", "app:app", "--bind", "127.0.0.1:5000"]
packages = ["python3-venv"]

[environment]
PYTHON_VERSION = "3.9.0"
"#,
        )
        .unwrap();

        let d = DeploymentDescriptor::from_file(&path).unwrap();
        assert_eq!(d.name, "webapp");
        assert_eq!(d.topology, TopologyIntent::Auto);
        assert_eq!(d.bind_port, 5000);
        assert_eq!(d.public_port, 80);
        assert_eq!(d.health_path, "/health");
        assert_eq!(d.public_host_names, vec!["example.com", "www.example.com"]);
        assert!(d.packages.contains("python3-venv"));
        assert_eq!(d.environment.get("PYTHON_VERSION").unwrap(), "3.9.0");
    }

    #[test]
    fn test_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.yaml");
        fs::write(
            &path,
            "name: grid\ntopology: containerized\nbind_port: 8080\nworking_directory: /opt/grid\nimage: ghcr.io/acme/grid:1.2\n",
        )
        .unwrap();

        let d = DeploymentDescriptor::from_file(&path).unwrap();
        assert_eq!(d.name, "grid");
        assert_eq!(d.topology, TopologyIntent::Containerized);
        assert_eq!(d.image.as_deref(), Some("ghcr.io/acme/grid:1.2"));
    }

    #[test]
    fn test_from_file_missing_bind_port() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.toml");
        fs::write(&path, "working_directory = \"/srv\"\n").unwrap();
        let err = DeploymentDescriptor::from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bind_port"));
    }

    #[test]
    fn test_service_environment_sets_port() {
        let mut d = DeploymentDescriptor::new(5000, "/srv/webapp");
        d.environment.insert("PORT".to_string(), "1234".to_string());
        d.environment.insert("MODE".to_string(), "live".to_string());
        let env = d.service_environment();
        assert_eq!(env.get("PORT").unwrap(), "5000");
        assert_eq!(env.get("MODE").unwrap(), "live");
    }

    #[test]
    fn test_check_prerequisites() {
        let dir = TempDir::new().unwrap();
        let mut d = DeploymentDescriptor::new(5000, dir.path());
        d.required_files = vec![PathBuf::from("Procfile"), PathBuf::from("templates/index.html")];

        let err = d.check_prerequisites().unwrap_err();
        assert!(err.is_preflight());
        assert!(err.to_string().contains("Procfile"));
        assert!(err.to_string().contains("index.html"));

        fs::write(dir.path().join("Procfile"), "web: app").unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("templates/index.html"), "<html/>").unwrap();
        d.check_prerequisites().unwrap();
    }

    #[test]
    fn test_check_prerequisites_missing_workdir() {
        let d = DeploymentDescriptor::new(5000, "/nonexistent/hostrig/workdir");
        let err = d.check_prerequisites().unwrap_err();
        assert!(matches!(err, ProvisionError::CapabilityMissing(_)));
    }
}
