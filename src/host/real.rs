use super::docker;
use super::{Host, ServiceRef};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// Where applied-configuration fingerprints are kept between runs
pub const DEFAULT_STATE_DIR: &str = "/var/lib/hostrig/applied";

/// Host implementation that shells out to the machine's own tools
pub struct SystemHost {
    state_dir: PathBuf,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::with_state_dir(DEFAULT_STATE_DIR)
    }

    pub fn with_state_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: dir.into(),
        }
    }

    fn applied_path(&self, service: &ServiceRef) -> PathBuf {
        self.state_dir.join(format!("{}.sha256", service.state_key()))
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        debug!("Running {} {}", program, args.join(" "));
        Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", program))
    }

    /// Run a command and fail with its stderr when it exits non-zero
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<Output> {
        let output = self.run(program, args).await?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }

    async fn package_manager(&self) -> Result<&'static str> {
        for candidate in ["apt-get", "dnf", "yum"] {
            if self.which(candidate).await.is_some() {
                return Ok(candidate);
            }
        }
        bail!("No supported package manager found (apt-get, dnf, yum)")
    }

    async fn compose(&self, project: &str, file: &Path, args: &[&str]) -> Result<Output> {
        let file = file.to_string_lossy();
        let mut full = vec!["compose", "-p", project, "-f", &*file];
        full.extend_from_slice(args);
        self.run_checked("docker", &full).await
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[async_trait]
impl Host for SystemHost {
    async fn os_release(&self) -> Option<String> {
        for path in OS_RELEASE_PATHS {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                return Some(content);
            }
        }
        None
    }

    async fn which(&self, program: &str) -> Option<PathBuf> {
        let search_path = env::var_os("PATH")?;
        env::split_paths(&search_path)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    async fn active_firewall(&self) -> Option<String> {
        if self.which("ufw").await.is_some() {
            if let Ok(output) = self.run("ufw", &["status"]).await {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if stdout.lines().next().map(str::trim) == Some("Status: active") {
                    return Some("ufw".to_string());
                }
            }
        }
        if self.which("firewall-cmd").await.is_some() {
            if let Ok(output) = self.run("firewall-cmd", &["--state"]).await {
                if String::from_utf8_lossy(&output.stdout).trim() == "running" {
                    return Some("firewalld".to_string());
                }
            }
        }
        None
    }

    async fn container_engine_reachable(&self) -> bool {
        debug!("Pinging container engine at {}", docker::engine_endpoint());
        docker::check_engine_reachable().await
    }

    async fn package_installed(&self, package: &str) -> Result<bool> {
        match self.package_manager().await? {
            "apt-get" => {
                let output = self
                    .run("dpkg-query", &["-W", "-f=${Status}", package])
                    .await?;
                Ok(output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("install ok installed"))
            }
            _ => Ok(self.run("rpm", &["-q", package]).await?.status.success()),
        }
    }

    async fn install_packages(&self, packages: &[String]) -> Result<()> {
        let manager = self.package_manager().await?;
        if manager == "apt-get" {
            self.run_checked("apt-get", &["update", "-q"]).await?;
        }
        let mut args = vec!["install", "-y"];
        args.extend(packages.iter().map(String::as_str));
        self.run_checked(manager, &args).await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("Failed to set mode {:o} on {}", mode, path.display()))?;
        Ok(())
    }

    async fn service_enabled(&self, service: &ServiceRef) -> Result<bool> {
        match service {
            ServiceRef::Unit { name } => Ok(self
                .run("systemctl", &["is-enabled", "--quiet", name.as_str()])
                .await?
                .status
                .success()),
            // Stacks come back on their own through the restart policy
            ServiceRef::Stack { .. } => Ok(true),
        }
    }

    async fn enable_service(&self, service: &ServiceRef) -> Result<()> {
        if let ServiceRef::Unit { name } = service {
            self.run_checked("systemctl", &["daemon-reload"]).await?;
            self.run_checked("systemctl", &["enable", name.as_str()]).await?;
        }
        Ok(())
    }

    async fn service_active(&self, service: &ServiceRef) -> Result<bool> {
        match service {
            ServiceRef::Unit { name } => Ok(self
                .run("systemctl", &["is-active", "--quiet", name.as_str()])
                .await?
                .status
                .success()),
            ServiceRef::Stack { project, file } => {
                let output = self
                    .compose(project, file, &["ps", "--status", "running", "--quiet"])
                    .await?;
                Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
            }
        }
    }

    async fn start_service(&self, service: &ServiceRef) -> Result<()> {
        match service {
            ServiceRef::Unit { name } => {
                self.run_checked("systemctl", &["daemon-reload"]).await?;
                self.run_checked("systemctl", &["start", name.as_str()]).await?;
            }
            ServiceRef::Stack { project, file } => {
                self.compose(project, file, &["up", "-d", "--remove-orphans"])
                    .await?;
            }
        }
        Ok(())
    }

    async fn reload_service(&self, service: &ServiceRef) -> Result<()> {
        match service {
            ServiceRef::Unit { name } => {
                self.run_checked("systemctl", &["daemon-reload"]).await?;
                self.run_checked("systemctl", &["reload-or-restart", name.as_str()])
                    .await?;
            }
            // `up -d` recreates only the services whose definition changed
            ServiceRef::Stack { project, file } => {
                self.compose(project, file, &["up", "-d", "--remove-orphans"])
                    .await?;
            }
        }
        Ok(())
    }

    async fn applied_config(&self, service: &ServiceRef) -> Result<Option<String>> {
        let path = self.applied_path(service);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn record_applied_config(&self, service: &ServiceRef, fingerprint: &str) -> Result<()> {
        let path = self.applied_path(service);
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.state_dir.display()))?;
        tokio::fs::write(&path, format!("{}\n", fingerprint))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Recorded applied configuration of {}", service);
        Ok(())
    }

    async fn firewall_allows(&self, port: u16) -> Result<bool> {
        let rule = format!("{}/tcp", port);
        match self.active_firewall().await.as_deref() {
            Some("ufw") => {
                let output = self.run_checked("ufw", &["status"]).await?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout
                    .lines()
                    .any(|line| line.starts_with(&rule) && line.contains("ALLOW")))
            }
            Some("firewalld") => {
                let query = format!("--query-port={}", rule);
                Ok(self
                    .run("firewall-cmd", &[query.as_str()])
                    .await?
                    .status
                    .success())
            }
            _ => Ok(false),
        }
    }

    async fn allow_firewall_port(&self, port: u16) -> Result<()> {
        let rule = format!("{}/tcp", port);
        match self.active_firewall().await.as_deref() {
            Some("ufw") => {
                self.run_checked("ufw", &["allow", rule.as_str()]).await?;
            }
            Some("firewalld") => {
                let add = format!("--add-port={}", rule);
                self.run_checked("firewall-cmd", &["--permanent", add.as_str()])
                    .await?;
                self.run_checked("firewall-cmd", &["--reload"]).await?;
            }
            _ => bail!("No active firewall to add {} to", rule),
        }
        Ok(())
    }
}
