use super::{Host, ServiceRef};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

const DEBIAN_OS_RELEASE: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n\
NAME=\"Debian GNU/Linux\"\n\
VERSION_ID=\"12\"\n\
ID=debian\n";

/// Mutating host operations that can be scripted to fail or stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    InstallPackages,
    WriteFile,
    EnableService,
    StartService,
    ReloadService,
    AllowFirewallPort,
}

#[derive(Debug, Default)]
struct MockState {
    os_release: Option<String>,
    executables: BTreeMap<String, PathBuf>,
    active_firewall: Option<String>,
    engine_reachable: bool,
    installed: BTreeSet<String>,
    files: BTreeMap<PathBuf, (Vec<u8>, u32)>,
    enabled: BTreeSet<ServiceRef>,
    active: BTreeSet<ServiceRef>,
    firewall_rules: BTreeSet<u16>,
    failures: HashMap<MockOperation, VecDeque<String>>,
    permanent_failures: HashMap<MockOperation, String>,
    delays: HashMap<MockOperation, Duration>,
    mutations: Vec<String>,
    reloads: Vec<ServiceRef>,
    applied: BTreeMap<ServiceRef, String>,
}

/// In-memory host used by tests and dry runs.
///
/// Every successful mutation is appended to a log so tests can assert that a
/// run did (or did not) touch the host.
pub struct MockHost {
    state: RwLock<MockState>,
}

impl MockHost {
    /// A host with nothing installed and no tools on the path
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState::default()),
        }
    }

    /// Debian host with apt, systemd and an active ufw
    pub fn native_ready() -> Self {
        let host = Self::new()
            .with_os_release(DEBIAN_OS_RELEASE)
            .with_executable("apt-get")
            .with_executable("systemctl")
            .with_executable("ufw");
        host.set_firewall(Some("ufw"));
        host
    }

    /// Debian host with apt, systemd and a reachable docker engine
    pub fn container_ready() -> Self {
        let host = Self::new()
            .with_os_release(DEBIAN_OS_RELEASE)
            .with_executable("apt-get")
            .with_executable("systemctl")
            .with_executable("docker");
        host.set_engine_reachable(true);
        host
    }

    pub fn with_os_release(self, content: &str) -> Self {
        self.write_state().os_release = Some(content.to_string());
        self
    }

    pub fn with_executable(self, program: &str) -> Self {
        self.write_state().executables.insert(
            program.to_string(),
            PathBuf::from("/usr/bin").join(program),
        );
        self
    }

    pub fn without_executable(self, program: &str) -> Self {
        self.write_state().executables.remove(program);
        self
    }

    pub fn with_installed(self, package: &str) -> Self {
        self.write_state().installed.insert(package.to_string());
        self
    }

    pub fn set_firewall(&self, name: Option<&str>) {
        self.write_state().active_firewall = name.map(str::to_string);
    }

    pub fn set_engine_reachable(&self, reachable: bool) {
        self.write_state().engine_reachable = reachable;
    }

    /// Fail the next `times` calls of `op` with `message`
    pub fn fail_next(&self, op: MockOperation, times: usize, message: &str) {
        let mut state = self.write_state();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(message.to_string());
        }
    }

    /// Fail every call of `op` with `message`
    pub fn fail_always(&self, op: MockOperation, message: &str) {
        self.write_state()
            .permanent_failures
            .insert(op, message.to_string());
    }

    /// Make every call of `op` take at least `delay`
    pub fn delay(&self, op: MockOperation, delay: Duration) {
        self.write_state().delays.insert(op, delay);
    }

    /// Put a file in place without recording a mutation
    pub fn seed_file(&self, path: impl AsRef<Path>, content: &str) {
        self.write_state().files.insert(
            path.as_ref().to_path_buf(),
            (content.as_bytes().to_vec(), 0o644),
        );
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.read_state()
            .files
            .get(path.as_ref())
            .map(|(content, _)| String::from_utf8_lossy(content).to_string())
    }

    pub fn file_mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.read_state()
            .files
            .get(path.as_ref())
            .map(|(_, mode)| *mode)
    }

    pub fn files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.read_state()
            .files
            .iter()
            .map(|(path, (content, _))| (path.clone(), content.clone()))
            .collect()
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.read_state().installed.contains(package)
    }

    pub fn is_active(&self, service: &ServiceRef) -> bool {
        self.read_state().active.contains(service)
    }

    pub fn is_enabled(&self, service: &ServiceRef) -> bool {
        self.read_state().enabled.contains(service)
    }

    pub fn allows(&self, port: u16) -> bool {
        self.read_state().firewall_rules.contains(&port)
    }

    pub fn mutations(&self) -> Vec<String> {
        self.read_state().mutations.clone()
    }

    pub fn reloads(&self) -> Vec<ServiceRef> {
        self.read_state().reloads.clone()
    }

    /// Mark a service as already running, as if started before hostrig
    pub fn with_active(self, service: ServiceRef) -> Self {
        self.write_state().active.insert(service);
        self
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MockState> {
        self.state.read().expect("mock host state poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().expect("mock host state poisoned")
    }

    async fn enter(&self, op: MockOperation) -> Result<()> {
        let delay = self.read_state().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write_state();
        if let Some(message) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(anyhow!(message));
        }
        if let Some(message) = state.permanent_failures.get(&op) {
            return Err(anyhow!(message.clone()));
        }
        Ok(())
    }

    fn record(&self, mutation: String) {
        self.write_state().mutations.push(mutation);
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Host for MockHost {
    async fn os_release(&self) -> Option<String> {
        self.read_state().os_release.clone()
    }

    async fn which(&self, program: &str) -> Option<PathBuf> {
        self.read_state().executables.get(program).cloned()
    }

    async fn active_firewall(&self) -> Option<String> {
        self.read_state().active_firewall.clone()
    }

    async fn container_engine_reachable(&self) -> bool {
        self.read_state().engine_reachable
    }

    async fn package_installed(&self, package: &str) -> Result<bool> {
        Ok(self.is_installed(package))
    }

    async fn install_packages(&self, packages: &[String]) -> Result<()> {
        self.enter(MockOperation::InstallPackages).await?;
        self.write_state()
            .installed
            .extend(packages.iter().cloned());
        self.record(format!("install {}", packages.join(" ")));
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_state()
            .files
            .get(path)
            .map(|(content, _)| content.clone()))
    }

    async fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        self.enter(MockOperation::WriteFile).await?;
        self.write_state()
            .files
            .insert(path.to_path_buf(), (content.to_vec(), mode));
        self.record(format!("write {}", path.display()));
        Ok(())
    }

    async fn service_enabled(&self, service: &ServiceRef) -> Result<bool> {
        Ok(self.is_enabled(service))
    }

    async fn enable_service(&self, service: &ServiceRef) -> Result<()> {
        self.enter(MockOperation::EnableService).await?;
        self.write_state().enabled.insert(service.clone());
        self.record(format!("enable {}", service));
        Ok(())
    }

    async fn service_active(&self, service: &ServiceRef) -> Result<bool> {
        Ok(self.is_active(service))
    }

    async fn start_service(&self, service: &ServiceRef) -> Result<()> {
        self.enter(MockOperation::StartService).await?;
        self.write_state().active.insert(service.clone());
        self.record(format!("start {}", service));
        Ok(())
    }

    async fn reload_service(&self, service: &ServiceRef) -> Result<()> {
        self.enter(MockOperation::ReloadService).await?;
        self.write_state().reloads.push(service.clone());
        self.record(format!("reload {}", service));
        Ok(())
    }

    async fn applied_config(&self, service: &ServiceRef) -> Result<Option<String>> {
        Ok(self.read_state().applied.get(service).cloned())
    }

    /// Bookkeeping only; not part of the mutation log
    async fn record_applied_config(&self, service: &ServiceRef, fingerprint: &str) -> Result<()> {
        self.write_state()
            .applied
            .insert(service.clone(), fingerprint.to_string());
        Ok(())
    }

    async fn firewall_allows(&self, port: u16) -> Result<bool> {
        Ok(self.allows(port))
    }

    async fn allow_firewall_port(&self, port: u16) -> Result<()> {
        self.enter(MockOperation::AllowFirewallPort).await?;
        self.write_state().firewall_rules.insert(port);
        self.record(format!("allow {}/tcp", port));
        Ok(())
    }
}
