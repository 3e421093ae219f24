//! Named exclusive locks over host resources
//!
//! Each name maps to an in-process async mutex. With a lock directory
//! configured, the holder also takes an advisory file lock on
//! `<dir>/<name>.lock` so separate processes on the same host serialize too.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct LockManager {
    dir: Option<PathBuf>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one action attempt
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    file: Option<File>,
    _local: OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(e) = FileExt::unlock(file) {
                debug!("Failed to release file lock {}: {}", self.name, e);
            }
        }
    }
}

impl LockManager {
    /// In-process locking only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn local(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    pub async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let local = self.local(name).lock_owned().await;

        let file = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("{}.lock", name));
                let dir = dir.clone();
                let file = tokio::task::spawn_blocking(move || -> Result<File> {
                    fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create lock dir {}", dir.display()))?;
                    let file = OpenOptions::new()
                        .create(true)
                        .truncate(false)
                        .write(true)
                        .open(&path)
                        .with_context(|| format!("Failed to open lock file {}", path.display()))?;
                    file.lock_exclusive()
                        .with_context(|| format!("Failed to lock {}", path.display()))?;
                    Ok(file)
                })
                .await
                .context("Lock task panicked")??;
                Some(file)
            }
            None => None,
        };

        debug!("Acquired lock {}", name);
        Ok(LockGuard {
            name: name.to_string(),
            file,
            _local: local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let locks = Arc::new(LockManager::new());
        let guard = locks.acquire("package-manager").await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("package-manager").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = LockManager::new();
        let _a = locks.acquire("firewall").await.unwrap();
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("container-engine"))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_lock_created() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().join("locks");
        let locks = LockManager::with_dir(&lock_dir);

        let guard = locks.acquire("service-supervisor").await.unwrap();
        assert!(lock_dir.join("service-supervisor.lock").exists());

        // Another handle cannot take the advisory lock while it is held
        let other = File::open(lock_dir.join("service-supervisor.lock")).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(guard);
        assert!(other.try_lock_exclusive().is_ok());
    }
}
