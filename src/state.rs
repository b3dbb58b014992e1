use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ToolrigError};
use crate::util::unix_now;

/// Install status of a module.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Installed,
    Absent,
}

/// One appended state record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InstallState {
    pub module: String,
    pub status: InstallStatus,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
}

/// The on-disk log of one module: a sequence of `[[record]]` tables.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct StateLog {
    #[serde(default)]
    pub record: Vec<InstallState>,
}

impl StateLog {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return StateLog::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read state log {}: {}", path.display(), e);
                return StateLog::default();
            }
        };
        toml::from_str(&content).unwrap_or_else(|e| {
            warn!("State log {} is corrupt, treating module as not installed: {}", path.display(), e);
            StateLog::default()
        })
    }
}

/// Append-only per-module install-state store under `<data>/state`.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn log_path(&self, module: &str) -> PathBuf {
        self.dir.join(format!("{module}.toml"))
    }

    /// Appends a record for `module`.
    ///
    /// Each record is written as a standalone `[[record]]` table, so the file stays valid TOML
    /// after every append.
    pub fn record(&self, module: &str, status: InstallStatus) -> Result<InstallState> {
        let state = InstallState {
            module: module.to_string(),
            status,
            timestamp: unix_now(),
        };
        let path = self.log_path(module);
        let chunk = toml::to_string(&StateLog {
            record: vec![state.clone()],
        })?;
        fs::create_dir_all(&self.dir)
            .and_then(|_| {
                let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
                writeln!(file, "{chunk}")
            })
            .map_err(|e| ToolrigError::state(format!("cannot append to {}: {}", path.display(), e)))?;
        Ok(state)
    }

    pub fn history(&self, module: &str) -> Vec<InstallState> {
        StateLog::load_or_default(self.log_path(module))
            .record
            .into_iter()
            .filter(|record| record.module == module)
            .collect()
    }

    pub fn latest(&self, module: &str) -> Option<InstallState> {
        self.history(module).pop()
    }

    /// A module is installed only if its most recent record says so.
    pub fn is_installed(&self, module: &str) -> bool {
        matches!(
            self.latest(module),
            Some(InstallState {
                status: InstallStatus::Installed,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unknown_module_is_not_installed() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(!store.is_installed("git"));
        assert!(store.latest("git").is_none());
    }

    #[test]
    fn test_latest_record_wins() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        store.record("git", InstallStatus::Installed).unwrap();
        assert!(store.is_installed("git"));
        store.record("git", InstallStatus::Absent).unwrap();
        assert!(!store.is_installed("git"));
        store.record("git", InstallStatus::Installed).unwrap();
        assert!(store.is_installed("git"));
        assert_eq!(store.history("git").len(), 3);
    }

    #[test]
    fn test_modules_do_not_share_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.record("git", InstallStatus::Installed).unwrap();
        assert!(!store.is_installed("zsh"));
    }

    #[test]
    fn test_corrupt_log_reads_as_not_installed() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(store.log_path("git"), "[[record]\nstatus = ").unwrap();
        assert!(!store.is_installed("git"));
    }

    #[test]
    fn test_log_is_valid_toml_after_appends() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.record("git", InstallStatus::Installed).unwrap();
        store.record("git", InstallStatus::Installed).unwrap();
        let content = std::fs::read_to_string(store.log_path("git")).unwrap();
        let log: StateLog = toml::from_str(&content).unwrap();
        assert_eq!(log.record.len(), 2);
        assert!(log.record.iter().all(|r| r.status == InstallStatus::Installed));
    }
}
