use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory layout underneath the per-environment data directory.
///
/// Everything the engine persists lives here: install-state logs, backup sets, log files and
/// module caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<data>/state`, one append-only log per module.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// `<data>/backups`, one directory per module holding its backup sets.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Creates the data directory tree if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.backups_dir(),
            self.logs_dir(),
            self.cache_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_creates_directories() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("data"));
        layout.ensure().unwrap();

        assert!(layout.state_dir().exists());
        assert!(layout.backups_dir().exists());
        assert!(layout.logs_dir().exists());
        assert!(layout.cache_dir().exists());
    }

    #[test]
    fn test_ensure_is_repeatable() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.state_dir().is_dir());
    }
}
