//! Backup sets taken before a module mutates its files.
//!
//! Each set lives in `<data>/backups/<module>/<id>/` and holds a `manifest.toml` plus a
//! `files/` tree mirroring the captured paths. The manifest is written last, so a directory
//! without one is an incomplete snapshot and is ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EffectiveConfig;
use crate::context::ExecutionContext;
use crate::error::{Result, ToolrigError};
use crate::util::{expand_placeholders, home_dir, host_identity, mirror_relative, sha256_file, unix_millis, unix_seconds};

pub const MANIFEST_FILE: &str = "manifest.toml";
const FILES_DIR: &str = "files";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Absolute path the file was captured from.
    pub original: PathBuf,
    /// Location under `files/`.
    pub relative: PathBuf,
    /// Hex sha256 of the captured content.
    pub checksum: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BackupManifest {
    pub id: String,
    pub module: String,
    /// Seconds since the unix epoch.
    pub created_at: u64,
    pub host: String,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

/// A completed snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

impl BackupSet {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn lists(&self, original: &Path) -> bool {
        self.manifest.entries.iter().any(|e| e.original == original)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub id: String,
    pub restored: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Expands the module's `backup.paths` for this run.
///
/// Paths with placeholders that cannot be resolved are skipped with a warning.
pub fn resolve_backup_paths(module: &EffectiveConfig, ctx: &ExecutionContext) -> Vec<PathBuf> {
    let vars = ctx.variables(&module.name);
    module
        .backup_paths
        .iter()
        .filter_map(|raw| match expand_placeholders(raw, &vars) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                warn!("{}: cannot resolve backup path {}, skipping it", module.name, raw);
                None
            }
        })
        .collect()
}

fn id_sort_key(id: &str) -> (u128, u32) {
    let mut parts = id.splitn(2, '-');
    let base = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let suffix = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (base, suffix)
}

/// Creates, lists, restores and prunes backup sets under one backups directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.dir.join(module)
    }

    /// Snapshots `paths` for `module` and returns the new set.
    ///
    /// Missing paths are skipped. Directories are captured recursively.
    ///
    /// # Errors
    /// Returns [`ToolrigError::Backup`] if any existing path cannot be captured; the partial
    /// set is removed.
    pub fn snapshot(&self, module: &str, paths: &[PathBuf]) -> Result<BackupSet> {
        self.snapshot_at(module, paths, SystemTime::now())
    }

    pub fn snapshot_at(&self, module: &str, paths: &[PathBuf], now: SystemTime) -> Result<BackupSet> {
        let module_dir = self.module_dir(module);
        fs::create_dir_all(&module_dir).map_err(|e| {
            ToolrigError::backup(format!("cannot create {}: {}", module_dir.display(), e))
        })?;

        let base = format!("{:013}", unix_millis(now));
        let mut id = base.clone();
        let mut counter = 1;
        while module_dir.join(&id).exists() {
            id = format!("{base}-{counter}");
            counter += 1;
        }
        let set_dir = module_dir.join(&id);

        match self.capture(module, &id, &set_dir, paths, now) {
            Ok(manifest) => {
                info!("{}: backup {} captured {} file(s)", module, id, manifest.entries.len());
                Ok(BackupSet {
                    dir: set_dir,
                    manifest,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&set_dir) {
                    debug!("Could not remove partial backup {}: {}", set_dir.display(), cleanup);
                }
                Err(ToolrigError::backup(format!("{module}: {e}")))
            }
        }
    }

    fn capture(
        &self,
        module: &str,
        id: &str,
        set_dir: &Path,
        paths: &[PathBuf],
        now: SystemTime,
    ) -> Result<BackupManifest> {
        let files_dir = set_dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir)?;
        let home = home_dir();
        let mut entries = Vec::new();

        for path in paths {
            if !path.exists() {
                debug!("{}: backup path {} does not exist, nothing to capture", module, path.display());
                continue;
            }
            for entry in WalkDir::new(path).follow_links(false) {
                let entry = entry?;
                let source = entry.path();
                if !source.is_file() {
                    continue;
                }
                let relative = mirror_relative(source, home.as_deref());
                let target = files_dir.join(&relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(source, &target)?;
                entries.push(ManifestEntry {
                    original: source.to_path_buf(),
                    relative,
                    checksum: sha256_file(&target)?,
                });
            }
        }

        let manifest = BackupManifest {
            id: id.to_string(),
            module: module.to_string(),
            created_at: unix_seconds(now),
            host: host_identity(),
            entries,
        };
        fs::write(set_dir.join(MANIFEST_FILE), toml::to_string_pretty(&manifest)?)?;
        Ok(manifest)
    }

    /// All completed sets of `module`, oldest first.
    pub fn list(&self, module: &str) -> Vec<BackupSet> {
        let module_dir = self.module_dir(module);
        let Ok(read_dir) = fs::read_dir(&module_dir) else {
            return Vec::new();
        };
        let mut sets: Vec<BackupSet> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|dir| {
                let content = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
                match toml::from_str::<BackupManifest>(&content) {
                    Ok(manifest) => Some(BackupSet { dir, manifest }),
                    Err(e) => {
                        warn!("Ignoring backup {} with unreadable manifest: {}", dir.display(), e);
                        None
                    }
                }
            })
            .collect();
        sets.sort_by_key(|set| id_sort_key(set.id()));
        sets
    }

    pub fn latest(&self, module: &str) -> Option<BackupSet> {
        self.list(module).pop()
    }

    pub fn find(&self, module: &str, id: &str) -> Option<BackupSet> {
        self.list(module).into_iter().find(|set| set.id() == id)
    }

    /// Copies every captured file of a set back to its original location.
    ///
    /// Without `id` the most recent set is used. With `dry_run` nothing is written.
    pub fn restore(&self, module: &str, id: Option<&str>, dry_run: bool) -> Result<RestoreReport> {
        let set = match id {
            Some(id) => self.find(module, id),
            None => self.latest(module),
        }
        .ok_or_else(|| match id {
            Some(id) => ToolrigError::backup(format!("{module}: no backup with id {id}")),
            None => ToolrigError::backup(format!("{module}: no backups to restore")),
        })?;

        let mut report = RestoreReport {
            id: set.id().to_string(),
            restored: Vec::new(),
        };
        for entry in &set.manifest.entries {
            let source = set.dir.join(FILES_DIR).join(&entry.relative);
            if dry_run {
                info!("[dry-run] would restore {} from backup {}", entry.original.display(), set.id());
            } else {
                if let Some(parent) = entry.original.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&source, &entry.original).map_err(|e| {
                    ToolrigError::backup(format!(
                        "cannot restore {}: {}",
                        entry.original.display(),
                        e
                    ))
                })?;
            }
            report.restored.push(entry.original.clone());
        }
        Ok(report)
    }

    /// Returns the original paths whose current content differs from the captured checksum.
    ///
    /// Not called automatically after a restore.
    pub fn verify(&self, set: &BackupSet) -> Result<Vec<PathBuf>> {
        let mut mismatched = Vec::new();
        for entry in &set.manifest.entries {
            let matches = entry.original.is_file()
                && sha256_file(&entry.original)? == entry.checksum;
            if !matches {
                mismatched.push(entry.original.clone());
            }
        }
        Ok(mismatched)
    }

    /// Removes sets of `module` older than `retention_days` relative to `now`.
    ///
    /// Best effort: failures are logged and reported, never returned as errors.
    pub fn prune(&self, module: &str, retention_days: u64, now: SystemTime) -> PruneReport {
        let mut report = PruneReport::default();
        let window = Duration::from_secs(retention_days.saturating_mul(SECONDS_PER_DAY));
        let cutoff = unix_seconds(now).saturating_sub(window.as_secs());
        for set in self.list(module) {
            if set.manifest.created_at >= cutoff {
                continue;
            }
            match fs::remove_dir_all(&set.dir) {
                Ok(()) => {
                    debug!("{}: pruned backup {}", module, set.id());
                    report.removed.push(set.id().to_string());
                }
                Err(e) => {
                    warn!("{}: could not prune backup {}: {}", module, set.id(), e);
                    report.failed.push(set.id().to_string());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, BackupManager, PathBuf) {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));
        let home = dir.path().join("home");
        fs::create_dir_all(home.join(".config/nvim")).unwrap();
        fs::write(home.join(".gitconfig"), "[user]\n\tname = dev\n").unwrap();
        fs::write(home.join(".config/nvim/init.lua"), "vim.o.number = true\n").unwrap();
        (dir, manager, home)
    }

    #[test]
    fn test_snapshot_captures_files_and_directories() {
        let (_dir, manager, home) = fixture();
        let paths = vec![
            home.join(".gitconfig"),
            home.join(".config/nvim"),
            home.join("does-not-exist"),
        ];
        let set = manager.snapshot("git", &paths).unwrap();
        assert_eq!(set.manifest.entries.len(), 2);
        assert!(set.lists(&home.join(".gitconfig")));
        assert!(set.lists(&home.join(".config/nvim/init.lua")));
        assert!(set.dir.join(MANIFEST_FILE).exists());
        for entry in &set.manifest.entries {
            assert_eq!(entry.checksum.len(), 64);
            assert!(entry.checksum.chars().all(|c| c.is_ascii_hexdigit()));
            let captured = set.dir.join(FILES_DIR).join(&entry.relative);
            assert_eq!(entry.checksum, sha256_file(&captured).unwrap());
            assert!(set.dir.join(FILES_DIR).join(&entry.relative).is_file());
        }
    }

    #[test]
    fn test_restore_latest() {
        let (_dir, manager, home) = fixture();
        let gitconfig = home.join(".gitconfig");
        manager.snapshot("git", &[gitconfig.clone()]).unwrap();
        fs::write(&gitconfig, "clobbered").unwrap();
        let second = manager.snapshot("git", &[gitconfig.clone()]).unwrap();
        assert_eq!(manager.latest("git").unwrap().id(), second.id());

        fs::write(&gitconfig, "broken again").unwrap();
        let report = manager.restore("git", None, false).unwrap();
        assert_eq!(report.id, second.id());
        assert_eq!(fs::read_to_string(&gitconfig).unwrap(), "clobbered");
    }

    #[test]
    fn test_restore_by_id_and_verify() {
        let (_dir, manager, home) = fixture();
        let gitconfig = home.join(".gitconfig");
        let first = manager.snapshot("git", &[gitconfig.clone()]).unwrap();
        fs::write(&gitconfig, "changed").unwrap();
        manager.snapshot("git", &[gitconfig.clone()]).unwrap();

        assert_eq!(manager.verify(&first).unwrap(), vec![gitconfig.clone()]);
        manager.restore("git", Some(first.id()), false).unwrap();
        assert!(manager.verify(&first).unwrap().is_empty());
        assert_eq!(fs::read_to_string(&gitconfig).unwrap(), "[user]\n\tname = dev\n");
    }

    #[test]
    fn test_restore_dry_run_writes_nothing() {
        let (_dir, manager, home) = fixture();
        let gitconfig = home.join(".gitconfig");
        manager.snapshot("git", &[gitconfig.clone()]).unwrap();
        fs::write(&gitconfig, "changed").unwrap();
        let report = manager.restore("git", None, true).unwrap();
        assert_eq!(report.restored, vec![gitconfig.clone()]);
        assert_eq!(fs::read_to_string(&gitconfig).unwrap(), "changed");
    }

    #[test]
    fn test_restore_without_backups_fails() {
        let (_dir, manager, _home) = fixture();
        let err = manager.restore("git", None, false).unwrap_err();
        assert!(matches!(err, ToolrigError::Backup(_)));
    }

    #[test]
    fn test_same_millisecond_gets_unique_ids() {
        let (_dir, manager, home) = fixture();
        let now = SystemTime::now();
        let a = manager.snapshot_at("git", &[home.join(".gitconfig")], now).unwrap();
        let b = manager.snapshot_at("git", &[home.join(".gitconfig")], now).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.list("git").len(), 2);
        assert_eq!(manager.latest("git").unwrap().id(), b.id());
    }

    #[test]
    fn test_prune_respects_retention_window() {
        let (_dir, manager, home) = fixture();
        let now = SystemTime::now();
        let old = manager
            .snapshot_at("git", &[home.join(".gitconfig")], now - Duration::from_secs(10 * SECONDS_PER_DAY))
            .unwrap();
        let young = manager
            .snapshot_at("git", &[home.join(".gitconfig")], now - Duration::from_secs(SECONDS_PER_DAY))
            .unwrap();

        let report = manager.prune("git", 7, now);
        assert_eq!(report.removed, vec![old.id().to_string()]);
        assert!(report.failed.is_empty());
        assert!(!old.dir.exists());
        assert!(young.dir.exists());
    }

    #[test]
    fn test_incomplete_sets_are_ignored() {
        let (_dir, manager, _home) = fixture();
        fs::create_dir_all(manager.module_dir("git").join("0000000000001")).unwrap();
        assert!(manager.list("git").is_empty());
    }

    #[test]
    fn test_id_sort_key() {
        assert!(id_sort_key("1700000000000-2") < id_sort_key("1700000000000-10"));
        assert!(id_sort_key("1700000000000") < id_sort_key("1700000000000-1"));
    }
}
