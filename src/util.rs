use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Returns the platform name used to select `platforms.<platform>` configuration subtrees.
///
/// Linux hosts running under WSL report `wsl` so they can carry their own overrides.
pub fn current_platform() -> String {
    let os = std::env::consts::OS;
    match os {
        "linux" if is_wsl() => "wsl".to_string(),
        "macos" => "macos".to_string(),
        "windows" => "windows".to_string(),
        "linux" => "linux".to_string(),
        other => other.to_string(),
    }
}

fn is_wsl() -> bool {
    std::env::var_os("WSL_DISTRO_NAME").is_some()
        || std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|release| release.to_lowercase().contains("microsoft"))
            .unwrap_or(false)
}

/// Best-effort host identity recorded in backup manifests.
pub fn host_identity() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    unix_seconds(SystemTime::now())
}

pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn unix_millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Returns the user's home directory from the environment.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Expands `${NAME}` placeholders and a leading `~/`.
///
/// Names are looked up in `vars` first, then in the process environment.
/// Returns `None` if any placeholder cannot be resolved.
pub fn expand_placeholders(input: &str, vars: &HashMap<String, String>) -> Option<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok()?;
    let mut unresolved = false;
    let expanded = re.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name).cloned().or_else(|| std::env::var(name).ok()) {
            Some(value) => value,
            None => {
                unresolved = true;
                String::new()
            }
        }
    });
    if unresolved {
        return None;
    }
    let expanded = expanded.into_owned();
    if let Some(rest) = expanded.strip_prefix("~/") {
        let home = vars
            .get("HOME")
            .map(PathBuf::from)
            .or_else(home_dir)?;
        return Some(home.join(rest).to_string_lossy().to_string());
    }
    Some(expanded)
}

/// Computes the hex encoded SHA-256 of a file.
pub fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Maps an absolute path to a relative path that is safe to mirror under a backup directory.
///
/// Paths under the home directory become `home/<rest>`, everything else becomes
/// `root/<path without prefix>`.
pub fn mirror_relative(path: &Path, home: Option<&Path>) -> PathBuf {
    if let Some(home) = home {
        if let Ok(rest) = path.strip_prefix(home) {
            return Path::new("home").join(rest);
        }
    }
    let mut relative = PathBuf::from("root");
    for component in path.components() {
        if let std::path::Component::Normal(part) = component {
            relative.push(part);
        }
    }
    relative
}
