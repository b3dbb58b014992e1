use std::path::PathBuf;
use directories::ProjectDirs;

use crate::error::{Result, ToolrigError};

/// Default data directory (`~/.local/share/toolrig` on Linux).
pub fn get_global_data_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "toolrig", "toolrig")
        .ok_or_else(|| ToolrigError::config("Could not get project directories"))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}
