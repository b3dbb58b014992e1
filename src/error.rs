//! Error types for the orchestration engine.
//!
//! Every library-level failure is a [`ToolrigError`]. The CLI layer wraps these in
//! `anyhow::Error` at the edge; inside the engine they are matched on to decide whether a
//! failure stays at the module boundary or aborts the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::module::Stage;

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum ToolrigError {
    /// A configuration document could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested module does not exist in the module directory.
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// The module does not provide the requested stage.
    #[error("Module {module} does not implement the {stage} stage")]
    StageNotImplemented { module: String, stage: Stage },

    /// A probed runtime is missing.
    #[error("Execution mode unavailable: {0}")]
    ModeUnavailable(String),

    /// A snapshot or restore could not be completed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// A critical module failed and the run was aborted.
    #[error("Critical module {module} failed: {reason}")]
    CriticalModule { module: String, reason: String },

    /// A stage ran and reported failure.
    #[error("Stage {stage} of module {module} failed: {reason}")]
    StageExecution {
        module: String,
        stage: Stage,
        reason: String,
    },

    /// The install-state log could not be read or written.
    #[error("State error: {0}")]
    State(String),

    /// The shell startup file could not be updated.
    #[error("Alias block error in {path}: {reason}")]
    Alias { path: PathBuf, reason: String },

    /// An invalid module lifecycle transition was attempted.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ToolrigError>;

impl ToolrigError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    pub fn not_implemented(module: &str, stage: Stage) -> Self {
        Self::StageNotImplemented {
            module: module.to_string(),
            stage,
        }
    }

    pub fn stage_failed(module: &str, stage: Stage, reason: impl Into<String>) -> Self {
        Self::StageExecution {
            module: module.to_string(),
            stage,
            reason: reason.into(),
        }
    }

    /// Returns true for the "stage is missing" case, which some stages treat as a no-op.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::StageNotImplemented { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolrigError::config("bad json");
        assert_eq!(err.to_string(), "Configuration error: bad json");

        let err = ToolrigError::not_implemented("git", Stage::Verify);
        assert_eq!(err.to_string(), "Module git does not implement the verify stage");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ToolrigError = io_err.into();
        assert!(matches!(err, ToolrigError::Io(_)));
    }

    #[test]
    fn test_is_not_implemented() {
        assert!(ToolrigError::not_implemented("zsh", Stage::Grovel).is_not_implemented());
        assert!(!ToolrigError::stage_failed("zsh", Stage::Install, "exit 1").is_not_implemented());
    }
}
