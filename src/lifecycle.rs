//! Per-module lifecycle state machine.
//!
//! ```text
//! NotChecked
//!     ↓
//! Checked { installed | missing }
//!     ↓
//! Installing | Removing | Verifying | Updating | Inspecting | BackingUp | Restoring
//!     ↓
//! Done { success | skipped | failed }
//!
//! (NotChecked and Checked can also go straight to Done)
//! ```

use std::fmt;

use crate::error::{Result, ToolrigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Installed,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Installing,
    Removing,
    Verifying,
    Updating,
    Inspecting,
    BackingUp,
    Restoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePhase {
    NotChecked,
    Checked(Presence),
    Active(Activity),
    Done(Completion),
}

impl ModulePhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: ModulePhase) -> bool {
        match (self, next) {
            (Self::NotChecked, Self::Checked(_)) => true,
            (Self::NotChecked, Self::Done(Completion::Failed)) => true,
            (Self::Checked(_), Self::Active(_)) => true,
            (Self::Checked(_), Self::Done(_)) => true,
            (Self::Active(_), Self::Done(Completion::Success | Completion::Failed)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ModulePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotChecked => write!(f, "not checked"),
            Self::Checked(Presence::Installed) => write!(f, "checked (installed)"),
            Self::Checked(Presence::Missing) => write!(f, "checked (missing)"),
            Self::Active(activity) => write!(f, "{}", format!("{activity:?}").to_lowercase()),
            Self::Done(Completion::Success) => write!(f, "done (success)"),
            Self::Done(Completion::Skipped) => write!(f, "done (skipped)"),
            Self::Done(Completion::Failed) => write!(f, "done (failed)"),
        }
    }
}

/// Tracks one module through a run.
#[derive(Debug, Clone)]
pub struct ModuleLifecycle {
    module: String,
    phase: ModulePhase,
}

impl ModuleLifecycle {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            phase: ModulePhase::NotChecked,
        }
    }

    pub fn phase(&self) -> ModulePhase {
        self.phase
    }

    /// Moves to `next`.
    ///
    /// # Errors
    /// Returns [`ToolrigError::Lifecycle`] for an illegal transition; the phase is unchanged.
    pub fn transition(&mut self, next: ModulePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ToolrigError::lifecycle(format!(
                "{}: cannot go from {} to {}",
                self.module, self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Marks the module failed from any non-terminal phase.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = ModulePhase::Done(Completion::Failed);
        }
    }
}
