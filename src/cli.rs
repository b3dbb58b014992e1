use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};

use toolrig::context::{IsolatedPreference, RunFlags};
use toolrig::dispatcher::Action;

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: ToolrigCommand,

    #[command(flatten)]
    pub(crate) options: GlobalOptions,
}

#[derive(Debug, Args, Clone, Default, PartialEq)]
pub struct GlobalOptions {
    /// Re-run stages even when a module is already installed
    #[clap(long, global = true)]
    pub force: bool,
    /// Log every mutation instead of performing it
    #[clap(long, global = true)]
    pub dry_run: bool,
    /// Allow the isolated shell environment regardless of configuration
    #[clap(long, global = true, conflicts_with = "no_isolated")]
    pub use_isolated: bool,
    /// Never use the isolated shell environment
    #[clap(long, global = true)]
    pub no_isolated: bool,
    /// Run containerizable modules inside containers
    #[clap(long, global = true)]
    pub use_containers: bool,
    /// Diagnostic log level or filter (overrides RUST_LOG)
    #[clap(long, global = true)]
    pub log_level: Option<String>,
    /// Directory holding `config.json` and `modules/`
    #[clap(long, global = true, env = "TOOLRIG_ROOT")]
    pub root: Option<PathBuf>,
    /// Directory for state, backups, logs and cache
    #[clap(long, global = true, env = "TOOLRIG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Platform to resolve configuration for (defaults to the detected one)
    #[clap(long, global = true)]
    pub platform: Option<String>,
}

impl GlobalOptions {
    pub fn run_flags(&self) -> RunFlags {
        let isolated = if self.use_isolated {
            IsolatedPreference::Allow
        } else if self.no_isolated {
            IsolatedPreference::Deny
        } else {
            IsolatedPreference::Config
        };
        RunFlags {
            force: self.force,
            dry_run: self.dry_run,
            isolated,
            use_containers: self.use_containers,
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ToolrigCommand {
    /// Installs modules. Defaults to every enabled module in plan order
    Install {
        modules: Vec<String>,
    },
    /// Removes modules and their alias blocks
    Remove {
        modules: Vec<String>,
    },
    /// Runs each module's verify stage
    Verify {
        modules: Vec<String>,
    },
    /// Runs each module's info stage
    Info {
        modules: Vec<String>,
    },
    /// Runs the update stage of installed modules
    Update {
        modules: Vec<String>,
    },
    /// Snapshots the declared backup paths of modules
    Backup {
        modules: Vec<String>,
    },
    /// Restores files from a backup set. Defaults to the latest set
    Restore {
        modules: Vec<String>,
        /// Backup set id to restore
        #[clap(long)]
        id: Option<String>,
    },
    /// Prints the execution plan
    List {
        modules: Vec<String>,
    },
    /// Prints the recorded state and latest backup of each module
    Status {
        modules: Vec<String>,
    },
    /// Removes backup sets older than the retention window
    Prune {
        modules: Vec<String>,
    },
}

impl ToolrigCommand {
    pub fn modules(&self) -> &[String] {
        match self {
            ToolrigCommand::Install { modules }
            | ToolrigCommand::Remove { modules }
            | ToolrigCommand::Verify { modules }
            | ToolrigCommand::Info { modules }
            | ToolrigCommand::Update { modules }
            | ToolrigCommand::Backup { modules }
            | ToolrigCommand::Restore { modules, .. }
            | ToolrigCommand::List { modules }
            | ToolrigCommand::Status { modules }
            | ToolrigCommand::Prune { modules } => modules,
        }
    }

    /// The dispatcher action, or `None` for the reporting commands.
    pub fn action(&self) -> Option<Action> {
        match self {
            ToolrigCommand::Install { .. } => Some(Action::Install),
            ToolrigCommand::Remove { .. } => Some(Action::Remove),
            ToolrigCommand::Verify { .. } => Some(Action::Verify),
            ToolrigCommand::Info { .. } => Some(Action::Info),
            ToolrigCommand::Update { .. } => Some(Action::Update),
            ToolrigCommand::Backup { .. } => Some(Action::Backup),
            ToolrigCommand::Restore { id, .. } => Some(Action::Restore { id: id.clone() }),
            ToolrigCommand::List { .. }
            | ToolrigCommand::Status { .. }
            | ToolrigCommand::Prune { .. } => None,
        }
    }
}
