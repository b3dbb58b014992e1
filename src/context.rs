//! Run-wide execution context.
//!
//! One [`ExecutionContext`] is built at startup and passed by reference into every component.
//! It is read-only apart from the runtime probe results, which are memoized on first use.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::global::layout::DataLayout;
use crate::util::home_dir;

/// Whether the run may use the isolated shell environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolatedPreference {
    /// Follow `isolated.enabled` from the global configuration.
    #[default]
    Config,
    /// `--use-isolated`
    Allow,
    /// `--no-isolated`
    Deny,
}

impl IsolatedPreference {
    pub fn allows(self, configured: bool) -> bool {
        match self {
            Self::Config => configured,
            Self::Allow => true,
            Self::Deny => false,
        }
    }
}

/// User flags for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub force: bool,
    pub dry_run: bool,
    pub isolated: IsolatedPreference,
    /// `--use-containers`; containers are also enabled by `container.enabled`.
    pub use_containers: bool,
    pub log_level: Option<String>,
}

/// Runtimes whose availability decides the execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Container,
    Isolated,
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runtime::Container => write!(f, "container runtime"),
            Runtime::Isolated => write!(f, "isolated shell runtime"),
        }
    }
}

/// Checks whether a runtime is usable on this host.
pub trait Prober {
    /// `command` is the configured launcher for `runtime` (e.g. `docker`, `wsl`).
    fn probe(&self, runtime: Runtime, command: &str) -> bool;
}

/// Probes by running `<command> --version` and checking the exit status.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProber;

impl Prober for SystemProber {
    fn probe(&self, runtime: Runtime, command: &str) -> bool {
        let available = Command::new(command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        debug!("Probed {} ({}): available={}", runtime, command, available);
        available
    }
}

/// Run-wide state shared by every component.
pub struct ExecutionContext {
    pub root_dir: PathBuf,
    pub data: DataLayout,
    pub platform: String,
    pub flags: RunFlags,
    prober: Box<dyn Prober>,
    container_probe: OnceCell<bool>,
    isolated_probe: OnceCell<bool>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("root_dir", &self.root_dir)
            .field("data", &self.data)
            .field("platform", &self.platform)
            .field("flags", &self.flags)
            .field("container_probe", &self.container_probe.get())
            .field("isolated_probe", &self.isolated_probe.get())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new<P: AsRef<Path>, D: AsRef<Path>>(
        root_dir: P,
        data_dir: D,
        platform: &str,
        flags: RunFlags,
    ) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            data: DataLayout::new(data_dir),
            platform: platform.to_string(),
            flags,
            prober: Box::new(SystemProber),
            container_probe: OnceCell::new(),
            isolated_probe: OnceCell::new(),
        }
    }

    /// Replaces the prober. Used by tests to inject fake runtimes.
    pub fn with_prober(mut self, prober: Box<dyn Prober>) -> Self {
        self.prober = prober;
        self.container_probe = OnceCell::new();
        self.isolated_probe = OnceCell::new();
        self
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root_dir.join("modules")
    }

    pub fn is_dry_run(&self) -> bool {
        self.flags.dry_run
    }

    /// Availability of `runtime`, probed once per run.
    pub fn runtime_available(&self, runtime: Runtime, command: &str) -> bool {
        let cell = match runtime {
            Runtime::Container => &self.container_probe,
            Runtime::Isolated => &self.isolated_probe,
        };
        *cell.get_or_init(|| self.prober.probe(runtime, command))
    }

    /// Variables available to `${NAME}` placeholders for `module`.
    pub fn variables(&self, module: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        if let Some(home) = home_dir() {
            vars.insert("HOME".to_string(), home.to_string_lossy().to_string());
        }
        vars.insert(
            "ROOT_DIR".to_string(),
            self.root_dir.to_string_lossy().to_string(),
        );
        vars.insert(
            "DATA_DIR".to_string(),
            self.data.root().to_string_lossy().to_string(),
        );
        vars.insert("MODULE".to_string(), module.to_string());
        vars.insert("PLATFORM".to_string(), self.platform.clone());
        vars
    }
}
