//! Execution mode selection.
//!
//! The decision is made before a stage runs, from configuration and memoized runtime probes.
//! A mode that fails later at invocation time is not retried at a lower mode.

use std::fmt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EffectiveConfig, GlobalConfig};
use crate::context::{ExecutionContext, Runtime};
use crate::error::ToolrigError;

/// How a module's stages are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Host-native execution.
    Direct,
    /// Inside the isolated secondary shell environment.
    Isolated,
    /// Inside a container.
    Containerized,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Direct => "direct",
            ExecutionMode::Isolated => "isolated",
            ExecutionMode::Containerized => "containerized",
        };
        write!(f, "{name}")
    }
}

/// A higher-priority mode that was wanted but skipped because its runtime is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallback {
    pub wanted: ExecutionMode,
    pub runtime: Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: ExecutionMode,
    pub fallbacks: Vec<Fallback>,
}

/// Picks the execution mode for `module`.
///
/// Containerized requires containers enabled by the user, the module flagged containerizable
/// and the container runtime available. Isolated requires the run to allow it, the module to
/// prefer it and the isolated runtime to be available. Everything else runs directly.
pub fn select_mode(
    module: &EffectiveConfig,
    global: &GlobalConfig,
    ctx: &ExecutionContext,
) -> ModeSelection {
    let mut fallbacks = Vec::new();

    let containers_enabled = global.container.enabled || ctx.flags.use_containers;
    if containers_enabled && module.containerizable {
        if ctx.runtime_available(Runtime::Container, &global.container.runtime) {
            debug!("{} runs containerized", module.name);
            return ModeSelection {
                mode: ExecutionMode::Containerized,
                fallbacks,
            };
        }
        fallbacks.push(Fallback {
            wanted: ExecutionMode::Containerized,
            runtime: Runtime::Container,
        });
    }

    let isolated_allowed = ctx.flags.isolated.allows(global.isolated.enabled);
    if isolated_allowed && module.prefers_isolated {
        if ctx.runtime_available(Runtime::Isolated, &global.isolated.runtime) {
            let mode = ExecutionMode::Isolated;
            log_fallbacks(&module.name, &fallbacks, mode);
            return ModeSelection { mode, fallbacks };
        }
        fallbacks.push(Fallback {
            wanted: ExecutionMode::Isolated,
            runtime: Runtime::Isolated,
        });
    }

    let mode = ExecutionMode::Direct;
    log_fallbacks(&module.name, &fallbacks, mode);
    ModeSelection { mode, fallbacks }
}

fn log_fallbacks(module: &str, fallbacks: &[Fallback], chosen: ExecutionMode) {
    for fallback in fallbacks {
        let err = ToolrigError::ModeUnavailable(format!(
            "{}: {} missing for {} execution",
            module, fallback.runtime, fallback.wanted
        ));
        warn!("{}, falling back to {}", err, chosen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::FakeProber;
    use crate::context::{IsolatedPreference, RunFlags};
    use std::cell::Cell;
    use crate::logging::tests::capture_warnings;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn module(containerizable: bool, prefers_isolated: bool) -> EffectiveConfig {
        EffectiveConfig {
            name: "node".to_string(),
            dir: PathBuf::from("modules/node"),
            enabled: true,
            runlevel: 10,
            dependencies: vec![],
            backup_paths: vec![],
            aliases: BTreeMap::new(),
            containerizable,
            prefers_isolated,
        }
    }

    fn context(flags: RunFlags, container: bool, isolated: bool) -> ExecutionContext {
        ExecutionContext::new("/tmp/root", "/tmp/data", "windows", flags).with_prober(Box::new(
            FakeProber {
                container,
                isolated,
                calls: Rc::new(Cell::new(0)),
            },
        ))
    }

    #[test]
    fn test_containerized_when_everything_lines_up() {
        let flags = RunFlags {
            use_containers: true,
            ..RunFlags::default()
        };
        let ctx = context(flags, true, true);
        let selection = select_mode(&module(true, true), &GlobalConfig::default(), &ctx);
        assert_eq!(selection.mode, ExecutionMode::Containerized);
        assert!(selection.fallbacks.is_empty());
    }

    #[test]
    fn test_missing_container_runtime_falls_back_to_isolated() {
        let flags = RunFlags {
            use_containers: true,
            isolated: IsolatedPreference::Allow,
            ..RunFlags::default()
        };
        let ctx = context(flags, false, true);
        let selection = select_mode(&module(true, true), &GlobalConfig::default(), &ctx);
        assert_eq!(selection.mode, ExecutionMode::Isolated);
        assert_eq!(
            selection.fallbacks,
            vec![Fallback {
                wanted: ExecutionMode::Containerized,
                runtime: Runtime::Container,
            }]
        );
    }

    #[test]
    fn test_fallback_is_logged_as_warning() {
        let flags = RunFlags {
            use_containers: true,
            isolated: IsolatedPreference::Allow,
            ..RunFlags::default()
        };
        let ctx = context(flags, false, true);

        let (selection, output) = capture_warnings(|| {
            select_mode(&module(true, true), &GlobalConfig::default(), &ctx)
        });

        assert_eq!(selection.mode, ExecutionMode::Isolated);
        assert!(output.contains("WARN"), "unexpected log output: {output}");
        assert!(output.contains("node: container runtime missing for containerized execution"));
        assert!(output.contains("falling back to isolated"));
    }

    #[test]
    fn test_not_containerizable_ignores_containers() {
        let mut global = GlobalConfig::default();
        global.container.enabled = true;
        let ctx = context(RunFlags::default(), true, false);
        let selection = select_mode(&module(false, false), &global, &ctx);
        assert_eq!(selection.mode, ExecutionMode::Direct);
        assert!(selection.fallbacks.is_empty());
    }

    #[test]
    fn test_no_isolated_flag_wins_over_config() {
        let mut global = GlobalConfig::default();
        global.isolated.enabled = true;
        let flags = RunFlags {
            isolated: IsolatedPreference::Deny,
            ..RunFlags::default()
        };
        let ctx = context(flags, false, true);
        let selection = select_mode(&module(false, true), &global, &ctx);
        assert_eq!(selection.mode, ExecutionMode::Direct);
    }

    #[test]
    fn test_everything_missing_runs_direct_with_two_fallbacks() {
        let mut global = GlobalConfig::default();
        global.container.enabled = true;
        global.isolated.enabled = true;
        let ctx = context(RunFlags::default(), false, false);
        let selection = select_mode(&module(true, true), &global, &ctx);
        assert_eq!(selection.mode, ExecutionMode::Direct);
        assert_eq!(selection.fallbacks.len(), 2);
    }
}
