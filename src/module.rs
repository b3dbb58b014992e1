//! Pluggable modules and their stages.
//!
//! A module is anything implementing [`Module`]. The engine ships [`ScriptModule`], which maps
//! each stage to an optional `<stage>.sh` next to the module's `module.json`; other
//! implementations can be registered by name in a [`ModuleRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::config::{EffectiveConfig, GlobalConfig, ModuleDescriptor};
use crate::context::ExecutionContext;
use crate::error::{Result, ToolrigError};
use crate::mode::ExecutionMode;
use crate::runner::{run_check, run_stage};

/// The capability set of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Grovel,
    Install,
    Remove,
    Verify,
    Info,
    Update,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Grovel,
        Stage::Install,
        Stage::Remove,
        Stage::Verify,
        Stage::Info,
        Stage::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Grovel => "grovel",
            Stage::Install => "install",
            Stage::Remove => "remove",
            Stage::Verify => "verify",
            Stage::Info => "info",
            Stage::Update => "update",
        }
    }

    /// Install and verify must be implemented; a missing one fails the module.
    pub fn is_required(self) -> bool {
        matches!(self, Stage::Install | Stage::Verify)
    }

    /// Stages that change the host. They are only logged during a dry run.
    pub fn is_mutating(self) -> bool {
        matches!(self, Stage::Install | Stage::Remove | Stage::Update)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a stage needs to run one module.
pub struct StageContext<'a> {
    pub module: &'a EffectiveConfig,
    pub mode: ExecutionMode,
    pub global: &'a GlobalConfig,
    pub ctx: &'a ExecutionContext,
}

impl<'a> StageContext<'a> {
    pub fn new(
        module: &'a EffectiveConfig,
        mode: ExecutionMode,
        global: &'a GlobalConfig,
        ctx: &'a ExecutionContext,
    ) -> Self {
        Self {
            module,
            mode,
            global,
            ctx,
        }
    }
}

/// One developer tool's install/remove/verify logic.
///
/// Every stage defaults to [`ToolrigError::StageNotImplemented`]; implementors override the
/// stages they support and report them through [`Module::implements`].
pub trait Module {
    fn name(&self) -> &str;

    fn implements(&self, stage: Stage) -> bool;

    /// Returns whether the tool is already correctly installed.
    fn grovel(&self, _cx: &StageContext) -> Result<bool> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Grovel))
    }

    fn install(&self, _cx: &StageContext) -> Result<()> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Install))
    }

    fn remove(&self, _cx: &StageContext) -> Result<()> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Remove))
    }

    fn verify(&self, _cx: &StageContext) -> Result<()> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Verify))
    }

    fn info(&self, _cx: &StageContext) -> Result<()> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Info))
    }

    fn update(&self, _cx: &StageContext) -> Result<()> {
        Err(ToolrigError::not_implemented(self.name(), Stage::Update))
    }
}

/// Runs one non-grovel stage of `module`.
pub fn run_module_stage(module: &dyn Module, stage: Stage, cx: &StageContext) -> Result<()> {
    match stage {
        Stage::Grovel => module.grovel(cx).map(|_| ()),
        Stage::Install => module.install(cx),
        Stage::Remove => module.remove(cx),
        Stage::Verify => module.verify(cx),
        Stage::Info => module.info(cx),
        Stage::Update => module.update(cx),
    }
}

/// A module whose stages are shell scripts in its directory.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    name: String,
    dir: PathBuf,
}

impl ScriptModule {
    pub fn new(name: &str, dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            dir,
        }
    }

    pub fn script(&self, stage: Stage) -> Option<PathBuf> {
        let path = self.dir.join(format!("{}.sh", stage.as_str()));
        path.is_file().then_some(path)
    }

    fn run(&self, stage: Stage, cx: &StageContext) -> Result<()> {
        let script = self
            .script(stage)
            .ok_or_else(|| ToolrigError::not_implemented(&self.name, stage))?;
        run_stage(cx, stage, &script)
    }
}

impl Module for ScriptModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn implements(&self, stage: Stage) -> bool {
        self.script(stage).is_some()
    }

    fn grovel(&self, cx: &StageContext) -> Result<bool> {
        let script = self
            .script(Stage::Grovel)
            .ok_or_else(|| ToolrigError::not_implemented(&self.name, Stage::Grovel))?;
        run_check(cx, Stage::Grovel, &script)
    }

    fn install(&self, cx: &StageContext) -> Result<()> {
        self.run(Stage::Install, cx)
    }

    fn remove(&self, cx: &StageContext) -> Result<()> {
        self.run(Stage::Remove, cx)
    }

    fn verify(&self, cx: &StageContext) -> Result<()> {
        self.run(Stage::Verify, cx)
    }

    fn info(&self, cx: &StageContext) -> Result<()> {
        self.run(Stage::Info, cx)
    }

    fn update(&self, cx: &StageContext) -> Result<()> {
        self.run(Stage::Update, cx)
    }
}

/// Module implementations keyed by module name.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Box<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a [`ScriptModule`] for every descriptor.
    pub fn from_descriptors(descriptors: &[ModuleDescriptor]) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(Box::new(ScriptModule::new(
                &descriptor.name,
                descriptor.dir.clone(),
            )));
        }
        registry
    }

    /// Adds or replaces the implementation registered under the module's name.
    pub fn register(&mut self, module: Box<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Module> {
        self.modules.get(name).map(|module| module.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}
