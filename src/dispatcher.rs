//! Drives each planned module through its stages for one action.
//!
//! Modules are processed strictly one after another. A failing module is recorded and the run
//! moves on, unless the module is critical, in which case the rest of the plan is abandoned.
//! A dry run walks the same decisions and only logs the mutations it would make.

use std::fmt;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::alias::{render_aliases, AliasManager};
use crate::backup::{resolve_backup_paths, BackupManager};
use crate::config::{EffectiveConfig, GlobalConfig};
use crate::context::ExecutionContext;
use crate::error::{Result, ToolrigError};
use crate::lifecycle::{Activity, Completion, ModuleLifecycle, ModulePhase, Presence};
use crate::mode::{select_mode, ExecutionMode};
use crate::module::{run_module_stage, Module, ModuleRegistry, Stage, StageContext};
use crate::planner::Plan;
use crate::state::{InstallStatus, StateStore};
use crate::util::expand_placeholders;

/// What the run does to each planned module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Install,
    Remove,
    Verify,
    Info,
    Update,
    Backup,
    Restore { id: Option<String> },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Install => "install",
            Action::Remove => "remove",
            Action::Verify => "verify",
            Action::Info => "info",
            Action::Update => "update",
            Action::Backup => "backup",
            Action::Restore { .. } => "restore",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReport {
    pub module: String,
    pub mode: ExecutionMode,
    pub outcome: Outcome,
    pub phase: ModulePhase,
    /// Backup set created for this module during the run.
    pub backup: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub modules: Vec<ModuleReport>,
    /// The critical module whose failure aborted the run.
    pub aborted_by: Option<String>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|report| report.outcome.is_failure())
    }

    /// Non-zero only when a critical module aborted the run.
    pub fn exit_code(&self) -> i32 {
        if self.aborted_by.is_some() { 1 } else { 0 }
    }
}

pub struct Dispatcher<'a> {
    ctx: &'a ExecutionContext,
    global: &'a GlobalConfig,
    registry: &'a ModuleRegistry,
    state: StateStore,
    backups: BackupManager,
    aliases: AliasManager,
}

impl<'a> Dispatcher<'a> {
    /// # Errors
    /// Returns [`ToolrigError::Config`] if `shell.rc_file` has unresolvable placeholders.
    pub fn new(
        ctx: &'a ExecutionContext,
        global: &'a GlobalConfig,
        registry: &'a ModuleRegistry,
    ) -> Result<Self> {
        let rc_file = expand_placeholders(&global.shell.rc_file, &ctx.variables(""))
            .ok_or_else(|| {
                ToolrigError::config(format!(
                    "cannot resolve shell.rc_file {}",
                    global.shell.rc_file
                ))
            })?;
        Ok(Self {
            ctx,
            global,
            registry,
            state: StateStore::new(ctx.data.state_dir()),
            backups: BackupManager::new(ctx.data.backups_dir()),
            aliases: AliasManager::new(rc_file, ctx.is_dry_run()),
        })
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    /// Runs `action` over every module of `plan`, in order.
    pub fn run(&self, action: &Action, plan: &Plan) -> RunReport {
        let mut report = RunReport::default();
        if !self.ctx.is_dry_run() {
            if let Err(e) = self.ctx.data.ensure() {
                warn!("Could not create data directory {}: {}", self.ctx.data.root().display(), e);
            }
        }

        for module in &plan.modules {
            let module_report = self.run_module(action, module);
            if let Outcome::Failed(reason) = &module_report.outcome {
                if self.global.is_critical(&module.name) {
                    let err = ToolrigError::CriticalModule {
                        module: module.name.clone(),
                        reason: reason.clone(),
                    };
                    error!("{}, aborting the run", err);
                    report.aborted_by = Some(module.name.clone());
                    report.modules.push(module_report);
                    break;
                }
                error!("{}: {} failed: {}", module.name, action, reason);
            }
            report.modules.push(module_report);
        }
        report
    }

    fn run_module(&self, action: &Action, module: &EffectiveConfig) -> ModuleReport {
        let mut lifecycle = ModuleLifecycle::new(&module.name);
        let selection = select_mode(module, self.global, self.ctx);
        let cx = StageContext::new(module, selection.mode, self.global, self.ctx);
        let mut backup = None;

        let result = match self.registry.get(&module.name) {
            Some(implementation) => match action {
                Action::Install => self.install(implementation, &cx, &mut lifecycle, &mut backup),
                Action::Remove => self.remove(implementation, &cx, &mut lifecycle, &mut backup),
                Action::Verify => self.verify(implementation, &cx, &mut lifecycle),
                Action::Info => self.info(implementation, &cx, &mut lifecycle),
                Action::Update => self.update(implementation, &cx, &mut lifecycle, &mut backup),
                Action::Backup => self.backup(&cx, &mut lifecycle, &mut backup),
                Action::Restore { id } => self.restore(&cx, id.as_deref(), &mut lifecycle),
            },
            None => Err(ToolrigError::UnknownModule(module.name.clone())),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                lifecycle.fail();
                Outcome::Failed(e.to_string())
            }
        };
        debug!("{}: {} finished in phase {}", module.name, action, lifecycle.phase());
        ModuleReport {
            module: module.name.clone(),
            mode: selection.mode,
            outcome,
            phase: lifecycle.phase(),
            backup,
        }
    }

    fn check(&self, name: &str, lifecycle: &mut ModuleLifecycle) -> Result<bool> {
        let installed = self.state.is_installed(name);
        let presence = if installed {
            Presence::Installed
        } else {
            Presence::Missing
        };
        lifecycle.transition(ModulePhase::Checked(presence))?;
        Ok(installed)
    }

    /// Runs grovel. A module without one counts as healthy.
    fn grovel(&self, module: &dyn Module, cx: &StageContext) -> Result<bool> {
        match module.grovel(cx) {
            Ok(healthy) => Ok(healthy),
            Err(e) if e.is_not_implemented() => {
                warn!("{}, treating it as healthy", e);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Invokes `stage`, applying the missing-stage and dry-run policies.
    fn invoke(&self, module: &dyn Module, stage: Stage, cx: &StageContext) -> Result<()> {
        let name = &cx.module.name;
        if !module.implements(stage) {
            let err = ToolrigError::not_implemented(name, stage);
            if stage.is_required() {
                return Err(err);
            }
            warn!("{}, nothing to do", err);
            return Ok(());
        }
        if stage.is_mutating() && self.ctx.is_dry_run() {
            info!("[dry-run] would run {} stage of {} ({} mode)", stage, name, cx.mode);
            return Ok(());
        }
        info!("{}: running {} ({} mode)", name, stage, cx.mode);
        match run_module_stage(module, stage, cx) {
            Err(e) if e.is_not_implemented() && !stage.is_required() => {
                warn!("{}, nothing to do", e);
                Ok(())
            }
            other => other,
        }
    }

    /// Runs verify after an install stage.
    ///
    /// A dry run installs nothing, so it only checks that the module has a verify stage.
    fn confirm_install(&self, module: &dyn Module, cx: &StageContext) -> Result<()> {
        if !self.ctx.is_dry_run() {
            return self.invoke(module, Stage::Verify, cx);
        }
        if !module.implements(Stage::Verify) {
            return Err(ToolrigError::not_implemented(&cx.module.name, Stage::Verify));
        }
        info!("[dry-run] would run verify stage of {} ({} mode)", cx.module.name, cx.mode);
        Ok(())
    }

    /// Snapshots the module's backup paths before a mutating stage.
    ///
    /// Returns the new set id, or `None` when nothing was written (dry run, no paths, or a
    /// tolerated failure).
    fn snapshot(&self, module: &EffectiveConfig) -> Result<Option<String>> {
        let paths = resolve_backup_paths(module, self.ctx);
        if paths.is_empty() {
            debug!("{}: no backup paths declared", module.name);
            return Ok(None);
        }
        if self.ctx.is_dry_run() {
            info!("[dry-run] would back up {} path(s) of {}", paths.len(), module.name);
            return Ok(None);
        }
        match self.backups.snapshot(&module.name, &paths) {
            Ok(set) => Ok(Some(set.id().to_string())),
            Err(e) if self.global.backup.tolerate_failures => {
                error!("{}; continuing without a backup", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn record(&self, name: &str, status: InstallStatus) -> Result<()> {
        if self.ctx.is_dry_run() {
            info!("[dry-run] would record {} as {:?}", name, status);
            return Ok(());
        }
        self.state.record(name, status)?;
        Ok(())
    }

    fn prune(&self, name: &str) {
        if self.ctx.is_dry_run() {
            return;
        }
        let report = self
            .backups
            .prune(name, self.global.backup.retention_days, SystemTime::now());
        if !report.removed.is_empty() {
            debug!("{}: pruned {} old backup(s)", name, report.removed.len());
        }
    }

    /// Rewrites the module's alias blocks and drops blocks of categories it no longer declares.
    fn write_aliases(&self, module: &EffectiveConfig) -> Result<()> {
        for category in self.aliases.block_categories(&module.name)? {
            let declared = category
                .as_deref()
                .is_some_and(|c| module.aliases.contains_key(c));
            if !declared {
                self.aliases.remove_block(&module.name, category.as_deref())?;
            }
        }
        for (category, aliases) in &module.aliases {
            self.aliases
                .upsert_block(&module.name, Some(category.as_str()), &render_aliases(aliases))?;
        }
        Ok(())
    }

    fn install(
        &self,
        module: &dyn Module,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
        backup: &mut Option<String>,
    ) -> Result<Outcome> {
        let name = &cx.module.name;
        let installed = self.check(name, lifecycle)?;
        if installed && !self.ctx.flags.force {
            if self.grovel(module, cx)? {
                info!("{} is already installed", name);
                lifecycle.transition(ModulePhase::Done(Completion::Skipped))?;
                return Ok(Outcome::Skipped("already installed".to_string()));
            }
            info!("{} is recorded as installed but grovel reports a problem, reinstalling", name);
        }

        lifecycle.transition(ModulePhase::Active(Activity::Installing))?;
        *backup = self.snapshot(cx.module)?;
        self.invoke(module, Stage::Install, cx)?;
        self.confirm_install(module, cx)?;
        self.write_aliases(cx.module)?;
        self.record(name, InstallStatus::Installed)?;
        self.prune(name);
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn remove(
        &self,
        module: &dyn Module,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
        backup: &mut Option<String>,
    ) -> Result<Outcome> {
        let name = &cx.module.name;
        self.check(name, lifecycle)?;
        lifecycle.transition(ModulePhase::Active(Activity::Removing))?;
        *backup = self.snapshot(cx.module)?;
        self.invoke(module, Stage::Remove, cx)?;
        self.aliases.remove_module_blocks(name)?;
        self.record(name, InstallStatus::Absent)?;
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn verify(
        &self,
        module: &dyn Module,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
    ) -> Result<Outcome> {
        self.check(&cx.module.name, lifecycle)?;
        lifecycle.transition(ModulePhase::Active(Activity::Verifying))?;
        self.invoke(module, Stage::Verify, cx)?;
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn info(
        &self,
        module: &dyn Module,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
    ) -> Result<Outcome> {
        self.check(&cx.module.name, lifecycle)?;
        lifecycle.transition(ModulePhase::Active(Activity::Inspecting))?;
        self.invoke(module, Stage::Info, cx)?;
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn update(
        &self,
        module: &dyn Module,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
        backup: &mut Option<String>,
    ) -> Result<Outcome> {
        let name = &cx.module.name;
        let installed = self.check(name, lifecycle)?;
        if !installed && !self.ctx.flags.force {
            info!("{} is not installed, nothing to update", name);
            lifecycle.transition(ModulePhase::Done(Completion::Skipped))?;
            return Ok(Outcome::Skipped("not installed".to_string()));
        }
        lifecycle.transition(ModulePhase::Active(Activity::Updating))?;
        *backup = self.snapshot(cx.module)?;
        self.invoke(module, Stage::Update, cx)?;
        self.prune(name);
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn backup(
        &self,
        cx: &StageContext,
        lifecycle: &mut ModuleLifecycle,
        backup: &mut Option<String>,
    ) -> Result<Outcome> {
        self.check(&cx.module.name, lifecycle)?;
        if cx.module.backup_paths.is_empty() {
            lifecycle.transition(ModulePhase::Done(Completion::Skipped))?;
            return Ok(Outcome::Skipped("no backup paths".to_string()));
        }
        lifecycle.transition(ModulePhase::Active(Activity::BackingUp))?;
        *backup = self.snapshot(cx.module)?;
        self.prune(&cx.module.name);
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }

    fn restore(
        &self,
        cx: &StageContext,
        id: Option<&str>,
        lifecycle: &mut ModuleLifecycle,
    ) -> Result<Outcome> {
        let name = &cx.module.name;
        self.check(name, lifecycle)?;
        lifecycle.transition(ModulePhase::Active(Activity::Restoring))?;
        let report = self.backups.restore(name, id, self.ctx.is_dry_run())?;
        info!("{}: restored {} file(s) from backup {}", name, report.restored.len(), report.id);
        lifecycle.transition(ModulePhase::Done(Completion::Success))?;
        Ok(Outcome::Succeeded)
    }
}
