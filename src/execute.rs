use std::path::PathBuf;
use std::time::SystemTime;
use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{debug, info};

use toolrig::backup::BackupManager;
use toolrig::config::{discover_modules, EffectiveConfig, GlobalConfig, Resolver, GLOBAL_DOCUMENT};
use toolrig::context::ExecutionContext;
use toolrig::dispatcher::{Action, Dispatcher, Outcome};
use toolrig::global::utils::get_global_data_dir;
use toolrig::mode::select_mode;
use toolrig::module::ModuleRegistry;
use toolrig::planner::{Plan, Planner};
use toolrig::state::{InstallStatus, StateStore};
use toolrig::util::current_platform;
use crate::cli::{GlobalOptions, ToolrigCommand, CLI};

/// Everything loaded before a command runs.
struct Session {
    ctx: ExecutionContext,
    global: GlobalConfig,
    modules: Vec<EffectiveConfig>,
    registry: ModuleRegistry,
}

impl Session {
    fn load(options: &GlobalOptions) -> Result<Session> {
        // stages run from their module directory, so relative paths must not leak into them
        let root = match &options.root {
            Some(root) => std::path::absolute(root)
                .with_context(|| format!("Cannot resolve root {}", root.display()))?,
            None => std::env::current_dir()?,
        };
        let data_dir = match &options.data_dir {
            Some(dir) => std::path::absolute(dir)
                .with_context(|| format!("Cannot resolve data dir {}", dir.display()))?,
            None => get_global_data_dir()?,
        };
        let platform = options.platform.clone().unwrap_or_else(current_platform);
        let ctx = ExecutionContext::new(&root, &data_dir, &platform, options.run_flags());
        debug!("Execution context: {:?}", ctx);

        let config_path: PathBuf = root.join(GLOBAL_DOCUMENT);
        let global = GlobalConfig::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;

        let descriptors = discover_modules(ctx.modules_dir())?;
        let resolver = Resolver::new(&global, &platform);
        let modules = descriptors.iter().map(|d| resolver.effective(d)).collect();
        let registry = ModuleRegistry::from_descriptors(&descriptors);
        Ok(Session {
            ctx,
            global,
            modules,
            registry,
        })
    }

    fn plan(&self, requested: &[String]) -> Plan {
        let planner = Planner::new(&self.global, &self.ctx.platform, &self.modules);
        let plan = planner.plan(requested);
        planner.validate_dependencies(&plan);
        plan
    }
}

/// Runs one command and returns the process exit code.
pub fn execute(cli: CLI) -> Result<i32> {
    let session = Session::load(&cli.options)?;
    let plan = session.plan(cli.command.modules());
    if plan.modules.is_empty() {
        println!("No modules to process");
        return Ok(0);
    }

    match &cli.command {
        ToolrigCommand::List { .. } => {
            execute_list(&session, &plan);
            Ok(0)
        }
        ToolrigCommand::Status { .. } => {
            execute_status(&session, &plan);
            Ok(0)
        }
        ToolrigCommand::Prune { .. } => {
            execute_prune(&session, &plan);
            Ok(0)
        }
        command => match command.action() {
            Some(action) => execute_action(&session, &action, &plan),
            None => Ok(0),
        },
    }
}

fn execute_action(session: &Session, action: &Action, plan: &Plan) -> Result<i32> {
    let dispatcher = Dispatcher::new(&session.ctx, &session.global, &session.registry)?;
    info!("Running {} for {} module(s)", action, plan.modules.len());
    let report = dispatcher.run(action, plan);
    let prefix = if session.ctx.is_dry_run() { "[dry-run] " } else { "" };
    for module in &report.modules {
        let outcome = match &module.outcome {
            Outcome::Succeeded => "ok".green().to_string(),
            Outcome::Skipped(reason) => format!("{} ({})", "skipped".yellow(), reason),
            Outcome::Failed(reason) => format!("{} ({})", "failed".red(), reason),
        };
        println!("{}{} {}: {} [{}]", prefix, action, module.module, outcome, module.mode);
        if let Some(id) = &module.backup {
            println!("   backup: {}", id);
        }
    }
    if let Some(module) = &report.aborted_by {
        println!("{}", format!("Aborted: critical module {} failed", module).red().bold());
    }
    Ok(report.exit_code())
}

fn execute_list(session: &Session, plan: &Plan) {
    for module in &plan.modules {
        let selection = select_mode(module, &session.global, &session.ctx);
        let critical = if session.global.is_critical(&module.name) {
            " (critical)"
        } else {
            ""
        };
        println!(
            "{}  runlevel {}  {}{}",
            module.name.bold(),
            module.runlevel,
            selection.mode,
            critical
        );
        if !module.dependencies.is_empty() {
            println!("   depends on: {}", module.dependencies.join(", "));
        }
    }
}

fn execute_status(session: &Session, plan: &Plan) {
    let state = StateStore::new(session.ctx.data.state_dir());
    let backups = BackupManager::new(session.ctx.data.backups_dir());
    for module in &plan.modules {
        let status = match state.latest(&module.name) {
            Some(record) => match record.status {
                InstallStatus::Installed => {
                    format!("{} since {}", "installed".green(), record.timestamp)
                }
                InstallStatus::Absent => format!("{} since {}", "absent".yellow(), record.timestamp),
            },
            None => "not installed".dimmed().to_string(),
        };
        println!("{}: {}", module.name.bold(), status);
        match backups.latest(&module.name) {
            Some(set) => println!(
                "   latest backup: {} ({} file(s))",
                set.id(),
                set.manifest.entries.len()
            ),
            None => println!("   no backups"),
        }
    }
}

fn execute_prune(session: &Session, plan: &Plan) {
    let backups = BackupManager::new(session.ctx.data.backups_dir());
    let retention = session.global.backup.retention_days;
    for module in &plan.modules {
        if session.ctx.is_dry_run() {
            println!("[dry-run] would prune backups of {} older than {} day(s)", module.name, retention);
            continue;
        }
        let report = backups.prune(&module.name, retention, SystemTime::now());
        for id in &report.removed {
            println!("{}: removed backup {}", module.name, id);
        }
        for id in &report.failed {
            println!("{}: {}", module.name, format!("could not remove backup {}", id).red());
        }
    }
}
