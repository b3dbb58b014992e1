//! Builds and runs stage subprocesses for each execution mode.
//!
//! Stage scripts run to completion; there is no timeout at this layer.

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{Result, ToolrigError};
use crate::mode::ExecutionMode;
use crate::module::{Stage, StageContext};

/// Mount point of the module directory inside the container.
const CONTAINER_MODULE_DIR: &str = "/toolrig/module";

fn stage_env(cx: &StageContext, stage: Stage) -> Vec<(String, String)> {
    vec![
        ("TOOLRIG_MODULE".to_string(), cx.module.name.clone()),
        ("TOOLRIG_STAGE".to_string(), stage.to_string()),
        ("TOOLRIG_MODE".to_string(), cx.mode.to_string()),
        ("TOOLRIG_PLATFORM".to_string(), cx.ctx.platform.clone()),
        (
            "TOOLRIG_ROOT".to_string(),
            cx.ctx.root_dir.to_string_lossy().to_string(),
        ),
        (
            "TOOLRIG_DATA_DIR".to_string(),
            cx.ctx.data.root().to_string_lossy().to_string(),
        ),
        (
            "TOOLRIG_FORCE".to_string(),
            if cx.ctx.flags.force { "1" } else { "0" }.to_string(),
        ),
    ]
}

/// Builds the command that runs `script` for `stage` under the selected mode.
pub fn stage_command(cx: &StageContext, stage: Stage, script: &Path) -> Command {
    let env = stage_env(cx, stage);
    // every mode runs inside the module directory, so the script is named relative to it
    let file_name = script
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    match cx.mode {
        ExecutionMode::Direct => {
            let mut command = Command::new("sh");
            command.arg(&file_name).current_dir(&cx.module.dir);
            command.envs(env);
            command
        }
        ExecutionMode::Isolated => {
            // the isolated environment does not inherit our variables, pass them through env(1)
            let mut command = Command::new(&cx.global.isolated.runtime);
            command.arg("--").arg("env");
            for (key, value) in &env {
                command.arg(format!("{key}={value}"));
            }
            command.arg("sh").arg(&file_name).current_dir(&cx.module.dir);
            command
        }
        ExecutionMode::Containerized => {
            let mut command = Command::new(&cx.global.container.runtime);
            command
                .arg("run")
                .arg("--rm")
                .arg("-v")
                .arg(format!("{}:{}", cx.module.dir.display(), CONTAINER_MODULE_DIR))
                .arg("-w")
                .arg(CONTAINER_MODULE_DIR);
            for (key, value) in &env {
                command.arg("-e").arg(format!("{key}={value}"));
            }
            command
                .arg(&cx.global.container.image)
                .arg("sh")
                .arg(format!("{CONTAINER_MODULE_DIR}/{file_name}"));
            command
        }
    }
}

/// Runs a stage script and fails on a non-zero exit.
pub fn run_stage(cx: &StageContext, stage: Stage, script: &Path) -> Result<()> {
    let mut command = stage_command(cx, stage, script);
    debug!("{}: running {} stage: {:?}", cx.module.name, stage, command);
    let status = command.stdin(Stdio::null()).status().map_err(|e| {
        ToolrigError::stage_failed(&cx.module.name, stage, format!("cannot start: {e}"))
    })?;
    if !status.success() {
        let reason = match status.code() {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        };
        return Err(ToolrigError::stage_failed(&cx.module.name, stage, reason));
    }
    Ok(())
}

/// Runs a check script; exit status 0 means healthy.
pub fn run_check(cx: &StageContext, stage: Stage, script: &Path) -> Result<bool> {
    let mut command = stage_command(cx, stage, script);
    debug!("{}: running {} check: {:?}", cx.module.name, stage, command);
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .map_err(|e| {
            ToolrigError::stage_failed(&cx.module.name, stage, format!("cannot start: {e}"))
        })?;
    Ok(status.success())
}
