use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const INSTALL: &str = r#"echo "$TOOLRIG_MODULE" >> "$TOOLRIG_ROOT/installs.log"
touch "$TOOLRIG_ROOT/$TOOLRIG_MODULE.installed"
"#;
const GROVEL: &str = r#"test -f "$TOOLRIG_ROOT/$TOOLRIG_MODULE.installed""#;
const REMOVE: &str = r#"rm -f "$TOOLRIG_ROOT/$TOOLRIG_MODULE.installed""#;
const VERIFY: &str = "exit 0\n";

fn write_module(root: &Path, name: &str, document: serde_json::Value, scripts: &[(&str, &str)]) {
    let dir = root.join("modules").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("module.json"), document.to_string()).unwrap();
    for (stage, body) in scripts {
        fs::write(dir.join(format!("{stage}.sh")), body).unwrap();
    }
}

fn standard_scripts() -> Vec<(&'static str, &'static str)> {
    vec![
        ("install", INSTALL),
        ("grovel", GROVEL),
        ("remove", REMOVE),
        ("verify", VERIFY),
    ]
}

fn setup(config: serde_json::Value) -> TempDir {
    let dir = tempdir().unwrap();
    let mut config = config;
    config["shell"] = serde_json::json!({
        "rc_file": dir.path().join(".bashrc").to_string_lossy()
    });
    fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
    dir
}

fn toolrig(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("toolrig").unwrap();
    cmd.arg("--root")
        .arg(dir.path())
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--platform")
        .arg("linux")
        .arg("--no-isolated")
        .env_remove("RUST_LOG");
    cmd
}

/// Stdout of a successful run with color codes removed.
fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    let ansi = regex::Regex::new(r"\x1b\[[0-9;]*m").unwrap();
    ansi.replace_all(&String::from_utf8_lossy(&output), "").to_string()
}

fn installs(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("installs.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_install_twice_runs_install_once() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());

    toolrig(&dir).args(["install", "git"]).assert().success();
    toolrig(&dir).args(["install", "git"]).assert().success();

    assert_eq!(installs(&dir), vec!["git"]);
    assert!(dir.path().join("data").join("state").join("git.toml").exists());
}

#[test]
fn test_force_reinstalls() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());

    toolrig(&dir).args(["install", "git"]).assert().success();
    toolrig(&dir).args(["install", "git", "--force"]).assert().success();

    assert_eq!(installs(&dir), vec!["git", "git"]);
}

#[test]
fn test_list_follows_explicit_order_then_runlevel() {
    let dir = setup(serde_json::json!({ "modules": { "order": ["c", "a"], "critical": [] } }));
    write_module(dir.path(), "a", serde_json::json!({ "runlevel": 10 }), &standard_scripts());
    write_module(dir.path(), "b", serde_json::json!({ "runlevel": 5 }), &standard_scripts());
    write_module(dir.path(), "c", serde_json::json!({ "runlevel": 20 }), &standard_scripts());

    let output = stdout(toolrig(&dir).arg("list"));
    let order: Vec<&str> = output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    assert_eq!(order, vec!["c", "a", "b"], "unexpected plan:\n{output}");
    assert!(output.contains("runlevel 10  direct"));
}

#[test]
fn test_critical_failure_aborts_with_non_zero_exit() {
    let dir = setup(serde_json::json!({
        "modules": { "order": ["shell", "git"], "critical": ["shell"] }
    }));
    write_module(
        dir.path(),
        "shell",
        serde_json::json!({}),
        &[("install", "exit 3\n"), ("verify", VERIFY)],
    );
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());

    toolrig(&dir).arg("install").assert().failure().code(1);
    assert!(installs(&dir).is_empty());
}

#[test]
fn test_non_critical_failure_exits_zero() {
    let dir = setup(serde_json::json!({ "modules": { "order": ["fonts", "git"], "critical": [] } }));
    write_module(
        dir.path(),
        "fonts",
        serde_json::json!({}),
        &[("install", "exit 3\n"), ("verify", VERIFY)],
    );
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());

    toolrig(&dir).arg("install").assert().success();
    assert_eq!(installs(&dir), vec!["git"]);
}

#[test]
fn test_dry_run_changes_nothing() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    let dotfile = dir.path().join(".gitconfig");
    fs::write(&dotfile, "[user]\n").unwrap();
    write_module(
        dir.path(),
        "git",
        serde_json::json!({
            "backup": { "paths": [dotfile.to_string_lossy()] },
            "shell": { "aliases": { "vcs": { "gs": "git status" } } }
        }),
        &standard_scripts(),
    );

    toolrig(&dir).args(["install", "--dry-run"]).assert().success();

    assert!(installs(&dir).is_empty());
    assert!(!dir.path().join("data").exists());
    assert!(!dir.path().join(".bashrc").exists());
}

#[test]
fn test_install_writes_aliases_and_remove_clears_them() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    fs::write(dir.path().join(".bashrc"), "set -o vi\n").unwrap();
    write_module(
        dir.path(),
        "git",
        serde_json::json!({ "shell": { "aliases": { "vcs": { "gs": "git status" } } } }),
        &standard_scripts(),
    );

    toolrig(&dir).args(["install", "git"]).assert().success();
    let rc = fs::read_to_string(dir.path().join(".bashrc")).unwrap();
    assert!(rc.contains("# >>> toolrig:git:vcs >>>"));
    assert!(rc.contains("alias gs='git status'"));

    toolrig(&dir).args(["remove", "git"]).assert().success();
    assert_eq!(fs::read_to_string(dir.path().join(".bashrc")).unwrap(), "set -o vi\n");
}

#[test]
fn test_backup_restore_round_trip() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    let dotfile = dir.path().join(".gitconfig");
    fs::write(&dotfile, "[user]\n  name = before\n").unwrap();
    write_module(
        dir.path(),
        "git",
        serde_json::json!({ "backup": { "paths": [dotfile.to_string_lossy()] } }),
        &standard_scripts(),
    );

    toolrig(&dir).args(["backup", "git"]).assert().success();
    fs::write(&dotfile, "[user]\n  name = after\n").unwrap();
    toolrig(&dir).args(["restore", "git"]).assert().success();

    assert_eq!(fs::read_to_string(&dotfile).unwrap(), "[user]\n  name = before\n");
}

#[test]
fn test_restore_without_backups_reports_failure() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());

    let output = stdout(toolrig(&dir).args(["restore", "git"]));
    assert!(output.contains("failed"));
    assert!(output.contains("no backups to restore"));
}

#[test]
fn test_status_reports_installed_modules() {
    let dir = setup(serde_json::json!({ "modules": { "critical": [] } }));
    write_module(dir.path(), "git", serde_json::json!({}), &standard_scripts());
    write_module(dir.path(), "node", serde_json::json!({}), &standard_scripts());

    toolrig(&dir).args(["install", "git"]).assert().success();
    let output = stdout(toolrig(&dir).arg("status"));
    assert!(output.contains("git: installed since"));
    assert!(output.contains("node: not installed"));
}

#[test]
fn test_broken_config_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.json"), "{ not json").unwrap();
    toolrig(&dir).arg("list").assert().failure();
}

#[test]
fn test_no_modules() {
    let dir = setup(serde_json::json!({}));
    let output = stdout(toolrig(&dir).arg("install"));
    assert!(output.contains("No modules to process"));
}

#[test]
fn test_relative_root_and_data_dir() {
    let dir = tempdir().unwrap();
    let rig = dir.path().join("rig");
    fs::create_dir_all(&rig).unwrap();
    let config = serde_json::json!({
        "modules": { "critical": [] },
        "shell": { "rc_file": dir.path().join(".bashrc").to_string_lossy() }
    });
    fs::write(rig.join("config.json"), config.to_string()).unwrap();
    write_module(&rig, "git", serde_json::json!({}), &standard_scripts());

    let mut cmd = Command::cargo_bin("toolrig").unwrap();
    cmd.current_dir(dir.path())
        .args(["--root", "rig", "--data-dir", "data", "--platform", "linux", "--no-isolated"])
        .args(["install", "git"])
        .env_remove("RUST_LOG");
    let output = stdout(&mut cmd);

    assert!(output.contains("install git: ok"), "unexpected output:\n{output}");
    assert!(rig.join("git.installed").exists());
    assert!(dir.path().join("data").join("state").join("git.toml").exists());
}
