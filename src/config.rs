//! Global and per-module configuration documents, and the resolver that merges them.
//!
//! Values are resolved with the precedence platform subtree > module subtree >
//! global `modules.defaults` > caller default. JSON `null` and `""` are treated as absent
//! while falling back, so a module cannot pin a value to empty string or null.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, ToolrigError};

/// Name of the per-module configuration document inside a module directory.
pub const MODULE_DOCUMENT: &str = "module.json";
/// Name of the global configuration document inside the root directory.
pub const GLOBAL_DOCUMENT: &str = "config.json";
/// Runlevel used when neither the module nor the global defaults declare one.
pub const DEFAULT_RUNLEVEL: i64 = 50;

/// The global configuration document (`config.json`).
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    pub modules: ModulesSection,
    pub container: ContainerSection,
    pub isolated: IsolatedSection,
    pub platforms: HashMap<String, PlatformSection>,
    pub backup: BackupSection,
    pub shell: ShellSection,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModulesSection {
    /// Explicit module order. Modules not listed run afterwards by runlevel.
    pub order: Vec<String>,
    /// Global defaults for per-module keys, e.g. `{"runlevel": 20}`.
    pub defaults: Map<String, Value>,
    /// Modules whose failure aborts the whole run.
    pub critical: Vec<String>,
}

impl Default for ModulesSection {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            defaults: Map::new(),
            critical: vec!["shell".to_string(), "git".to_string()],
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ContainerSection {
    pub enabled: bool,
    /// Container runtime binary, e.g. `docker` or `podman`.
    pub runtime: String,
    pub image: String,
    pub modules: HashMap<String, ContainerModule>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            runtime: "docker".to_string(),
            image: "ubuntu:24.04".to_string(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ContainerModule {
    pub containerize: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IsolatedSection {
    pub enabled: bool,
    /// Launcher for the isolated shell environment, e.g. `wsl`.
    pub runtime: String,
    /// Modules that prefer to run inside the isolated environment.
    pub modules: Vec<String>,
}

impl Default for IsolatedSection {
    fn default() -> Self {
        Self {
            enabled: false,
            runtime: "wsl".to_string(),
            modules: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PlatformSection {
    pub modules: PlatformModules,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PlatformModules {
    pub order: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BackupSection {
    pub retention_days: u64,
    /// Let installs proceed when the pre-install snapshot fails.
    pub tolerate_failures: bool,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            retention_days: 30,
            tolerate_failures: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShellSection {
    /// Shell startup file that receives alias blocks. May contain placeholders.
    pub rc_file: String,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            rc_file: "${HOME}/.bashrc".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Loads the global configuration document.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns [`ToolrigError::Config`] if the file exists but cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<GlobalConfig> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No global configuration at {}, using defaults", path.display());
            return Ok(GlobalConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ToolrigError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ToolrigError::config(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// The order list that applies on `platform`: the platform list if it is non-empty,
    /// otherwise the global one.
    pub fn module_order(&self, platform: &str) -> &[String] {
        match self.platforms.get(platform) {
            Some(section) if !section.modules.order.is_empty() => &section.modules.order,
            _ => &self.modules.order,
        }
    }

    pub fn is_critical(&self, module: &str) -> bool {
        self.modules.critical.iter().any(|name| name == module)
    }

    pub fn is_containerizable(&self, module: &str) -> bool {
        self.container
            .modules
            .get(module)
            .map(|m| m.containerize)
            .unwrap_or(false)
    }

    pub fn prefers_isolated(&self, module: &str) -> bool {
        self.isolated.modules.iter().any(|name| name == module)
    }
}

/// A module's identity and its raw configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Directory holding `module.json` and the stage scripts.
    pub dir: PathBuf,
    /// Parsed document, `None` if it was missing or unparsable.
    pub document: Option<Value>,
}

impl ModuleDescriptor {
    /// Reads `<modules_dir>/<name>/module.json`.
    ///
    /// Never fails: a missing or unparsable document is logged and the module falls back to
    /// defaults.
    pub fn load<P: AsRef<Path>>(modules_dir: P, name: &str) -> ModuleDescriptor {
        let dir = modules_dir.as_ref().join(name);
        let path = dir.join(MODULE_DOCUMENT);
        let document = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Configuration of module {} is unparsable ({}), using defaults", name, e);
                    None
                }
            },
            Err(e) => {
                warn!("Configuration of module {} could not be read ({}), using defaults", name, e);
                None
            }
        };
        ModuleDescriptor {
            name: name.to_string(),
            dir,
            document,
        }
    }

    /// Builds a descriptor from an in-memory document.
    pub fn from_value(name: &str, dir: PathBuf, document: Value) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            dir,
            document: Some(document),
        }
    }
}

/// Lists every sub-directory of `modules_dir` that carries a `module.json`, sorted by name.
pub fn discover_modules<P: AsRef<Path>>(modules_dir: P) -> Result<Vec<ModuleDescriptor>> {
    let modules_dir = modules_dir.as_ref();
    if !modules_dir.exists() {
        warn!("Module directory {} does not exist", modules_dir.display());
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(modules_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && path.join(MODULE_DOCUMENT).exists() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names
        .iter()
        .map(|name| ModuleDescriptor::load(modules_dir, name))
        .collect())
}

/// Merged configuration for one (module, platform) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub name: String,
    pub dir: PathBuf,
    pub enabled: bool,
    pub runlevel: i64,
    pub dependencies: Vec<String>,
    pub backup_paths: Vec<String>,
    /// `category -> alias name -> command`
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
    pub containerizable: bool,
    pub prefers_isolated: bool,
}

/// Resolves configuration keys for modules on one platform.
pub struct Resolver<'a> {
    global: &'a GlobalConfig,
    platform: &'a str,
}

fn lookup<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    let mut current = value;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl<'a> Resolver<'a> {
    pub fn new(global: &'a GlobalConfig, platform: &'a str) -> Self {
        Self { global, platform }
    }

    pub fn platform(&self) -> &str {
        self.platform
    }

    /// Looks up a dotted `key` for `module`.
    ///
    /// Order: `platforms.<platform>.<key>` in the module document, then `<key>` in the module
    /// document, then `modules.defaults.<key>` in the global document, then `default`.
    pub fn resolve(&self, module: &ModuleDescriptor, key: &str, default: Value) -> Value {
        if let Some(document) = &module.document {
            let platform_key = format!("platforms.{}.{}", self.platform, key);
            for candidate in [platform_key.as_str(), key] {
                if let Some(value) = lookup(document, candidate) {
                    if !is_absent(value) {
                        return value.clone();
                    }
                }
            }
        }
        let defaults = Value::Object(self.global.modules.defaults.clone());
        match lookup(&defaults, key) {
            Some(value) if !is_absent(value) => value.clone(),
            _ => default,
        }
    }

    fn resolve_bool(&self, module: &ModuleDescriptor, key: &str, default: bool) -> bool {
        match self.resolve(module, key, Value::Bool(default)) {
            Value::Bool(b) => b,
            other => {
                warn!("{}.{} should be a boolean, found {}", module.name, key, other);
                default
            }
        }
    }

    fn resolve_strings(&self, module: &ModuleDescriptor, key: &str) -> Vec<String> {
        match self.resolve(module, key, Value::Array(Vec::new())) {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.is_empty() => Some(s),
                    _ => None,
                })
                .collect(),
            other => {
                warn!("{}.{} should be a list of strings, found {}", module.name, key, other);
                Vec::new()
            }
        }
    }

    fn resolve_aliases(
        &self,
        module: &ModuleDescriptor,
    ) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut aliases = BTreeMap::new();
        if let Value::Object(categories) = self.resolve(module, "shell.aliases", Value::Null) {
            for (category, entries) in categories {
                let Value::Object(entries) = entries else {
                    warn!("Aliases of {} in category {} are not an object", module.name, category);
                    continue;
                };
                let commands: BTreeMap<String, String> = entries
                    .into_iter()
                    .filter_map(|(name, command)| match command {
                        Value::String(command) => Some((name, command)),
                        _ => None,
                    })
                    .collect();
                aliases.insert(category, commands);
            }
        }
        aliases
    }

    /// Produces the [`EffectiveConfig`] of `module`.
    pub fn effective(&self, module: &ModuleDescriptor) -> EffectiveConfig {
        let value = self.resolve(module, "runlevel", Value::from(DEFAULT_RUNLEVEL));
        let runlevel = match value.as_i64() {
            Some(runlevel) => runlevel,
            None => {
                warn!("{}.runlevel should be an integer, found {}", module.name, value);
                DEFAULT_RUNLEVEL
            }
        };
        EffectiveConfig {
            name: module.name.clone(),
            dir: module.dir.clone(),
            enabled: self.resolve_bool(module, "enabled", true),
            runlevel,
            dependencies: self.resolve_strings(module, "dependencies"),
            backup_paths: self.resolve_strings(module, "backup.paths"),
            aliases: self.resolve_aliases(module),
            containerizable: self.global.is_containerizable(&module.name)
                || self.resolve_bool(module, "execution.containerizable", false),
            prefers_isolated: self.global.prefers_isolated(&module.name)
                || self.resolve_bool(module, "execution.prefers_isolated", false),
        }
    }
}
