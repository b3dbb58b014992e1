//! Module execution order.
//!
//! Dependencies are validated but do not reorder the plan.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::{EffectiveConfig, GlobalConfig};

/// The ordered list of modules to process in one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub modules: Vec<EffectiveConfig>,
    /// Requested or ordered names that were dropped (unknown or disabled).
    pub dropped: Vec<String>,
}

impl Plan {
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }
}

/// A declared dependency that names no known module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyIssue {
    pub module: String,
    pub missing: String,
}

pub struct Planner<'a> {
    global: &'a GlobalConfig,
    platform: &'a str,
    modules: &'a [EffectiveConfig],
}

impl<'a> Planner<'a> {
    /// `modules` is every discovered module, already resolved for `platform`.
    pub fn new(global: &'a GlobalConfig, platform: &'a str, modules: &'a [EffectiveConfig]) -> Self {
        Self {
            global,
            platform,
            modules,
        }
    }

    fn find(&self, name: &str) -> Option<&'a EffectiveConfig> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Computes the execution order.
    ///
    /// With `requested` names, the plan is exactly those modules in the given order, minus
    /// unknown and disabled ones. Without, the configured order list comes first and the
    /// remaining enabled modules follow by runlevel, then name.
    pub fn plan(&self, requested: &[String]) -> Plan {
        let mut plan = Plan::default();
        let mut seen = HashSet::new();

        if !requested.is_empty() {
            for name in requested {
                self.push(name, &mut plan, &mut seen);
            }
            return plan;
        }

        for name in self.global.module_order(self.platform) {
            self.push(name, &mut plan, &mut seen);
        }

        let mut rest: Vec<&EffectiveConfig> = self
            .modules
            .iter()
            .filter(|m| m.enabled && !seen.contains(m.name.as_str()))
            .collect();
        rest.sort_by(|a, b| a.runlevel.cmp(&b.runlevel).then_with(|| a.name.cmp(&b.name)));
        plan.modules.extend(rest.into_iter().cloned());
        debug!("Planned modules: {:?}", plan.names());
        plan
    }

    fn push<'n>(&self, name: &'n str, plan: &mut Plan, seen: &mut HashSet<&'n str>) {
        if !seen.insert(name) {
            return;
        }
        match self.find(name) {
            Some(module) if module.enabled => plan.modules.push(module.clone()),
            Some(_) => {
                warn!("Module {} is disabled on {}, skipping", name, self.platform);
                plan.dropped.push(name.to_string());
            }
            None => {
                warn!("Unknown module {}, skipping", name);
                plan.dropped.push(name.to_string());
            }
        }
    }

    /// Checks that every declared dependency of the planned modules names a known module.
    pub fn validate_dependencies(&self, plan: &Plan) -> Vec<DependencyIssue> {
        let mut issues = Vec::new();
        for module in &plan.modules {
            for dependency in &module.dependencies {
                if self.find(dependency).is_none() {
                    warn!("Module {} depends on unknown module {}", module.name, dependency);
                    issues.push(DependencyIssue {
                        module: module.name.clone(),
                        missing: dependency.clone(),
                    });
                }
            }
        }
        issues
    }
}
