//! # Toolrig Core Library
//!
//! This crate contains the engine behind the `toolrig` CLI, which provisions and maintains a
//! developer toolchain across hosts by driving pluggable modules through their lifecycle
//! stages (grovel, install, remove, verify, info, update).
//!
//! A run loads the global `config.json` and every `modules/<name>/module.json` below the root
//! directory, resolves each module for the current platform, plans an execution order, picks an
//! execution mode per module, and dispatches the requested action. Files a module declares are
//! snapshotted before any mutating stage, and shell aliases are kept in marker-delimited blocks
//! of a shared startup file.
//!
//! ## Modules Overview
//! - [`config`] – Global and per-module configuration documents and key resolution
//! - [`planner`] – Execution order and dependency validation
//! - [`mode`] – Execution mode selection (direct, isolated, containerized)
//! - [`module`] – The [`Module`] trait, script-backed modules and the registry
//! - [`runner`] – Stage subprocesses for each execution mode
//! - [`dispatcher`] – Per-action stage flows, dry-run handling and critical aborts
//! - [`lifecycle`] – Per-module phase tracking
//! - [`state`] – Append-only install-state logs
//! - [`backup`] – Backup sets: snapshot, restore, verify, prune
//! - [`alias`] – Alias blocks in shell startup files
//! - [`context`] – Run-wide execution context and runtime probing
//! - [`util`] – Shared helpers (platform, placeholders, hashing, time)
//! - [`global`] – Data directory layout and defaults

pub mod alias;
pub mod backup;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod global;
pub mod lifecycle;
pub mod logging;
pub mod mode;
pub mod module;
pub mod planner;
pub mod runner;
pub mod state;
pub mod util;

pub use config::{EffectiveConfig, GlobalConfig, ModuleDescriptor, Resolver};
pub use context::{ExecutionContext, RunFlags};
pub use dispatcher::{Action, Dispatcher, Outcome, RunReport};
pub use error::{Result, ToolrigError};
pub use module::{Module, ModuleRegistry, Stage, StageContext};
pub use planner::{Plan, Planner};
