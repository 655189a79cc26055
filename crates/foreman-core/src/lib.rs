//! # foreman-core
//!
//! Core types for the Foreman feature orchestration engine.
//!
//! Foreman dispatches discrete units of work ("features") to AI coding agents,
//! runs each one inside an isolated git workspace, and tracks it through a
//! lifecycle from proposal to verified completion.
//!
//! ## Core Paradigm
//!
//! - A feature is the unit of work; its status is the single source of truth
//! - Dependencies are explicit feature ids, resolved before anything runs
//! - A workspace (main checkout or git worktree) is the unit of mutual exclusion
//! - Every agent backend speaks the same streaming event vocabulary

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{AutoModeConfig, GlobalSettings, ProjectRef};
pub use error::{ForemanError, Result};
pub use types::*;
