//! # foreman-git
//!
//! Git integration layer for Foreman orchestration.
//!
//! This crate provides:
//! - Git command execution abstraction (real and mock executors)
//! - Worktree and branch queries used to map features onto workspaces

mod command;
mod worktree;

pub use command::{GitCommand, GitExecutor, GitOutput, MockGitExecutor};
pub use worktree::{worktree_dir_name, WorktreeInfo, WorktreeOps};
