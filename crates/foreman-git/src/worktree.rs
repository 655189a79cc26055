//! Worktree and branch operations
//!
//! The orchestrator only needs a thin slice of git: detect a repository,
//! read the current branch, list branches and worktrees, and add a worktree
//! for a branch.

use foreman_core::{ForemanError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

use crate::command::GitExecutor;

/// One entry of `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name; `None` when detached or bare
    pub branch: Option<String>,
    pub is_bare: bool,
}

/// Directory name used for a branch's worktree (`feature/login` -> `feature-login`)
pub fn worktree_dir_name(branch: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

    let name = re.replace_all(branch.trim(), "-");
    let name = name.trim_matches(|c| c == '-' || c == '.');
    if name.is_empty() {
        "worktree".to_string()
    } else {
        name.to_string()
    }
}

/// Git worktree operations over an executor
pub struct WorktreeOps<E: GitExecutor> {
    executor: E,
}

impl<E: GitExecutor> WorktreeOps<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Whether `project` is inside a git working tree
    pub async fn is_repo(&self, project: &Path) -> bool {
        match self
            .executor
            .exec(project, &["rev-parse", "--is-inside-work-tree"])
            .await
        {
            Ok(output) => output.success && output.stdout.trim() == "true",
            Err(_) => false,
        }
    }

    /// Branch checked out in `project`; `None` when HEAD is detached
    ///
    /// Works on an unborn branch (no commits yet).
    #[instrument(skip(self))]
    pub async fn current_branch(&self, project: &Path) -> Result<Option<String>> {
        let output = self
            .executor
            .exec(project, &["symbolic-ref", "--short", "-q", "HEAD"])
            .await?;

        if !output.success {
            debug!("HEAD is detached in {}", project.display());
            return Ok(None);
        }

        let branch = output.stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    /// Whether a local branch exists
    pub async fn branch_exists(&self, project: &Path, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .executor
            .exec(project, &["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success)
    }

    /// Local branch names
    ///
    /// Executes: `git branch --format=%(refname:short)`
    #[instrument(skip(self))]
    pub async fn list_branches(&self, project: &Path) -> Result<Vec<String>> {
        let output = self
            .executor
            .exec(project, &["branch", "--format=%(refname:short)"])
            .await?;

        if !output.success {
            return Err(ForemanError::Git(format!(
                "Failed to list branches: {}",
                output.stderr.trim()
            )));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Worktrees of the repository; the main checkout comes first
    ///
    /// Executes: `git worktree list --porcelain`
    #[instrument(skip(self))]
    pub async fn list_worktrees(&self, project: &Path) -> Result<Vec<WorktreeInfo>> {
        let output = self
            .executor
            .exec(project, &["worktree", "list", "--porcelain"])
            .await?;

        if !output.success {
            return Err(ForemanError::Git(format!(
                "Failed to list worktrees: {}",
                output.stderr.trim()
            )));
        }

        Ok(parse_worktree_porcelain(&output.stdout))
    }

    /// Make sure HEAD points at a commit, creating an empty one if needed
    ///
    /// Worktrees cannot be added to a repository without commits. Returns
    /// whether a commit was created.
    #[instrument(skip(self))]
    pub async fn ensure_initial_commit(&self, project: &Path) -> Result<bool> {
        let head = self
            .executor
            .exec(project, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await?;
        if head.success {
            return Ok(false);
        }

        info!("Creating initial commit in {}", project.display());
        let output = self
            .executor
            .exec(
                project,
                &["commit", "--allow-empty", "-m", "Initial commit"],
            )
            .await?;

        if !output.success {
            return Err(ForemanError::Git(format!(
                "Failed to create initial commit: {}",
                output.stderr.trim()
            )));
        }
        Ok(true)
    }

    /// Add a worktree at `path` checked out on `branch`
    ///
    /// Creates the branch from HEAD when it does not exist yet.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn create_worktree(&self, project: &Path, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        let exists = self.branch_exists(project, branch).await?;

        let output = if exists {
            self.executor
                .exec(project, &["worktree", "add", &path_str, branch])
                .await?
        } else {
            self.executor
                .exec(project, &["worktree", "add", "-b", branch, &path_str])
                .await?
        };

        if !output.success {
            return Err(ForemanError::Git(format!(
                "Failed to add worktree for {}: {}",
                branch,
                output.stderr.trim()
            )));
        }

        info!(branch, new_branch = !exists, "Created worktree");
        Ok(())
    }
}

fn parse_worktree_porcelain(stdout: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in stdout.lines() {
        let line = line.trim_end();

        if let Some(path) = line.strip_prefix("worktree ") {
            worktrees.extend(current.take());
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                is_bare: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };

        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        } else if line == "bare" {
            entry.is_bare = true;
        }
    }

    worktrees.extend(current);
    worktrees
}
