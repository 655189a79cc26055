//! Workspace management: maps branches to git worktrees
//!
//! The primary checkout is the project directory itself. Any other branch
//! gets a worktree under `<project>/.worktrees/`, created the first time a
//! feature for that branch is about to run and never removed here.

use foreman_core::{ForemanError, Result, Workspace, WorkspaceKey};
use foreman_git::{worktree_dir_name, GitExecutor, WorktreeInfo, WorktreeOps};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Directory under the project holding branch worktrees
pub const WORKTREES_DIR: &str = ".worktrees";

/// Resolves and lazily creates workspaces
pub struct WorkspaceManager<E: GitExecutor> {
    ops: WorktreeOps<E>,
    workspaces: Mutex<HashMap<WorkspaceKey, Workspace>>,
    // git takes repository-wide locks while adding worktrees
    creation: tokio::sync::Mutex<()>,
}

impl<E: GitExecutor> WorkspaceManager<E> {
    pub fn new(executor: E) -> Self {
        Self {
            ops: WorktreeOps::new(executor),
            workspaces: Mutex::new(HashMap::new()),
            creation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ops(&self) -> &WorktreeOps<E> {
        &self.ops
    }

    /// Branch checked out in the main checkout, if any
    pub async fn primary_branch(&self, project: &Path) -> Option<String> {
        self.ops.current_branch(project).await.ok().flatten()
    }

    /// Canonical key for `branch`: naming the primary branch means primary
    pub async fn canonical_key(&self, project: &Path, branch: Option<&str>) -> WorkspaceKey {
        let key = WorkspaceKey::new(project, branch);
        match key.branch() {
            Some(b) if self.primary_branch(project).await.as_deref() == Some(b) => {
                WorkspaceKey::primary(project)
            }
            _ => key,
        }
    }

    async fn primary(&self, project: &Path) -> Workspace {
        Workspace {
            project_path: project.to_path_buf(),
            branch_path: project.to_path_buf(),
            branch_name: self.primary_branch(project).await.unwrap_or_default(),
            is_primary: true,
        }
    }

    fn cached(&self, key: &WorkspaceKey) -> Option<Workspace> {
        self.workspaces
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }

    /// Workspace for `key`, creating the worktree when needed
    ///
    /// Git failures surface as `WorkspaceUnavailable`.
    #[instrument(skip(self), fields(workspace = %key))]
    pub async fn ensure_workspace(&self, key: &WorkspaceKey) -> Result<Workspace> {
        let project = key.project();
        let Some(branch) = key.branch() else {
            return Ok(self.primary(project).await);
        };

        if let Some(workspace) = self.cached(key) {
            return Ok(workspace);
        }

        if self.primary_branch(project).await.as_deref() == Some(branch) {
            return Ok(self.primary(project).await);
        }

        let _creating = self.creation.lock().await;
        if let Some(workspace) = self.cached(key) {
            return Ok(workspace);
        }

        let workspace = self
            .find_or_create(project, branch)
            .await
            .map_err(|e| match e {
                ForemanError::WorkspaceUnavailable(_) => e,
                other => ForemanError::WorkspaceUnavailable(format!("{}: {}", branch, other)),
            })?;

        if let Ok(mut cache) = self.workspaces.lock() {
            cache.insert(key.clone(), workspace.clone());
        }
        Ok(workspace)
    }

    async fn find_or_create(&self, project: &Path, branch: &str) -> Result<Workspace> {
        if !self.ops.is_repo(project).await {
            return Err(ForemanError::WorkspaceUnavailable(format!(
                "{} is not a git repository",
                project.display()
            )));
        }

        let worktrees = self.ops.list_worktrees(project).await?;
        let existing = worktrees.iter().find(|w| w.branch.as_deref() == Some(branch));
        if let Some(worktree) = existing {
            debug!(branch, path = %worktree.path.display(), "Reusing worktree");
            return Ok(Workspace {
                project_path: project.to_path_buf(),
                branch_path: worktree.path.clone(),
                branch_name: branch.to_string(),
                is_primary: false,
            });
        }

        self.ops.ensure_initial_commit(project).await?;

        let path = free_worktree_path(project, branch, &worktrees).await;
        self.ops.create_worktree(project, &path, branch).await?;
        info!(branch, path = %path.display(), "Workspace ready");

        Ok(Workspace {
            project_path: project.to_path_buf(),
            branch_path: path,
            branch_name: branch.to_string(),
            is_primary: false,
        })
    }

    /// Every workspace git knows about; the primary checkout comes first
    pub async fn list_workspaces(&self, project: &Path) -> Result<Vec<Workspace>> {
        let worktrees = self.ops.list_worktrees(project).await?;

        Ok(worktrees
            .into_iter()
            .filter(|w| !w.is_bare)
            .enumerate()
            .map(|(i, w)| Workspace {
                project_path: project.to_path_buf(),
                branch_path: w.path,
                branch_name: w.branch.unwrap_or_default(),
                is_primary: i == 0,
            })
            .collect())
    }

    /// Local branches that could host a workspace
    pub async fn list_branches(&self, project: &Path) -> Result<Vec<String>> {
        self.ops.list_branches(project).await
    }
}

/// Where the worktree for `branch` lives
pub fn worktree_path(project: &Path, branch: &str) -> PathBuf {
    project.join(WORKTREES_DIR).join(worktree_dir_name(branch))
}

/// First unclaimed worktree path for `branch`
///
/// Branches like `feature/login` and `feature-login` share a directory
/// name; later ones get `-2`, `-3` and so on.
async fn free_worktree_path(project: &Path, branch: &str, worktrees: &[WorktreeInfo]) -> PathBuf {
    let base = worktree_path(project, branch);
    let name = worktree_dir_name(branch);
    let mut candidate = base.clone();
    let mut n = 2;
    loop {
        let taken = worktrees.iter().any(|w| w.path == candidate)
            || tokio::fs::try_exists(&candidate).await.unwrap_or(false);
        if !taken {
            return candidate;
        }
        candidate = base.with_file_name(format!("{}-{}", name, n));
        n += 1;
    }
}
