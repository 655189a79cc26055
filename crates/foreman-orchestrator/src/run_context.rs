//! Per-invocation run state and the registry enforcing one run per workspace

use chrono::{DateTime, Utc};
use foreman_core::{FeatureStatus, ForemanError, Result, Workspace, WorkspaceKey};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Ephemeral state of one feature run, owned by its loop
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub feature_id: String,
    pub key: WorkspaceKey,
    pub workspace: Workspace,
    pub model: String,
    pub cancel: CancellationToken,
    /// Status to revert to when the run is cancelled
    pub prior_status: FeatureStatus,
    pub started_at: DateTime<Utc>,
    output: String,
}

impl RunContext {
    pub fn new(
        feature_id: impl Into<String>,
        key: WorkspaceKey,
        workspace: Workspace,
        model: impl Into<String>,
        prior_status: FeatureStatus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            feature_id: feature_id.into(),
            key,
            workspace,
            model: model.into(),
            cancel,
            prior_status,
            started_at: Utc::now(),
            output: String::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn append_text(&mut self, text: &str) {
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str(text);
    }

    pub fn record_tool_use(&mut self, name: &str, input: &Value) {
        let input = input.to_string();
        let shown = if input.chars().count() > 200 {
            format!("{}...", input.chars().take(200).collect::<String>())
        } else {
            input
        };
        self.append_text(&format!("[tool] {} {}", name, shown));
    }

    /// Marks the boundary between planning and implementation output
    pub fn append_section(&mut self, title: &str) {
        self.append_text(&format!("\n---\n\n## {}\n", title));
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn info(&self) -> ActiveRunInfo {
        ActiveRunInfo {
            run_id: self.run_id.clone(),
            feature_id: self.feature_id.clone(),
            key: self.key.clone(),
            branch_path: self.workspace.branch_path.display().to_string(),
            model: self.model.clone(),
            started_at: self.started_at,
        }
    }
}

/// Snapshot of a registered run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRunInfo {
    pub run_id: String,
    pub feature_id: String,
    pub key: WorkspaceKey,
    pub branch_path: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
}

struct Entry {
    info: ActiveRunInfo,
    cancel: CancellationToken,
}

/// Registry of in-flight runs, at most one per workspace
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<WorkspaceKey, Entry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctx`; fails when its workspace already has a run
    ///
    /// The returned guard unregisters on drop.
    pub fn register(&self, ctx: &RunContext) -> Result<RunGuard> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = runs.get(&ctx.key) {
            return Err(ForemanError::WorkspaceUnavailable(format!(
                "{} is busy with feature {}",
                ctx.key, existing.info.feature_id
            )));
        }
        runs.insert(
            ctx.key.clone(),
            Entry {
                info: ctx.info(),
                cancel: ctx.cancel.clone(),
            },
        );
        Ok(RunGuard {
            registry: self.clone(),
            key: ctx.key.clone(),
            run_id: ctx.run_id.clone(),
        })
    }

    pub fn get(&self, key: &WorkspaceKey) -> Option<ActiveRunInfo> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.get(key).map(|e| e.info.clone())
    }

    /// Workspace running `feature_id` in `project`, if any
    pub fn find_feature(&self, project: &std::path::Path, feature_id: &str) -> Option<ActiveRunInfo> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.values()
            .find(|e| e.info.key.project() == project && e.info.feature_id == feature_id)
            .map(|e| e.info.clone())
    }

    pub fn all(&self) -> Vec<ActiveRunInfo> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = runs.values().map(|e| e.info.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Cancel the run of one workspace; false when none is registered
    pub fn cancel(&self, key: &WorkspaceKey) -> bool {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        match runs.get(key) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn release(&self, key: &WorkspaceKey, run_id: &str) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.get(key).is_some_and(|e| e.info.run_id == run_id) {
            runs.remove(key);
        }
    }
}

/// Keeps a run registered while alive
pub struct RunGuard {
    registry: RunRegistry,
    key: WorkspaceKey,
    run_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, &self.run_id);
    }
}
