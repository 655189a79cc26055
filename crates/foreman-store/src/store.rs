//! Feature store with guarded status transitions

use chrono::Utc;
use foreman_core::{
    Feature, FeatureStatus, ForemanError, PlanSpec, PlanningMode, Result,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::feature_io::{self, FEATURE_FILE};

/// Input for creating a feature
#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    /// Explicit id; generated when absent
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: String,
    pub category: String,
    pub priority: Option<u8>,
    pub dependencies: Vec<String>,
    pub branch_name: Option<String>,
    pub model: Option<String>,
    pub planning_mode: PlanningMode,
    pub require_plan_approval: bool,
    pub require_approval: bool,
    /// `pending` (default) or `ready`
    pub status: Option<FeatureStatus>,
}

impl NewFeature {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    pub fn with_status(mut self, status: FeatureStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Non-status field edits
///
/// `Some(None)` clears an optional field; `None` leaves it alone.
#[derive(Debug, Clone, Default)]
pub struct FeaturePatch {
    pub title: Option<Option<String>>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Option<u8>>,
    pub dependencies: Option<Vec<String>>,
    pub branch_name: Option<Option<String>>,
    pub model: Option<Option<String>>,
    pub planning_mode: Option<PlanningMode>,
    pub require_plan_approval: Option<bool>,
    pub require_approval: Option<bool>,
    pub plan_spec: Option<Option<PlanSpec>>,
    pub error: Option<Option<String>>,
    pub summary: Option<Option<String>>,
}

impl FeaturePatch {
    fn apply(self, feature: &mut Feature) {
        if let Some(v) = self.title {
            feature.title = v;
        }
        if let Some(v) = self.description {
            feature.description = v;
        }
        if let Some(v) = self.category {
            feature.category = v;
        }
        if let Some(v) = self.priority {
            feature.priority = v;
        }
        if let Some(v) = self.dependencies {
            feature.dependencies = v;
        }
        if let Some(v) = self.branch_name {
            feature.branch_name = v;
        }
        if let Some(v) = self.model {
            feature.model = v;
        }
        if let Some(v) = self.planning_mode {
            feature.planning_mode = v;
        }
        if let Some(v) = self.require_plan_approval {
            feature.require_plan_approval = v;
        }
        if let Some(v) = self.require_approval {
            feature.require_approval = v;
        }
        if let Some(v) = self.plan_spec {
            feature.plan_spec = v;
        }
        if let Some(v) = self.error {
            feature.error = v;
        }
        if let Some(v) = self.summary {
            feature.summary = v;
        }
    }
}

/// Fields written atomically together with a status transition
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub error: Option<String>,
    pub summary: Option<String>,
    pub plan_spec: Option<PlanSpec>,
}

impl StatusChange {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    pub fn plan(mut self, plan: PlanSpec) -> Self {
        self.plan_spec = Some(plan);
        self
    }
}

/// Durable per-project feature records
///
/// Writes are serialized per project path; reads go straight to disk since
/// every record is replaced atomically.
#[derive(Clone, Default)]
pub struct FeatureStore {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn project_lock(&self, project: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(project.to_path_buf()).or_default().clone()
    }

    /// All live (non-archived) features of a project
    pub async fn list(&self, project: &Path) -> Result<Vec<Feature>> {
        feature_io::read_all_features(&feature_io::features_dir(project)).await
    }

    /// Archived features of a project
    pub async fn list_archived(&self, project: &Path) -> Result<Vec<Feature>> {
        feature_io::read_all_features(&feature_io::archive_dir(project)).await
    }

    pub async fn get(&self, project: &Path, id: &str) -> Result<Feature> {
        feature_io::validate_id(id)?;
        let path = feature_io::feature_dir(project, id).join(FEATURE_FILE);

        match fs::try_exists(&path).await {
            Ok(true) => feature_io::read_feature_file(&path).await,
            Ok(false) => Err(ForemanError::FeatureNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a feature in `pending` (or `ready`)
    #[instrument(skip(self, project, new), fields(project = %project.display()))]
    pub async fn create(&self, project: &Path, new: NewFeature) -> Result<Feature> {
        let id = match new.id {
            Some(id) => id,
            None => generate_id(),
        };
        feature_io::validate_id(&id)?;

        let status = new.status.unwrap_or(FeatureStatus::Pending);
        if !status.is_runnable() {
            return Err(ForemanError::InvalidFeature(format!(
                "new features start pending or ready, not {}",
                status
            )));
        }

        let mut feature = Feature::new(id, new.description);
        feature.title = new.title;
        feature.category = new.category;
        feature.priority = new.priority;
        feature.dependencies = new.dependencies;
        feature.branch_name = new.branch_name.filter(|b| !b.trim().is_empty());
        feature.model = new.model;
        feature.planning_mode = new.planning_mode;
        feature.require_plan_approval = new.require_plan_approval;
        feature.require_approval = new.require_approval;
        feature.status = status;
        validate_fields(&feature)?;

        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let dir = feature_io::feature_dir(project, &feature.id);
        if fs::try_exists(dir.join(FEATURE_FILE)).await? {
            return Err(ForemanError::InvalidFeature(format!(
                "feature {} already exists",
                feature.id
            )));
        }

        feature_io::write_feature_file(&dir, &feature).await?;
        info!(id = %feature.id, "Created feature");
        Ok(feature)
    }

    /// Apply a non-status edit
    #[instrument(skip(self, project, patch), fields(project = %project.display()))]
    pub async fn update(&self, project: &Path, id: &str, patch: FeaturePatch) -> Result<Feature> {
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let mut feature = self.get(project, id).await?;
        patch.apply(&mut feature);
        validate_fields(&feature)?;
        feature.updated_at = Utc::now();

        feature_io::write_feature_file(&feature_io::feature_dir(project, id), &feature).await?;
        debug!("Updated feature {}", id);
        Ok(feature)
    }

    /// Move a feature to `status`, writing `change` in the same record update
    ///
    /// Illegal transitions fail with `InvalidTransition` and leave the record
    /// untouched.
    #[instrument(skip(self, project, change), fields(project = %project.display()))]
    pub async fn set_status(
        &self,
        project: &Path,
        id: &str,
        status: FeatureStatus,
        change: StatusChange,
    ) -> Result<Feature> {
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let mut feature = self.get(project, id).await?;
        let from = feature.status;

        if !from.can_transition_to(status) {
            return Err(ForemanError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            });
        }

        let now = Utc::now();
        if status.is_in_flight() {
            feature.error = None;
            if !from.is_in_flight() {
                feature.started_at = Some(now);
            }
        }
        if let Some(error) = change.error {
            feature.error = Some(error);
        }
        if let Some(summary) = change.summary {
            feature.summary = Some(summary);
        }
        if let Some(plan) = change.plan_spec {
            feature.plan_spec = Some(plan);
        }
        feature.status = status;
        feature.updated_at = now;

        feature_io::write_feature_file(&feature_io::feature_dir(project, id), &feature).await?;
        info!(id, %from, to = %status, "Feature status changed");
        Ok(feature)
    }

    /// Soft-delete a completed or verified feature
    #[instrument(skip(self, project), fields(project = %project.display()))]
    pub async fn archive(&self, project: &Path, id: &str) -> Result<Feature> {
        let lock = self.project_lock(project);
        let _guard = lock.lock().await;

        let feature = self.get(project, id).await?;
        if !feature.status.is_terminal_success() {
            return Err(ForemanError::InvalidFeature(format!(
                "only completed or verified features can be archived; {} is {}",
                id, feature.status
            )));
        }

        let archive_root = feature_io::archive_dir(project);
        fs::create_dir_all(&archive_root).await?;

        let target = archive_root.join(id);
        if fs::try_exists(&target).await? {
            warn!("Replacing existing archive entry for {}", id);
            fs::remove_dir_all(&target).await?;
        }
        fs::rename(feature_io::feature_dir(project, id), &target).await?;

        info!(id, "Archived feature");
        Ok(feature)
    }

    pub async fn write_agent_output(&self, project: &Path, id: &str, content: &str) -> Result<()> {
        feature_io::validate_id(id)?;
        feature_io::write_agent_output(&feature_io::feature_dir(project, id), content).await
    }

    pub async fn read_agent_output(&self, project: &Path, id: &str) -> Result<Option<String>> {
        feature_io::validate_id(id)?;
        feature_io::read_agent_output(&feature_io::feature_dir(project, id)).await
    }

    /// Revert features left `running`/`generating_spec` by a crashed process
    ///
    /// Returns the ids that were reset. Only call this when no loop of this
    /// process is running against the project.
    #[instrument(skip(self, project), fields(project = %project.display()))]
    pub async fn reset_stuck_features(&self, project: &Path) -> Result<Vec<String>> {
        let mut reset = Vec::new();

        for feature in self.list(project).await? {
            if !feature.status.is_in_flight() {
                continue;
            }

            let message = format!(
                "Interrupted while {}; the process stopped before the run finished",
                feature.status
            );
            match self
                .set_status(
                    project,
                    &feature.id,
                    FeatureStatus::Ready,
                    StatusChange::with_error(message),
                )
                .await
            {
                Ok(_) => reset.push(feature.id),
                // Someone else moved it meanwhile
                Err(ForemanError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !reset.is_empty() {
            warn!(count = reset.len(), "Reset stuck features to ready");
        }
        Ok(reset)
    }
}

fn generate_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("feature-{}-{}", Utc::now().timestamp_millis(), &uuid[..8])
}

fn validate_fields(feature: &Feature) -> Result<()> {
    if feature.description.trim().is_empty() {
        return Err(ForemanError::InvalidFeature(
            "description must not be empty".to_string(),
        ));
    }
    if let Some(p) = feature.priority {
        if !(1..=3).contains(&p) {
            return Err(ForemanError::InvalidFeature(format!(
                "priority must be 1..=3, got {}",
                p
            )));
        }
    }
    if feature.dependencies.iter().any(|d| d == &feature.id) {
        return Err(ForemanError::InvalidFeature(format!(
            "feature {} depends on itself",
            feature.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with(project: &Path, ids: &[&str]) -> FeatureStore {
        let store = FeatureStore::new();
        for id in ids {
            store
                .create(project, NewFeature::new(format!("Build {}", id)).with_id(*id))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new();

        let created = store
            .create(dir.path(), NewFeature::new("Add login").with_priority(1))
            .await
            .unwrap();
        assert!(created.id.starts_with("feature-"));
        assert_eq!(created.status, FeatureStatus::Pending);

        let fetched = store.get(dir.path(), &created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.list(dir.path()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_self_dependency() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new();

        let err = store
            .create(
                dir.path(),
                NewFeature::new("loop").with_id("a").with_dependencies(["a"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::InvalidFeature(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_running_initial_status() {
        let dir = TempDir::new().unwrap();
        let store = FeatureStore::new();

        let result = store
            .create(
                dir.path(),
                NewFeature::new("x").with_status(FeatureStatus::Running),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let err = FeatureStore::new().get(dir.path(), "nope").await.unwrap_err();
        assert!(matches!(err, ForemanError::FeatureNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_record_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a"]).await;
        let before = store.get(dir.path(), "a").await.unwrap();

        let err = store
            .set_status(dir.path(), "a", FeatureStatus::Verified, StatusChange::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForemanError::InvalidTransition {
                from: FeatureStatus::Pending,
                to: FeatureStatus::Verified,
                ..
            }
        ));

        let after = store.get(dir.path(), "a").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_running_clears_error_and_stamps_start() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a"]).await;

        store
            .set_status(dir.path(), "a", FeatureStatus::Running, StatusChange::none())
            .await
            .unwrap();
        store
            .set_status(
                dir.path(),
                "a",
                FeatureStatus::Failed,
                StatusChange::with_error("boom"),
            )
            .await
            .unwrap();
        let failed = store.get(dir.path(), "a").await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));

        store
            .set_status(dir.path(), "a", FeatureStatus::Ready, StatusChange::none())
            .await
            .unwrap();
        let running = store
            .set_status(dir.path(), "a", FeatureStatus::Running, StatusChange::none())
            .await
            .unwrap();
        assert_eq!(running.error, None);
        assert!(running.started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_does_not_change_status() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a", "b"]).await;

        let updated = store
            .update(
                dir.path(),
                "b",
                FeaturePatch {
                    dependencies: Some(vec!["a".into()]),
                    priority: Some(Some(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, FeatureStatus::Pending);
        assert_eq!(updated.dependencies, vec!["a"]);

        let err = store
            .update(
                dir.path(),
                "b",
                FeaturePatch {
                    priority: Some(Some(9)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::InvalidFeature(_)));
    }

    #[tokio::test]
    async fn test_archive_requires_terminal_success() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a"]).await;

        assert!(store.archive(dir.path(), "a").await.is_err());

        store
            .set_status(dir.path(), "a", FeatureStatus::Running, StatusChange::none())
            .await
            .unwrap();
        store
            .set_status(dir.path(), "a", FeatureStatus::Completed, StatusChange::none())
            .await
            .unwrap();
        store.archive(dir.path(), "a").await.unwrap();

        assert!(store.list(dir.path()).await.unwrap().is_empty());
        let archived = store.list_archived(dir.path()).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, "a");
    }

    #[tokio::test]
    async fn test_reset_stuck_features() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a", "b", "c"]).await;

        store
            .set_status(dir.path(), "a", FeatureStatus::Running, StatusChange::none())
            .await
            .unwrap();
        store
            .set_status(dir.path(), "b", FeatureStatus::GeneratingSpec, StatusChange::none())
            .await
            .unwrap();

        let mut reset = store.reset_stuck_features(dir.path()).await.unwrap();
        reset.sort();
        assert_eq!(reset, vec!["a", "b"]);

        let a = store.get(dir.path(), "a").await.unwrap();
        assert_eq!(a.status, FeatureStatus::Ready);
        assert!(a.error.unwrap().contains("Interrupted"));
        assert_eq!(
            store.get(dir.path(), "c").await.unwrap().status,
            FeatureStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<String> = (0..8).map(|i| format!("f{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let store = store_with(dir.path(), &id_refs).await;

        let mut handles = Vec::new();
        for id in ids.clone() {
            let store = store.clone();
            let project = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                store
                    .set_status(&project, &id, FeatureStatus::Ready, StatusChange::none())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let features = store.list(dir.path()).await.unwrap();
        assert_eq!(features.len(), 8);
        assert!(features.iter().all(|f| f.status == FeatureStatus::Ready));
    }

    #[tokio::test]
    async fn test_agent_output_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), &["a"]).await;

        store
            .write_agent_output(dir.path(), "a", "partial output")
            .await
            .unwrap();
        assert_eq!(
            store.read_agent_output(dir.path(), "a").await.unwrap().as_deref(),
            Some("partial output")
        );
    }
}
