//! Core type definitions for Foreman orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Priority assumed for features that do not set one (1 = high .. 3 = low)
pub const DEFAULT_PRIORITY: u8 = 2;

/// Lifecycle status of a feature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Pending,
    Ready,
    Running,
    GeneratingSpec,
    WaitingApproval,
    Completed,
    Failed,
    Verified,
}

impl FeatureStatus {
    /// Every status, in lifecycle order
    pub const ALL: [FeatureStatus; 8] = [
        Self::Pending,
        Self::Ready,
        Self::Running,
        Self::GeneratingSpec,
        Self::WaitingApproval,
        Self::Completed,
        Self::Failed,
        Self::Verified,
    ];

    /// Only `completed` and `verified` release dependents
    pub fn is_terminal_success(self) -> bool {
        matches!(self, Self::Completed | Self::Verified)
    }

    /// Statuses the scheduler may pick up
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    /// Statuses that mean an agent is (or was, before a crash) working on it
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Running | Self::GeneratingSpec)
    }

    /// Whether `self -> next` is a legal status transition
    ///
    /// Self-transitions are never legal; field-only edits are not status changes.
    pub fn can_transition_to(self, next: FeatureStatus) -> bool {
        use FeatureStatus::*;

        match self {
            Pending => matches!(next, Ready | Running | GeneratingSpec),
            Ready => matches!(next, Pending | Running | GeneratingSpec),
            Running => matches!(
                next,
                Completed | WaitingApproval | Failed | Verified | Pending | Ready
            ),
            GeneratingSpec => matches!(next, Running | WaitingApproval | Failed | Pending | Ready),
            WaitingApproval => matches!(next, Ready | Running | Verified | Completed | Pending),
            Completed => matches!(next, Verified | Pending),
            Failed => matches!(next, Pending | Ready),
            Verified => false,
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::GeneratingSpec => "generating_spec",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Verified => "verified",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FeatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" | "backlog" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" | "in_progress" => Ok(Self::Running),
            "generating_spec" => Ok(Self::GeneratingSpec),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "completed" | "done" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "verified" => Ok(Self::Verified),
            _ => Err(format!("Invalid feature status: {}", s)),
        }
    }
}

/// Whether a feature gets a planning pass before implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    #[default]
    Skip,
    Spec,
}

/// Generated implementation plan attached to a feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u32,
}

impl PlanSpec {
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }
}

/// A unit of requested work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// 1 = high .. 3 = low
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Workspace binding; `None` means the primary checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Per-feature model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub planning_mode: PlanningMode,
    #[serde(default)]
    pub require_plan_approval: bool,
    /// Successful runs land in `waiting_approval` instead of `completed`
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_spec: Option<PlanSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            description: description.into(),
            category: String::new(),
            priority: None,
            status: FeatureStatus::Pending,
            dependencies: Vec::new(),
            branch_name: None,
            model: None,
            planning_mode: PlanningMode::Skip,
            require_plan_approval: false,
            require_approval: false,
            started_at: None,
            plan_spec: None,
            error: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: FeatureStatus) -> Self {
        self.status = status;
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

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_planning(mut self, mode: PlanningMode, require_approval: bool) -> Self {
        self.planning_mode = mode;
        self.require_plan_approval = require_approval;
        self
    }

    pub fn with_approval_gate(mut self) -> Self {
        self.require_approval = true;
        self
    }

    /// Priority used for ordering
    pub fn effective_priority(&self) -> u8 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Short human label: the title, or the first line of the description
    pub fn label(&self) -> &str {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => self.description.lines().next().unwrap_or(&self.description),
        }
    }

    /// A plan must be generated (and possibly approved) before implementation
    pub fn needs_plan(&self) -> bool {
        self.planning_mode == PlanningMode::Spec
            && !self.plan_spec.as_ref().is_some_and(PlanSpec::is_approved)
    }

    /// Most recent activity timestamp, for observers sorting by recency
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        let plan = self.plan_spec.as_ref();
        [
            self.started_at,
            plan.and_then(|p| p.generated_at),
            plan.and_then(|p| p.approved_at),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Whether this feature belongs to the workspace bound to `branch`
    ///
    /// `branch = None` is the primary checkout, which also owns features
    /// explicitly bound to the primary branch name.
    pub fn targets_workspace(&self, branch: Option<&str>, primary_branch: Option<&str>) -> bool {
        match (branch, self.branch_name.as_deref()) {
            (None, None) => true,
            (None, Some(own)) => primary_branch == Some(own),
            (Some(target), Some(own)) => target == own,
            (Some(target), None) => primary_branch == Some(target),
        }
    }
}

/// An isolated git working tree bound to a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub project_path: PathBuf,
    pub branch_path: PathBuf,
    pub branch_name: String,
    pub is_primary: bool,
}

/// Identifies one (project, workspace) scheduling unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceKey {
    pub project_path: PathBuf,
    /// `None` is the primary checkout
    pub branch_name: Option<String>,
}

impl WorkspaceKey {
    pub fn new(project_path: impl Into<PathBuf>, branch_name: Option<&str>) -> Self {
        Self {
            project_path: project_path.into(),
            branch_name: branch_name
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
        }
    }

    pub fn primary(project_path: impl Into<PathBuf>) -> Self {
        Self::new(project_path, None)
    }

    pub fn project(&self) -> &Path {
        &self.project_path
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    pub fn is_primary(&self) -> bool {
        self.branch_name.is_none()
    }
}

impl std::fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            self.project_path.display(),
            self.branch_name.as_deref().unwrap_or("primary")
        )
    }
}

/// Scheduling state of one workspace loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopState {
    #[default]
    Idle,
    Selecting,
    Running,
    AwaitingApproval,
    Stopping,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// How long a loop keeps selecting work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "featureId", rename_all = "snake_case")]
pub enum LoopMode {
    /// Keep selecting until stopped; park when nothing is eligible
    #[default]
    Continuous,
    /// Run at most one feature, then finish
    SingleStep,
    /// Run exactly the named feature, then finish
    Feature(String),
}

impl LoopMode {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Continuous)
    }
}

/// Observable state of one (project, workspace) loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLoopStatus {
    pub project_path: PathBuf,
    pub branch_name: Option<String>,
    pub is_auto_loop_running: bool,
    pub state: LoopState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<LoopMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_feature_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ProjectLoopStatus {
    /// Status reported for a workspace with no loop
    pub fn not_running(key: &WorkspaceKey) -> Self {
        Self {
            project_path: key.project_path.clone(),
            branch_name: key.branch_name.clone(),
            is_auto_loop_running: false,
            state: LoopState::Idle,
            mode: None,
            current_feature_id: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// A user-facing notification kept by an external store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub project_path: PathBuf,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let status: FeatureStatus = "waiting_approval".parse().unwrap();
        assert_eq!(status, FeatureStatus::WaitingApproval);
        assert_eq!(status.to_string(), "waiting_approval");
        assert_eq!(
            "generating-spec".parse::<FeatureStatus>().unwrap(),
            FeatureStatus::GeneratingSpec
        );
        assert!("bogus".parse::<FeatureStatus>().is_err());
    }

    #[test]
    fn test_terminal_success() {
        assert!(FeatureStatus::Completed.is_terminal_success());
        assert!(FeatureStatus::Verified.is_terminal_success());
        assert!(!FeatureStatus::Failed.is_terminal_success());
        assert!(!FeatureStatus::WaitingApproval.is_terminal_success());
    }

    #[test]
    fn test_no_self_transitions() {
        for status in FeatureStatus::ALL {
            assert!(!status.can_transition_to(status), "{status} -> {status}");
        }
    }

    #[test]
    fn test_verified_is_final() {
        for status in FeatureStatus::ALL {
            assert!(!FeatureStatus::Verified.can_transition_to(status));
        }
    }

    #[test]
    fn test_cancel_revert_is_legal() {
        assert!(FeatureStatus::Running.can_transition_to(FeatureStatus::Pending));
        assert!(FeatureStatus::Running.can_transition_to(FeatureStatus::Ready));
        assert!(FeatureStatus::GeneratingSpec.can_transition_to(FeatureStatus::Ready));
        assert!(!FeatureStatus::Completed.can_transition_to(FeatureStatus::Running));
    }

    #[test]
    fn test_feature_json_uses_camel_case() {
        let feature = Feature::new("f-1", "Add login")
            .with_branch("feature/login")
            .with_priority(1);
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["branchName"], "feature/login");
        assert_eq!(json["status"], "pending");

        let back: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(back.branch_name.as_deref(), Some("feature/login"));
    }

    #[test]
    fn test_minimal_feature_json_defaults() {
        let feature: Feature =
            serde_json::from_str(r#"{"id":"x","description":"Do it"}"#).unwrap();
        assert_eq!(feature.status, FeatureStatus::Pending);
        assert_eq!(feature.effective_priority(), DEFAULT_PRIORITY);
        assert!(feature.dependencies.is_empty());
    }

    #[test]
    fn test_targets_workspace() {
        let primary = Feature::new("a", "a");
        let on_main = Feature::new("b", "b").with_branch("main");
        let on_login = Feature::new("c", "c").with_branch("feature/login");

        assert!(primary.targets_workspace(None, Some("main")));
        assert!(on_main.targets_workspace(None, Some("main")));
        assert!(!on_login.targets_workspace(None, Some("main")));
        assert!(on_login.targets_workspace(Some("feature/login"), Some("main")));
        assert!(!primary.targets_workspace(Some("feature/login"), Some("main")));
    }

    #[test]
    fn test_needs_plan() {
        let mut feature = Feature::new("a", "a").with_planning(PlanningMode::Spec, true);
        assert!(feature.needs_plan());

        feature.plan_spec = Some(PlanSpec {
            content: Some("plan".into()),
            generated_at: Some(Utc::now()),
            approved_at: Some(Utc::now()),
            version: 1,
        });
        assert!(!feature.needs_plan());
    }

    #[test]
    fn test_workspace_key_normalizes_empty_branch() {
        let key = WorkspaceKey::new("/repo", Some("  "));
        assert!(key.is_primary());
        assert_eq!(key.to_string(), "/repo@primary");
    }
}
