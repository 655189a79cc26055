//! # foreman-orchestrator
//!
//! Feature orchestration engine for Foreman.
//!
//! This crate provides:
//! - Dependency resolution (priority-ordered topological sort, cycle detection)
//! - Workspace management on top of git worktrees
//! - The per-feature execution policy (plan, implement, settle)
//! - Auto mode: one selection loop per (project, workspace)
//! - Event sinks, the activity log and a project overview aggregator

mod activity_logger;
mod auto_mode;
mod events;
mod executor;
mod failure_tracker;
mod overview;
mod prompt;
mod resolver;
mod run_context;
mod settings;
mod state_machine;
mod workspace;

pub use activity_logger::{ActivityLogger, ACTIVITY_FILE};
pub use auto_mode::{AutoModeService, EngineContext};
pub use events::{
    AutoModeEvent, AutoModeEventKind, BroadcastEventSink, EventReporter, EventSink, NullEventSink,
    RecordingEventSink, RunPhase,
};
pub use executor::{FeatureRunner, RunResult};
pub use failure_tracker::{FailureTracker, DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW};
pub use overview::{OverviewAggregator, ProjectOverview, RecentFeature, RECENT_LIMIT};
pub use prompt::{build_implementation_prompt, build_plan_prompt, extract_summary, PLANNING_TOOLS};
pub use resolver::{blocking_dependencies, eligible_candidates, resolve, Resolution};
pub use run_context::{ActiveRunInfo, RunContext, RunGuard, RunRegistry};
pub use settings::{
    FileSettingsProvider, NoNotifications, NotificationSource, SettingsProvider,
    StaticNotifications, StaticSettingsProvider,
};
pub use state_machine::{transition, LoopAction, LoopEvent};
pub use workspace::{worktree_path, WorkspaceManager, WORKTREES_DIR};
