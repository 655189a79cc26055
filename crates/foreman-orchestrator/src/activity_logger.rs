//! Activity Logger - human-readable audit trail in `.foreman/activity.md`
//!
//! One markdown line per loop or feature milestone. Streaming progress and
//! tool use are left to event subscribers; they would drown the log.

use chrono::Utc;
use foreman_core::fail_open::fail_open;
use foreman_core::ForemanError;
use foreman_store::feature_io::DATA_DIR;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::events::{AutoModeEvent, AutoModeEventKind};

/// Maximum characters of a summary or error quoted in the log
const PREVIEW_CHARS: usize = 500;

pub const ACTIVITY_FILE: &str = "activity.md";

/// Append-only activity log for one project
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Logger writing to `<project>/.foreman/activity.md`
    pub fn for_project(project: &Path) -> Self {
        Self::new(project.join(DATA_DIR).join(ACTIVITY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Record an event if it is a milestone
    ///
    /// This operation is fail-open - logging failures never affect the loop
    pub async fn record(&self, event: &AutoModeEvent) {
        let Some(line) = format_event(event) else {
            return;
        };
        let workspace = event.branch_name.as_deref().unwrap_or("primary");
        let content = format!(
            "- {} `{}` {}\n",
            event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            workspace,
            line
        );
        self.append(&content).await;
    }

    /// Free-form note (state machine activity, recovery)
    pub async fn note(&self, workspace: Option<&str>, message: &str) {
        let content = format!(
            "- {} `{}` {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            workspace.unwrap_or("primary"),
            message
        );
        self.append(&content).await;
    }

    async fn append(&self, content: &str) {
        fail_open("activity_logger::append", || async {
            if let Some(parent) = self.output_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok::<_, ForemanError>(())
        })
        .await;
    }
}

fn preview(text: &str) -> String {
    let first = text.trim().replace('\n', " ");
    if first.chars().count() > PREVIEW_CHARS {
        let cut: String = first.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        first
    }
}

fn format_event(event: &AutoModeEvent) -> Option<String> {
    use AutoModeEventKind::*;

    let line = match &event.kind {
        LoopStarted { mode } => format!("**Loop started** ({:?})", mode),
        LoopStopped { reason } => format!("**Loop stopped**: {}", reason),
        AutoModePaused { reason, failures } => {
            format!("**Loop paused** after {} failures: {}", failures, preview(reason))
        }
        FeatureStarted {
            feature_id,
            model,
            phase,
        } => format!("Started `{}` ({:?}, {})", feature_id, phase, model),
        FeatureCompleted {
            feature_id,
            status,
            summary,
        } => match summary {
            Some(summary) => format!("Finished `{}` -> {}: {}", feature_id, status, preview(summary)),
            None => format!("Finished `{}` -> {}", feature_id, status),
        },
        FeatureFailed { feature_id, error } => {
            format!("**Failed** `{}`: {}", feature_id, preview(error))
        }
        FeatureCancelled {
            feature_id,
            reverted_to,
        } => format!("Cancelled `{}` (reverted to {})", feature_id, reverted_to),
        PlanAwaitingApproval { feature_id, .. } => {
            format!("Plan for `{}` awaiting approval", feature_id)
        }
        WorkspaceUnavailable { feature_id, error } => {
            format!("Workspace unavailable for `{}`: {}", feature_id, preview(error))
        }
        DependencyCycle { error, .. } => format!("**Excluded**: {}", preview(error)),
        LoopIdle | FeatureProgress { .. } | FeatureToolUse { .. } => return None,
    };
    Some(line)
}
