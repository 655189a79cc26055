//! Auto-mode events and the sinks that receive them
//!
//! Sinks are fire-and-forget: emitting never blocks the loop and a sink
//! with no listeners silently drops events.

use chrono::{DateTime, Utc};
use foreman_core::{FeatureStatus, LoopMode, WorkspaceKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use crate::activity_logger::ActivityLogger;

/// Which invocation of a feature run an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Implementation,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoModeEventKind {
    LoopStarted {
        mode: LoopMode,
    },
    LoopStopped {
        reason: String,
    },
    LoopIdle,
    AutoModePaused {
        reason: String,
        failures: u32,
    },
    FeatureStarted {
        feature_id: String,
        model: String,
        phase: RunPhase,
    },
    FeatureProgress {
        feature_id: String,
        text: String,
    },
    FeatureToolUse {
        feature_id: String,
        tool: String,
        input: Value,
    },
    FeatureCompleted {
        feature_id: String,
        status: FeatureStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    FeatureFailed {
        feature_id: String,
        error: String,
    },
    FeatureCancelled {
        feature_id: String,
        reverted_to: FeatureStatus,
    },
    PlanAwaitingApproval {
        feature_id: String,
        plan: String,
    },
    WorkspaceUnavailable {
        feature_id: String,
        error: String,
    },
    DependencyCycle {
        feature_ids: Vec<String>,
        error: String,
    },
}

/// One event from the loop of a (project, workspace) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoModeEvent {
    pub project_path: PathBuf,
    pub branch_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AutoModeEventKind,
}

impl AutoModeEvent {
    pub fn new(key: &WorkspaceKey, kind: AutoModeEventKind) -> Self {
        Self {
            project_path: key.project_path.clone(),
            branch_name: key.branch_name.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Feature the event concerns, if any
    pub fn feature_id(&self) -> Option<&str> {
        use AutoModeEventKind::*;
        match &self.kind {
            FeatureStarted { feature_id, .. }
            | FeatureProgress { feature_id, .. }
            | FeatureToolUse { feature_id, .. }
            | FeatureCompleted { feature_id, .. }
            | FeatureFailed { feature_id, .. }
            | FeatureCancelled { feature_id, .. }
            | PlanAwaitingApproval { feature_id, .. }
            | WorkspaceUnavailable { feature_id, .. } => Some(feature_id),
            _ => None,
        }
    }
}

/// Receiver of auto-mode events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AutoModeEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: AutoModeEvent) {}
}

/// Fans events out to any number of subscribers
pub struct BroadcastEventSink {
    tx: broadcast::Sender<AutoModeEvent>,
    capacity: usize,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutoModeEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: AutoModeEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AutoModeEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AutoModeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events concerning one feature, in emission order
    pub fn for_feature(&self, feature_id: &str) -> Vec<AutoModeEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.feature_id() == Some(feature_id))
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: AutoModeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

enum ActivityEntry {
    Event(AutoModeEvent),
    Note { key: WorkspaceKey, message: String },
}

/// Appends entries in arrival order until every sender is dropped
fn spawn_activity_writer() -> mpsc::UnboundedSender<ActivityEntry> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            match entry {
                ActivityEntry::Event(event) => {
                    ActivityLogger::for_project(&event.project_path)
                        .record(&event)
                        .await
                }
                ActivityEntry::Note { key, message } => {
                    ActivityLogger::for_project(key.project())
                        .note(key.branch(), &message)
                        .await
                }
            }
        }
    });
    tx
}

/// Emits to a sink and, when enabled, to the project's activity log
///
/// Log appends happen on a background writer task; reporting never waits
/// on the filesystem. Enabling the log requires a tokio runtime.
#[derive(Clone)]
pub struct EventReporter {
    sink: Arc<dyn EventSink>,
    activity: Option<mpsc::UnboundedSender<ActivityEntry>>,
}

impl EventReporter {
    pub fn new(sink: Arc<dyn EventSink>, activity_log: bool) -> Self {
        Self {
            sink,
            activity: activity_log.then(spawn_activity_writer),
        }
    }

    pub fn report(&self, key: &WorkspaceKey, kind: AutoModeEventKind) {
        let event = AutoModeEvent::new(key, kind);
        if let Some(activity) = &self.activity {
            // Writer gone means the runtime is shutting down
            let _ = activity.send(ActivityEntry::Event(event.clone()));
        }
        self.sink.emit(event);
    }

    /// Activity-log-only note
    pub fn note(&self, key: &WorkspaceKey, message: &str) {
        if let Some(activity) = &self.activity {
            let _ = activity.send(ActivityEntry::Note {
                key: key.clone(),
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> WorkspaceKey {
        WorkspaceKey::new("/repo", Some("feature/login"))
    }

    #[tokio::test]
    async fn test_broadcast_delivers_event() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();

        sink.emit(AutoModeEvent::new(&key(), AutoModeEventKind::LoopIdle));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AutoModeEventKind::LoopIdle);
        assert_eq!(event.branch_name.as_deref(), Some("feature/login"));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(0);
        assert_eq!(sink.capacity(), 1);
        sink.emit(AutoModeEvent::new(&key(), AutoModeEventKind::LoopIdle));
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = AutoModeEvent::new(
            &key(),
            AutoModeEventKind::FeatureFailed {
                feature_id: "a".into(),
                error: "boom".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "feature_failed");
        assert_eq!(json["feature_id"], "a");
        assert_eq!(json["branchName"], "feature/login");
        assert_eq!(event.feature_id(), Some("a"));
    }

    #[tokio::test]
    async fn test_reporter_appends_activity_in_background() {
        let temp = tempfile::TempDir::new().unwrap();
        let key = WorkspaceKey::primary(temp.path());
        let sink = Arc::new(RecordingEventSink::new());
        let reporter = EventReporter::new(sink.clone(), true);

        reporter.report(
            &key,
            AutoModeEventKind::LoopStopped {
                reason: "stopped".into(),
            },
        );
        reporter.note(&key, "selected `a`");
        assert_eq!(sink.events().len(), 1);

        let path = ActivityLogger::for_project(temp.path()).path().to_path_buf();
        let mut content = String::new();
        for _ in 0..100 {
            content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("**Loop stopped**: stopped"));
        assert!(lines[1].contains("selected `a`"));
    }

    #[test]
    fn test_reporter_without_activity_log_needs_no_runtime() {
        let sink = Arc::new(RecordingEventSink::new());
        let reporter = EventReporter::new(sink.clone(), false);
        reporter.report(&key(), AutoModeEventKind::LoopIdle);
        reporter.note(&key(), "dropped");
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_recording_sink_filters_by_feature() {
        let sink = RecordingEventSink::new();
        sink.emit(AutoModeEvent::new(&key(), AutoModeEventKind::LoopIdle));
        sink.emit(AutoModeEvent::new(
            &key(),
            AutoModeEventKind::FeatureProgress {
                feature_id: "a".into(),
                text: "hi".into(),
            },
        ));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.for_feature("a").len(), 1);
    }
}
