//! Dashboard-style aggregate of one project's loops, features and notifications

use chrono::{DateTime, Utc};
use foreman_core::fail_open::fail_open;
use foreman_core::{FeatureStatus, ProjectLoopStatus, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auto_mode::AutoModeService;
use crate::run_context::ActiveRunInfo;
use crate::settings::NotificationSource;

/// How many recently active features an overview lists
pub const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFeature {
    pub id: String,
    pub label: String,
    pub status: FeatureStatus,
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOverview {
    pub project_path: PathBuf,
    pub loops: Vec<ProjectLoopStatus>,
    pub active_runs: Vec<ActiveRunInfo>,
    /// Feature counts keyed by status name; every status is present
    pub counts: BTreeMap<String, usize>,
    pub unread_notifications: usize,
    pub recent: Vec<RecentFeature>,
}

impl ProjectOverview {
    pub fn total_features(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, status: FeatureStatus) -> usize {
        self.counts.get(&status.to_string()).copied().unwrap_or(0)
    }
}

pub struct OverviewAggregator {
    service: AutoModeService,
    notifications: Arc<dyn NotificationSource>,
}

impl OverviewAggregator {
    pub fn new(service: AutoModeService, notifications: Arc<dyn NotificationSource>) -> Self {
        Self {
            service,
            notifications,
        }
    }

    /// Overview of one project
    ///
    /// A failing notification source counts as zero unread.
    pub async fn overview(&self, project: &Path) -> Result<ProjectOverview> {
        let features = self.service.context().store.list(project).await?;

        let mut counts: BTreeMap<String, usize> = FeatureStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for feature in &features {
            *counts.entry(feature.status.to_string()).or_default() += 1;
        }

        let mut recent: Vec<RecentFeature> = features
            .iter()
            .map(|f| RecentFeature {
                id: f.id.clone(),
                label: f.label().to_string(),
                status: f.status,
                last_activity_at: f.last_activity_at(),
            })
            .collect();
        recent.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        recent.truncate(RECENT_LIMIT);

        let loops = self
            .service
            .active_loops()
            .into_iter()
            .filter(|s| s.project_path == project)
            .collect();
        let active_runs = self
            .service
            .runs()
            .all()
            .into_iter()
            .filter(|r| r.key.project() == project)
            .collect();

        let unread_notifications = fail_open("read notifications", || {
            self.notifications.notifications(project)
        })
        .await
        .map_or(0, |all| all.iter().filter(|n| !n.read).count());

        Ok(ProjectOverview {
            project_path: project.to_path_buf(),
            loops,
            active_runs,
            counts,
            unread_notifications,
            recent,
        })
    }

    /// Overviews of every project registered in settings, in settings order
    pub async fn overview_all(&self) -> Result<Vec<ProjectOverview>> {
        let settings = self.service.context().settings.global_settings().await?;
        let mut overviews = Vec::with_capacity(settings.projects.len());
        for project in &settings.projects {
            overviews.push(self.overview(&project.path).await?);
        }
        Ok(overviews)
    }
}
