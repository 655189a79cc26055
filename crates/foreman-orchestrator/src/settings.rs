//! Read-only collaborators: settings and notifications

use async_trait::async_trait;
use foreman_core::{GlobalSettings, Notification, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of global settings, read at the start of every loop
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn global_settings(&self) -> Result<GlobalSettings>;
}

/// Settings loaded from `<data_dir>/settings.toml` on every read
#[derive(Debug, Clone)]
pub struct FileSettingsProvider {
    data_dir: PathBuf,
}

impl FileSettingsProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[async_trait]
impl SettingsProvider for FileSettingsProvider {
    async fn global_settings(&self) -> Result<GlobalSettings> {
        debug!(data_dir = %self.data_dir.display(), "Loading settings");
        GlobalSettings::load_or_default(&self.data_dir)
    }
}

/// Fixed settings (tests, embedding)
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsProvider {
    settings: GlobalSettings,
}

impl StaticSettingsProvider {
    pub fn new(settings: GlobalSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettingsProvider {
    async fn global_settings(&self) -> Result<GlobalSettings> {
        Ok(self.settings.clone())
    }
}

/// External notification store, read by the overview only
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn notifications(&self, project: &Path) -> Result<Vec<Notification>>;
}

/// No notification store configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNotifications;

#[async_trait]
impl NotificationSource for NoNotifications {
    async fn notifications(&self, _project: &Path) -> Result<Vec<Notification>> {
        Ok(Vec::new())
    }
}

/// In-memory notifications
#[derive(Debug, Clone, Default)]
pub struct StaticNotifications {
    notifications: Vec<Notification>,
}

impl StaticNotifications {
    pub fn new(notifications: Vec<Notification>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl NotificationSource for StaticNotifications {
    async fn notifications(&self, project: &Path) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .iter()
            .filter(|n| n.project_path == project)
            .cloned()
            .collect())
    }
}
