//! Configuration management for Foreman
//!
//! Global settings are loaded from `<data_dir>/settings.toml`. Every field has
//! a default so a partial (or missing) file is always usable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ForemanError, Result};

/// File name of the settings file inside the data directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Global, read-only settings shared by every loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Route Claude traffic through a Claude Code Router endpoint
    #[serde(default)]
    pub ccr_enabled: bool,

    /// Router base URL used when `ccr_enabled` is set
    #[serde(default = "default_ccr_endpoint")]
    pub ccr_endpoint: String,

    /// Environment variable holding the router auth token
    #[serde(default = "default_ccr_api_key_env")]
    pub ccr_api_key_env: String,

    /// Model used when a feature has no override
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Known projects
    #[serde(default)]
    pub projects: Vec<ProjectRef>,

    /// Loop tuning
    #[serde(default)]
    pub auto_mode: AutoModeConfig,
}

/// A project registered with Foreman
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub name: String,
    pub path: PathBuf,
}

/// Orchestration loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoModeConfig {
    /// Agent turn cap per invocation
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// How long a parked continuous loop waits before re-selecting
    #[serde(default = "default_idle_poll_interval_secs")]
    pub idle_poll_interval_secs: u64,

    /// Consecutive failures that pause a loop
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Window the failures must fall within
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Tools the agent may use
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    /// Planning invocations get a lower turn cap
    #[serde(default = "default_plan_max_turns")]
    pub plan_max_turns: u32,
}

fn default_ccr_endpoint() -> String {
    "http://127.0.0.1:3456".to_string()
}

fn default_ccr_api_key_env() -> String {
    "CCR_API_KEY".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_turns() -> u32 {
    100
}

fn default_plan_max_turns() -> u32 {
    20
}

fn default_idle_poll_interval_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failure_window_secs() -> u64 {
    60
}

fn default_allowed_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "Glob", "Grep", "Bash"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            ccr_enabled: false,
            ccr_endpoint: default_ccr_endpoint(),
            ccr_api_key_env: default_ccr_api_key_env(),
            default_model: default_model(),
            projects: Vec::new(),
            auto_mode: AutoModeConfig::default(),
        }
    }
}

impl Default for AutoModeConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_poll_interval_secs: default_idle_poll_interval_secs(),
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            allowed_tools: default_allowed_tools(),
            plan_max_turns: default_plan_max_turns(),
        }
    }
}

impl AutoModeConfig {
    pub fn idle_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_poll_interval_secs)
    }

    pub fn failure_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.failure_window_secs)
    }
}

impl GlobalSettings {
    /// Load settings from `<data_dir>/settings.toml` or use defaults
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| ForemanError::Config(format!("Failed to parse {}: {}", path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default settings to `<data_dir>/settings.toml`
    pub fn write_default(data_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(data_dir)?;

        let path = data_dir.join(SETTINGS_FILE);
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ForemanError::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Look up a registered project by name or path
    pub fn project(&self, name_or_path: &str) -> Option<&ProjectRef> {
        self.projects
            .iter()
            .find(|p| p.name == name_or_path || p.path == Path::new(name_or_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = GlobalSettings::load_or_default(dir.path()).unwrap();
        assert_eq!(settings, GlobalSettings::default());
        assert_eq!(settings.auto_mode.failure_threshold, 3);
        assert_eq!(settings.auto_mode.failure_window_secs, 60);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"
ccr_enabled = true

[[projects]]
name = "app"
path = "/work/app"

[auto_mode]
idle_poll_interval_secs = 1
"#,
        )
        .unwrap();

        let settings = GlobalSettings::load_or_default(dir.path()).unwrap();
        assert!(settings.ccr_enabled);
        assert_eq!(settings.default_model, "sonnet");
        assert_eq!(settings.auto_mode.idle_poll_interval_secs, 1);
        assert_eq!(settings.auto_mode.max_turns, 100);
        assert_eq!(settings.project("app").unwrap().path, PathBuf::from("/work/app"));
        assert!(settings.project("/work/app").is_some());
    }

    #[test]
    fn test_write_default_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = GlobalSettings::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let loaded = GlobalSettings::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, GlobalSettings::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "ccr_enabled = [").unwrap();
        let err = GlobalSettings::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, ForemanError::Config(_)));
    }
}
