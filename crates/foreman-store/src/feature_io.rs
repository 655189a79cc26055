//! Feature record I/O.
//!
//! Async helpers for reading and writing `feature.json` files and the agent
//! output kept next to them.

use foreman_core::{Feature, ForemanError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Per-project data directory
pub const DATA_DIR: &str = ".foreman";
/// Record file inside a feature directory
pub const FEATURE_FILE: &str = "feature.json";
/// Retained agent output inside a feature directory
pub const AGENT_OUTPUT_FILE: &str = "agent-output.md";

pub fn features_dir(project: &Path) -> PathBuf {
    project.join(DATA_DIR).join("features")
}

pub fn archive_dir(project: &Path) -> PathBuf {
    project.join(DATA_DIR).join("archive")
}

pub fn feature_dir(project: &Path, id: &str) -> PathBuf {
    features_dir(project).join(id)
}

/// Reject ids that would escape the features directory.
pub fn validate_id(id: &str) -> Result<()> {
    let bad = id.trim().is_empty()
        || id.contains(['/', '\\'])
        || id == "."
        || id == ".."
        || id.chars().any(char::is_control);

    if bad {
        return Err(ForemanError::InvalidFeature(format!(
            "invalid feature id: {:?}",
            id
        )));
    }
    Ok(())
}

/// Read and parse a single `feature.json`.
pub async fn read_feature_file(path: &Path) -> Result<Feature> {
    debug!("Reading feature file: {}", path.display());

    let data = fs::read(path).await?;
    let feature: Feature = serde_json::from_slice(&data)?;
    validate_id(&feature.id)?;

    Ok(feature)
}

/// Write a feature as pretty-printed JSON.
///
/// The record goes to a temp file first and is renamed into place, so a
/// reader never sees a half-written file.
pub async fn write_feature_file(dir: &Path, feature: &Feature) -> Result<()> {
    validate_id(&feature.id)?;
    fs::create_dir_all(dir).await?;

    let data = serde_json::to_vec_pretty(feature)?;
    let path = dir.join(FEATURE_FILE);
    let tmp = dir.join(format!("{}.tmp", FEATURE_FILE));

    debug!("Writing feature file: {}", path.display());
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, &path).await?;

    Ok(())
}

/// Read every feature record below `root` (`<root>/<id>/feature.json`).
///
/// Unreadable records are skipped with a warning. A missing directory
/// yields an empty list. Results are sorted by creation time, then id.
pub async fn read_all_features(root: &Path) -> Result<Vec<Feature>> {
    debug!("Reading all features from: {}", root.display());

    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Feature directory does not exist, returning empty list");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut features = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path().join(FEATURE_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }

        match read_feature_file(&path).await {
            Ok(feature) => features.push(feature),
            Err(e) => {
                warn!("Skipping unreadable feature record {}: {}", path.display(), e);
            }
        }
    }

    features.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    debug!("Read {} features", features.len());
    Ok(features)
}

/// Overwrite the retained agent output of a feature.
pub async fn write_agent_output(dir: &Path, content: &str) -> Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(dir.join(AGENT_OUTPUT_FILE), content).await?;
    Ok(())
}

/// Read the retained agent output, if any.
pub async fn read_agent_output(dir: &Path) -> Result<Option<String>> {
    match fs::read_to_string(dir.join(AGENT_OUTPUT_FILE)).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
