use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Last deployed tag, persisted between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployStatus {
    #[serde(default)]
    pub last_tag: String,
    #[serde(default)]
    pub last_deployed: Option<DateTime<Utc>>,
}

/// JSON-file persistence for [`DeployStatus`]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Anchor the status file under the given storage directory, creating it
    /// if needed.
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = storage_dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create storage directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join("status.json"),
        })
    }

    /// Load the stored status; a missing or unreadable file is a fresh start
    pub fn load(&self) -> DeployStatus {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt status file, starting fresh");
                DeployStatus::default()
            }),
            Err(_) => DeployStatus::default(),
        }
    }

    pub fn store(&self, tag: &str) -> Result<()> {
        let status = DeployStatus {
            last_tag: tag.to_string(),
            last_deployed: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&status)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write status file {}", self.path.display()))?;
        Ok(())
    }
}
