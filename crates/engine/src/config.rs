use std::path::{Path, PathBuf};

use fieldsync_core::CreatorApp;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    /// Stamped on every record authored on this device. Submissions fail
    /// until one is set.
    pub creator_id: Option<String>,
    pub creator_app: CreatorApp,
    pub start_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("fieldsync.db"),
            creator_id: None,
            creator_app: CreatorApp::DataCollectionApp,
            start_online: true,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        toml::from_str(source).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }
}
