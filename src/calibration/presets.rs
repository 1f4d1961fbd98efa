use super::markers::{default_marker_configs, ColorMarkerConfig};
use crate::error::CalibrationError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// Identifier of the built-in preset, which is never stored or deleted
pub const DEFAULT_PRESET_ID: &str = "default";

/// A named, reusable set of marker assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPreset {
    pub id: String,
    pub name: String,
    pub configs: Vec<ColorMarkerConfig>,
    pub created_at: DateTime<Utc>,
}

impl MarkerPreset {
    /// The built-in 8-color preset
    pub fn builtin_default() -> Self {
        Self {
            id: DEFAULT_PRESET_ID.to_string(),
            name: "Default 8-color".to_string(),
            configs: default_marker_configs(),
            created_at: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.id == DEFAULT_PRESET_ID
    }
}

/// Durable keyed list of user presets
#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn load(&self) -> Result<Vec<MarkerPreset>, CalibrationError>;

    /// Replace the stored list with `presets`
    async fn save(&self, presets: &[MarkerPreset]) -> Result<(), CalibrationError>;
}

/// Presets kept as a pretty-printed JSON array on disk
pub struct JsonPresetStore {
    path: PathBuf,
}

impl JsonPresetStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PresetStore for JsonPresetStore {
    async fn load(&self) -> Result<Vec<MarkerPreset>, CalibrationError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("No preset file at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .await
            .map_err(|e| CalibrationError::Store {
                details: format!("Failed to read {}: {}", self.path.display(), e),
            })?;

        let presets: Vec<MarkerPreset> =
            serde_json::from_str(&contents).map_err(|e| CalibrationError::Store {
                details: format!("Failed to parse {}: {}", self.path.display(), e),
            })?;

        info!("Loaded {} marker presets from {}", presets.len(), self.path.display());
        Ok(presets)
    }

    async fn save(&self, presets: &[MarkerPreset]) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(presets).map_err(|e| CalibrationError::Store {
            details: format!("Failed to serialize presets: {}", e),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CalibrationError::Store {
                    details: format!("Failed to create {}: {}", parent.display(), e),
                })?;
        }

        fs::write(&self.path, json)
            .await
            .map_err(|e| CalibrationError::Store {
                details: format!("Failed to write {}: {}", self.path.display(), e),
            })?;

        debug!("Saved {} marker presets to {}", presets.len(), self.path.display());
        Ok(())
    }
}

/// Process-local preset list
#[derive(Default)]
pub struct MemoryPresetStore {
    presets: Mutex<Vec<MarkerPreset>>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresetStore for MemoryPresetStore {
    async fn load(&self) -> Result<Vec<MarkerPreset>, CalibrationError> {
        Ok(self.presets.lock().clone())
    }

    async fn save(&self, presets: &[MarkerPreset]) -> Result<(), CalibrationError> {
        *self.presets.lock() = presets.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_preset(name: &str) -> MarkerPreset {
        MarkerPreset {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            configs: default_marker_configs(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPresetStore::new(dir.path().join("nested").join("presets.json"));

        assert!(store.load().await.unwrap().is_empty());

        let presets = vec![sample_preset("Harness A"), sample_preset("Short fur")];
        store.save(&presets).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, presets);
    }

    #[tokio::test]
    async fn test_json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let store = JsonPresetStore::new(&path);
        assert!(matches!(store.load().await, Err(CalibrationError::Store { .. })));
    }

    #[test]
    fn test_builtin_default() {
        let preset = MarkerPreset::builtin_default();
        assert!(preset.is_builtin());
        assert_eq!(preset.configs.len(), 8);
    }
}
