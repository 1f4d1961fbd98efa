use super::markers::{
    default_marker_configs, palette_color, recompute_position_orders, validate_configs,
    ColorMarkerConfig, DetectedPoint, DetectionMode, HsvRange,
};
use super::presets::{MarkerPreset, PresetStore, DEFAULT_PRESET_ID};
use crate::error::CalibrationError;
use crate::pose::AngleJoint;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `color_name -> joint` projection sent to the inference service
pub type LabelMapping = BTreeMap<String, AngleJoint>;

/// Point-in-time view of the calibration phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub mode: DetectionMode,
    pub detected_points: Vec<DetectedPoint>,
    pub is_confirmed: bool,
    pub label_mapping: LabelMapping,
    pub marker_configs: Vec<ColorMarkerConfig>,
}

/// Owns marker-to-joint assignment and the preset library
pub struct CalibrationCoordinator {
    mode: DetectionMode,
    configs: Vec<ColorMarkerConfig>,
    detected_points: Vec<DetectedPoint>,
    confirmed: Option<LabelMapping>,
    presets: Vec<MarkerPreset>,
    store: Arc<dyn PresetStore>,
}

impl CalibrationCoordinator {
    pub fn new(mode: DetectionMode, store: Arc<dyn PresetStore>) -> Self {
        let mut configs = default_marker_configs();
        recompute_position_orders(&mut configs);
        Self {
            mode,
            configs,
            detected_points: Vec::new(),
            confirmed: None,
            presets: Vec::new(),
            store,
        }
    }

    /// Pull the stored preset list into memory
    pub async fn load_presets(&mut self) -> Result<usize, CalibrationError> {
        let stored = self.store.load().await?;
        self.presets = stored
            .into_iter()
            .filter(|preset| {
                if preset.is_builtin() {
                    warn!("Ignoring stored preset that shadows the built-in default");
                    false
                } else {
                    true
                }
            })
            .collect();
        Ok(self.presets.len())
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DetectionMode) -> Result<(), CalibrationError> {
        self.ensure_editable()?;
        if self.mode != mode {
            info!("Detection mode changed: {} -> {}", self.mode, mode);
            self.mode = mode;
            self.detected_points.clear();
        }
        Ok(())
    }

    pub fn configs(&self) -> &[ColorMarkerConfig] {
        &self.configs
    }

    /// Replace the full marker assignment
    pub fn set_configs(&mut self, mut configs: Vec<ColorMarkerConfig>) -> Result<(), CalibrationError> {
        self.ensure_editable()?;
        validate_configs(&configs)?;
        recompute_position_orders(&mut configs);
        self.configs = configs;
        Ok(())
    }

    /// Move `joint` onto `color_name`. The joint adopts the range and display
    /// color already used by that color, falling back to the built-in palette.
    pub fn assign_color(&mut self, joint: AngleJoint, color_name: &str) -> Result<(), CalibrationError> {
        self.ensure_editable()?;

        let (hsv_range, display_color) = match self
            .configs
            .iter()
            .find(|c| c.color_name == color_name && c.joint_name != joint)
        {
            Some(existing) => (existing.hsv_range, existing.display_color.clone()),
            None => palette_color(color_name)
                .map(|(range, display)| (range, display.to_string()))
                .ok_or_else(|| CalibrationError::UnknownColor {
                    color_name: color_name.to_string(),
                })?,
        };

        let config = self
            .configs
            .iter_mut()
            .find(|c| c.joint_name == joint)
            .ok_or_else(|| CalibrationError::UnsupportedJoint {
                joint: joint.to_string(),
            })?;

        debug!("Assigning {} to {} (was {})", joint, color_name, config.color_name);
        config.color_name = color_name.to_string();
        config.hsv_range = hsv_range;
        config.display_color = display_color;

        recompute_position_orders(&mut self.configs);
        Ok(())
    }

    /// Change the HSV window of a color for every joint that wears it
    pub fn set_color_range(&mut self, color_name: &str, range: HsvRange) -> Result<usize, CalibrationError> {
        self.ensure_editable()?;
        range.validate()?;

        let mut updated = 0;
        for config in self.configs.iter_mut().filter(|c| c.color_name == color_name) {
            config.hsv_range = range;
            updated += 1;
        }

        if updated == 0 {
            return Err(CalibrationError::UnknownColor {
                color_name: color_name.to_string(),
            });
        }
        debug!("Updated HSV range of {} on {} markers", color_name, updated);
        Ok(updated)
    }

    /// Replace the detections from the latest calibration frame. Points whose
    /// suggested label is not a marker joint are dropped.
    pub fn set_detected_points(&mut self, points: Vec<DetectedPoint>) -> usize {
        let total = points.len();
        self.detected_points = points
            .into_iter()
            .filter(|point| {
                let known = point.suggested_joint().is_some();
                if !known {
                    warn!(
                        "Dropping detection {} with unknown label '{}'",
                        point.id, point.suggested_label
                    );
                }
                known
            })
            .collect();
        debug!("Accepted {}/{} calibration detections", self.detected_points.len(), total);
        self.detected_points.len()
    }

    pub fn detected_points(&self) -> &[DetectedPoint] {
        &self.detected_points
    }

    /// Project the current configs onto `color_name -> joint`. When several
    /// joints share a color the topmost one (position order 1) is mapped.
    pub fn label_mapping(&self) -> LabelMapping {
        let mut mapping = LabelMapping::new();
        let mut ranks: BTreeMap<&str, u8> = BTreeMap::new();
        for config in &self.configs {
            let better = ranks
                .get(config.color_name.as_str())
                .map_or(true, |rank| config.position_order < *rank);
            if better {
                ranks.insert(config.color_name.as_str(), config.position_order);
                mapping.insert(config.color_name.clone(), config.joint_name);
            }
        }
        mapping
    }

    /// Freeze the label mapping. Terminal until `reset`.
    pub fn confirm(&mut self) -> Result<LabelMapping, CalibrationError> {
        self.ensure_editable()?;
        let mapping = self.label_mapping();
        info!("Calibration confirmed with {} color labels", mapping.len());
        self.confirmed = Some(mapping.clone());
        Ok(mapping)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }

    /// Leave the confirmed state and drop stale detections
    pub fn reset(&mut self) {
        self.confirmed = None;
        self.detected_points.clear();
        debug!("Calibration reset");
    }

    pub fn state(&self) -> CalibrationState {
        CalibrationState {
            mode: self.mode,
            detected_points: self.detected_points.clone(),
            is_confirmed: self.is_confirmed(),
            label_mapping: self.confirmed.clone().unwrap_or_else(|| self.label_mapping()),
            marker_configs: self.configs.clone(),
        }
    }

    /// Built-in default first, then user presets in creation order
    pub fn presets(&self) -> Vec<MarkerPreset> {
        let mut all = Vec::with_capacity(self.presets.len() + 1);
        all.push(MarkerPreset::builtin_default());
        all.extend(self.presets.iter().cloned());
        all
    }

    pub async fn save_preset(&mut self, name: &str) -> Result<MarkerPreset, CalibrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CalibrationError::EmptyPresetName);
        }

        let preset = MarkerPreset {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            configs: self.configs.clone(),
            created_at: Utc::now(),
        };

        let mut updated = self.presets.clone();
        updated.push(preset.clone());
        self.store.save(&updated).await?;
        self.presets = updated;

        info!("Saved marker preset '{}' ({})", preset.name, preset.id);
        Ok(preset)
    }

    /// Replace the current configs with a preset's
    pub fn load_preset(&mut self, id: &str) -> Result<(), CalibrationError> {
        self.ensure_editable()?;

        let mut configs = if id == DEFAULT_PRESET_ID {
            default_marker_configs()
        } else {
            self.presets
                .iter()
                .find(|preset| preset.id == id)
                .map(|preset| preset.configs.clone())
                .ok_or_else(|| CalibrationError::PresetNotFound { id: id.to_string() })?
        };

        validate_configs(&configs)?;
        recompute_position_orders(&mut configs);
        self.configs = configs;
        info!("Loaded marker preset {}", id);
        Ok(())
    }

    pub async fn delete_preset(&mut self, id: &str) -> Result<(), CalibrationError> {
        if id == DEFAULT_PRESET_ID {
            return Err(CalibrationError::DefaultPresetProtected);
        }
        if !self.presets.iter().any(|preset| preset.id == id) {
            return Err(CalibrationError::PresetNotFound { id: id.to_string() });
        }

        let updated: Vec<MarkerPreset> = self
            .presets
            .iter()
            .filter(|preset| preset.id != id)
            .cloned()
            .collect();
        self.store.save(&updated).await?;
        self.presets = updated;

        info!("Deleted marker preset {}", id);
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), CalibrationError> {
        if self.confirmed.is_some() {
            Err(CalibrationError::AlreadyConfirmed)
        } else {
            Ok(())
        }
    }
}
