use crate::error::CalibrationError;
use crate::pose::AngleJoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// How the inference service locates joints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Model-based pose estimation
    #[default]
    AiPose,
    /// Colored markers attached to the joints
    ColorMarker,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::AiPose => "ai_pose",
            DetectionMode::ColorMarker => "color_marker",
        }
    }
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_pose" => Ok(DetectionMode::AiPose),
            "color_marker" => Ok(DetectionMode::ColorMarker),
            other => Err(format!(
                "unknown detection mode '{}', expected ai_pose or color_marker",
                other
            )),
        }
    }
}

/// Largest hue value in OpenCV's HSV space
pub const HUE_MAX: u8 = 179;

/// Hue/saturation/value window of one marker color.
///
/// `hue_low > hue_high` is a window that wraps through 0 (reds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub hue_low: u8,
    pub hue_high: u8,
    pub sat_low: u8,
    pub sat_high: u8,
    pub val_low: u8,
    pub val_high: u8,
}

impl HsvRange {
    pub const fn new(hue: (u8, u8), sat: (u8, u8), val: (u8, u8)) -> Self {
        Self {
            hue_low: hue.0,
            hue_high: hue.1,
            sat_low: sat.0,
            sat_high: sat.1,
            val_low: val.0,
            val_high: val.1,
        }
    }

    pub fn wraps_hue(&self) -> bool {
        self.hue_low > self.hue_high
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.hue_low > HUE_MAX || self.hue_high > HUE_MAX {
            return Err(CalibrationError::InvalidHsvRange {
                details: format!("hue bounds must be within 0..={}", HUE_MAX),
            });
        }
        if self.sat_low > self.sat_high {
            return Err(CalibrationError::InvalidHsvRange {
                details: format!("saturation low {} above high {}", self.sat_low, self.sat_high),
            });
        }
        if self.val_low > self.val_high {
            return Err(CalibrationError::InvalidHsvRange {
                details: format!("value low {} above high {}", self.val_low, self.val_high),
            });
        }
        Ok(())
    }
}

/// Marker assignment for one joint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMarkerConfig {
    pub joint_name: AngleJoint,
    pub color_name: String,
    pub hsv_range: HsvRange,
    pub display_color: String,
    /// 1-based rank among joints sharing `color_name`, top to bottom
    pub position_order: u8,
}

/// A marker blob found in a calibration frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub suggested_label: String,
    #[serde(default)]
    pub color_name: Option<String>,
    #[serde(default)]
    pub display_color: Option<String>,
    #[serde(default)]
    pub position_order: Option<u8>,
    pub confidence: f64,
}

impl DetectedPoint {
    pub fn suggested_joint(&self) -> Option<AngleJoint> {
        crate::pose::Joint::from_name(&self.suggested_label).and_then(AngleJoint::from_joint)
    }
}

struct PaletteEntry {
    joint: AngleJoint,
    color_name: &'static str,
    hsv_range: HsvRange,
    display_color: &'static str,
}

/// Colors that contrast with fur, one per tracked joint
const DEFAULT_PALETTE: [PaletteEntry; 8] = [
    PaletteEntry {
        joint: AngleJoint::LeftShoulder,
        color_name: "Red",
        hsv_range: HsvRange::new((170, 10), (120, 255), (100, 255)),
        display_color: "#EF4444",
    },
    PaletteEntry {
        joint: AngleJoint::RightShoulder,
        color_name: "Blue",
        hsv_range: HsvRange::new((100, 130), (120, 255), (80, 255)),
        display_color: "#3B82F6",
    },
    PaletteEntry {
        joint: AngleJoint::LeftElbow,
        color_name: "Green",
        hsv_range: HsvRange::new((35, 85), (120, 255), (80, 255)),
        display_color: "#22C55E",
    },
    PaletteEntry {
        joint: AngleJoint::RightElbow,
        color_name: "Yellow",
        hsv_range: HsvRange::new((20, 35), (120, 255), (150, 255)),
        display_color: "#EAB308",
    },
    PaletteEntry {
        joint: AngleJoint::LeftHip,
        color_name: "Orange",
        hsv_range: HsvRange::new((10, 20), (150, 255), (150, 255)),
        display_color: "#F97316",
    },
    PaletteEntry {
        joint: AngleJoint::RightHip,
        color_name: "Purple",
        hsv_range: HsvRange::new((130, 160), (80, 255), (60, 255)),
        display_color: "#A855F7",
    },
    PaletteEntry {
        joint: AngleJoint::LeftKnee,
        color_name: "Pink",
        hsv_range: HsvRange::new((160, 170), (80, 255), (100, 255)),
        display_color: "#EC4899",
    },
    PaletteEntry {
        joint: AngleJoint::RightKnee,
        color_name: "Cyan",
        hsv_range: HsvRange::new((85, 100), (120, 255), (80, 255)),
        display_color: "#06B6D4",
    },
];

/// The built-in 8-color assignment, one distinct color per joint
pub fn default_marker_configs() -> Vec<ColorMarkerConfig> {
    DEFAULT_PALETTE
        .iter()
        .map(|entry| ColorMarkerConfig {
            joint_name: entry.joint,
            color_name: entry.color_name.to_string(),
            hsv_range: entry.hsv_range,
            display_color: entry.display_color.to_string(),
            position_order: 1,
        })
        .collect()
}

/// HSV window and display color of a built-in palette color
pub fn palette_color(color_name: &str) -> Option<(HsvRange, &'static str)> {
    DEFAULT_PALETTE
        .iter()
        .find(|entry| entry.color_name.eq_ignore_ascii_case(color_name))
        .map(|entry| (entry.hsv_range, entry.display_color))
}

/// Renumber `position_order` within every group of configs sharing a
/// color, following the anatomical top-to-bottom ordering of the joints.
/// The result depends only on the (joint, color) assignments, never on the
/// order of `configs`.
pub fn recompute_position_orders(configs: &mut [ColorMarkerConfig]) {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, config) in configs.iter().enumerate() {
        groups.entry(config.color_name.clone()).or_default().push(index);
    }

    for indices in groups.values_mut() {
        indices.sort_by_key(|index| configs[*index].joint_name.anatomical_rank());
        for (rank, index) in indices.iter().enumerate() {
            configs[*index].position_order = (rank + 1) as u8;
        }
    }
}

/// Check that `configs` holds exactly one entry per tracked joint
pub fn validate_configs(configs: &[ColorMarkerConfig]) -> Result<(), CalibrationError> {
    for joint in AngleJoint::ALL {
        let count = configs.iter().filter(|c| c.joint_name == joint).count();
        if count != 1 {
            return Err(CalibrationError::UnsupportedJoint {
                joint: format!("{} (expected exactly one marker, found {})", joint, count),
            });
        }
    }
    for config in configs {
        config.hsv_range.validate()?;
    }
    Ok(())
}
