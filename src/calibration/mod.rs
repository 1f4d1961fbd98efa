//! Marker calibration: color-to-joint assignment, same-color
//! disambiguation and the preset library.

mod coordinator;
mod markers;
mod presets;


pub use coordinator::{CalibrationCoordinator, CalibrationState, LabelMapping};
pub use markers::{
    default_marker_configs, palette_color, recompute_position_orders, validate_configs,
    ColorMarkerConfig, DetectedPoint, DetectionMode, HsvRange, HUE_MAX,
};
pub use presets::{JsonPresetStore, MarkerPreset, MemoryPresetStore, PresetStore, DEFAULT_PRESET_ID};
