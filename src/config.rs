use crate::calibration::DetectionMode;
use crate::media::MAX_CAPTURE_FPS;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GaitConfig {
    pub connection: ConnectionConfig,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub calibration: CalibrationConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    /// Inference service endpoint (e.g. ws://host:8000/ws)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay before each reconnect attempt
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Give up after this many consecutive failed attempts (unbounded when unset)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Upper bound for a single connection handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Frames per second sent to the inference service
    #[serde(default = "default_capture_fps")]
    pub fps: u32,

    /// Directory of still images used by the file-backed camera
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Restart from the first image once the directory is exhausted
    #[serde(default = "default_loop_source")]
    pub loop_source: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    /// Points kept per limb trajectory
    #[serde(default = "default_trajectory_capacity")]
    pub trajectory_capacity: usize,

    /// Keypoints below this confidence are treated as not detected
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Samples kept for speed/stride/cadence/smoothness
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_mode")]
    pub default_mode: DetectionMode,

    /// JSON file holding saved marker presets
    #[serde(default = "default_presets_path")]
    pub presets_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl ConnectionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl GaitConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("gaitstream.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("connection.endpoint", default_endpoint())?
            .set_default(
                "connection.reconnect_interval_ms",
                default_reconnect_interval_ms(),
            )?
            .set_default("connection.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("capture.fps", default_capture_fps())?
            .set_default("capture.source_dir", default_source_dir())?
            .set_default("capture.loop_source", default_loop_source())?
            .set_default(
                "analysis.trajectory_capacity",
                default_trajectory_capacity() as i64,
            )?
            .set_default("analysis.min_confidence", default_min_confidence())?
            .set_default(
                "analysis.history_capacity",
                default_history_capacity() as i64,
            )?
            .set_default("calibration.default_mode", default_mode().as_str())?
            .set_default("calibration.presets_path", default_presets_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // GAITSTREAM_<SECTION>__<KEY>; keys keep their own underscores
            .add_source(
                Environment::with_prefix("GAITSTREAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: GaitConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(ConfigError::Message(
                "Connection endpoint must not be empty".to_string(),
            ));
        }

        if self.connection.reconnect_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Reconnect interval must be greater than 0".to_string(),
            ));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.capture.fps == 0 || self.capture.fps > MAX_CAPTURE_FPS {
            return Err(ConfigError::Message(format!(
                "Capture fps must be between 1 and {}",
                MAX_CAPTURE_FPS
            )));
        }

        if self.analysis.trajectory_capacity == 0 {
            return Err(ConfigError::Message(
                "Trajectory capacity must be greater than 0".to_string(),
            ));
        }

        if self.analysis.history_capacity == 0 {
            return Err(ConfigError::Message(
                "History capacity must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return Err(ConfigError::Message(
                "Minimum confidence must be within [0, 1]".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                endpoint: default_endpoint(),
                reconnect_interval_ms: default_reconnect_interval_ms(),
                max_reconnect_attempts: None,
                connect_timeout_ms: default_connect_timeout_ms(),
            },
            capture: CaptureConfig {
                fps: default_capture_fps(),
                source_dir: default_source_dir(),
                loop_source: default_loop_source(),
            },
            analysis: AnalysisConfig {
                trajectory_capacity: default_trajectory_capacity(),
                min_confidence: default_min_confidence(),
                history_capacity: default_history_capacity(),
            },
            calibration: CalibrationConfig {
                default_mode: default_mode(),
                presets_path: default_presets_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "ws://127.0.0.1:8000/ws".to_string()
}
fn default_reconnect_interval_ms() -> u64 {
    3000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_capture_fps() -> u32 {
    8
}
fn default_source_dir() -> String {
    "./frames".to_string()
}
fn default_loop_source() -> bool {
    true
}

fn default_trajectory_capacity() -> usize {
    200
}
fn default_min_confidence() -> f64 {
    0.3
}
fn default_history_capacity() -> usize {
    100
}

fn default_mode() -> DetectionMode {
    DetectionMode::AiPose
}
fn default_presets_path() -> String {
    "./marker_presets.json".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GaitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.fps, 8);
        assert_eq!(config.analysis.trajectory_capacity, 200);
        assert_eq!(config.connection.reconnect_interval(), Duration::from_secs(3));
        assert!(config.connection.max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[connection]
endpoint = "ws://inference.local:9000/ws"
max_reconnect_attempts = 4

[capture]
fps = 12

[calibration]
default_mode = "color_marker"
"#
        )
        .unwrap();

        let config = GaitConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.connection.endpoint, "ws://inference.local:9000/ws");
        assert_eq!(config.connection.max_reconnect_attempts, Some(4));
        assert_eq!(config.capture.fps, 12);
        assert_eq!(config.calibration.default_mode, DetectionMode::ColorMarker);
        // Untouched sections fall back to defaults
        assert_eq!(config.analysis.min_confidence, 0.3);
        assert_eq!(config.system.event_bus_capacity, 100);
    }

    #[test]
    fn test_environment_overrides_underscored_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("GAITSTREAM_ANALYSIS__HISTORY_CAPACITY", "42");
        let config = GaitConfig::load_from_file(dir.path().join("absent.toml"));
        std::env::remove_var("GAITSTREAM_ANALYSIS__HISTORY_CAPACITY");

        let config = config.unwrap();
        assert_eq!(config.analysis.history_capacity, 42);
        assert_eq!(config.capture.fps, 8);
    }

    #[test]
    fn test_config_validation() {
        let mut config = GaitConfig::default();

        config.capture.fps = 0;
        assert!(config.validate().is_err());
        config.capture.fps = 2_000_000;
        assert!(config.validate().is_err());
        config.capture.fps = 8;

        config.analysis.min_confidence = 1.5;
        assert!(config.validate().is_err());
        config.analysis.min_confidence = 0.3;

        config.connection.endpoint = "  ".to_string();
        assert!(config.validate().is_err());
        config.connection.endpoint = default_endpoint();

        assert!(config.validate().is_ok());
    }
}
