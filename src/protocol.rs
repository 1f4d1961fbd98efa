//! JSON envelope codec for traffic with the inference service.
//!
//! Every message is `{"type": ..., "data": ..., "timestamp"?: ...}`.

use crate::calibration::{ColorMarkerConfig, DetectedPoint, DetectionMode, LabelMapping};
use crate::error::ProtocolError;
use crate::pose::AnalysisResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Client to service
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame { payload: String, timestamp_ms: i64 },
    SetMode { mode: DetectionMode },
    CalibrateFrame { payload: String },
    ConfirmCalibration { label_mapping: LabelMapping },
    UpdateMarkerConfig { markers: Vec<ColorMarkerConfig> },
}

impl Outbound {
    pub fn message_type(&self) -> &'static str {
        match self {
            Outbound::Frame { .. } => "frame",
            Outbound::SetMode { .. } => "set_mode",
            Outbound::CalibrateFrame { .. } => "calibrate_frame",
            Outbound::ConfirmCalibration { .. } => "confirm_calibration",
            Outbound::UpdateMarkerConfig { .. } => "update_marker_config",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let (data, timestamp) = match self {
            Outbound::Frame { payload, timestamp_ms } => (json!(payload), Some(*timestamp_ms)),
            Outbound::SetMode { mode } => (json!({ "mode": mode }), None),
            Outbound::CalibrateFrame { payload } => (json!(payload), None),
            Outbound::ConfirmCalibration { label_mapping } => {
                (json!({ "label_mapping": label_mapping }), None)
            }
            Outbound::UpdateMarkerConfig { markers } => (json!({ "markers": markers }), None),
        };

        Envelope {
            message_type: self.message_type().to_string(),
            data,
            timestamp,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}

/// Wire shape shared by both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Service to client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Result(AnalysisResult),
    CalibrationResult { detected_points: Vec<DetectedPoint> },
    ModeSet { mode: DetectionMode },
    CalibrationConfirmed,
    Error { message: String },
}

#[derive(Deserialize)]
struct CalibrationResultData {
    #[serde(default)]
    detected_points: Vec<DetectedPoint>,
}

#[derive(Deserialize)]
struct ModeData {
    mode: DetectionMode,
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope {
            message_type, data, ..
        } = envelope;

        let invalid = |message_type: &str, e: serde_json::Error| ProtocolError::InvalidPayload {
            message_type: message_type.to_string(),
            details: e.to_string(),
        };

        match message_type.as_str() {
            "result" => serde_json::from_value(data)
                .map(Inbound::Result)
                .map_err(|e| invalid("result", e)),
            "calibration_result" => serde_json::from_value::<CalibrationResultData>(data)
                .map(|d| Inbound::CalibrationResult {
                    detected_points: d.detected_points,
                })
                .map_err(|e| invalid("calibration_result", e)),
            "mode_set" => serde_json::from_value::<ModeData>(data)
                .map(|d| Inbound::ModeSet { mode: d.mode })
                .map_err(|e| invalid("mode_set", e)),
            "calibration_confirmed" => Ok(Inbound::CalibrationConfirmed),
            "error" => Ok(Inbound::Error {
                message: error_text(data),
            }),
            _ => Err(ProtocolError::UnknownType { message_type }),
        }
    }
}

/// The service sends either a bare string or `{"message": ...}`
fn error_text(data: Value) -> String {
    match data {
        Value::String(message) => message,
        Value::Object(ref map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::default_marker_configs;
    use crate::pose::{AngleJoint, Joint};

    #[test]
    fn test_frame_envelope_carries_timestamp() {
        let text = Outbound::Frame {
            payload: "data:image/jpeg;base64,AAAA".to_string(),
            timestamp_ms: 1_700_000_000_000,
        }
        .encode()
        .unwrap();

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "frame");
        assert_eq!(value["data"], "data:image/jpeg;base64,AAAA");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_calibration_messages() {
        let value = Outbound::SetMode {
            mode: DetectionMode::ColorMarker,
        }
        .to_envelope();
        assert_eq!(value.data, json!({"mode": "color_marker"}));
        assert_eq!(value.timestamp, None);

        let mut mapping = LabelMapping::new();
        mapping.insert("Red".to_string(), AngleJoint::LeftShoulder);
        let value = Outbound::ConfirmCalibration {
            label_mapping: mapping,
        }
        .to_envelope();
        assert_eq!(value.data, json!({"label_mapping": {"Red": "left_shoulder"}}));

        let value = Outbound::UpdateMarkerConfig {
            markers: default_marker_configs(),
        }
        .to_envelope();
        assert_eq!(value.message_type, "update_marker_config");
        assert_eq!(value.data["markers"].as_array().unwrap().len(), 8);
        assert_eq!(value.data["markers"][0]["hsv_range"]["hue_low"], 170);
    }

    #[test]
    fn test_decode_result() {
        let text = r#"{
            "type": "result",
            "data": {
                "timestamp": 1700000000123,
                "keypoints": {"nose": {"x": 10.0, "y": 20.0, "confidence": 0.9}},
                "joint_angles": null,
                "gait_metrics": null,
                "confidence": 0.85
            }
        }"#;

        match Inbound::decode(text).unwrap() {
            Inbound::Result(result) => {
                assert_eq!(result.timestamp, 1_700_000_000_123);
                let keypoints = result.keypoints.unwrap();
                assert_eq!(keypoints.get(Joint::Nose).x, 10.0);
                assert_eq!(keypoints.get(Joint::LeftFrontPaw).confidence, 0.0);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_control_messages() {
        assert_eq!(
            Inbound::decode(r#"{"type": "mode_set", "data": {"mode": "ai_pose"}}"#).unwrap(),
            Inbound::ModeSet {
                mode: DetectionMode::AiPose
            }
        );
        assert_eq!(
            Inbound::decode(r#"{"type": "calibration_confirmed"}"#).unwrap(),
            Inbound::CalibrationConfirmed
        );
        assert_eq!(
            Inbound::decode(r#"{"type": "error", "data": "model not loaded"}"#).unwrap(),
            Inbound::Error {
                message: "model not loaded".to_string()
            }
        );
        assert_eq!(
            Inbound::decode(r#"{"type": "error", "data": {"message": "bad frame"}}"#).unwrap(),
            Inbound::Error {
                message: "bad frame".to_string()
            }
        );

        let decoded = Inbound::decode(
            r#"{"type": "calibration_result", "data": {"detected_points": [
                {"id": "Red_1", "x": 1.0, "y": 2.0, "suggested_label": "left_shoulder", "confidence": 0.5}
            ]}}"#,
        )
        .unwrap();
        match decoded {
            Inbound::CalibrationResult { detected_points } => assert_eq!(detected_points.len(), 1),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            Inbound::decode("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Inbound::decode(r#"{"type": "telemetry", "data": {}}"#),
            Err(ProtocolError::UnknownType { .. })
        ));
        assert!(matches!(
            Inbound::decode(r#"{"type": "mode_set", "data": {"mode": "infrared"}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }
}
