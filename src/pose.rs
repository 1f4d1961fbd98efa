//! Keypoint vocabulary and the analysis records exchanged with the inference
//! service.
//!
//! The joint set is closed: every [`KeypointSet`] holds all 24 landmarks, and
//! an undetected landmark is a keypoint with confidence 0 rather than a
//! missing entry.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Anatomical landmarks reported by the pose model, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    TailBase,
    TailMid,
    TailTip,
    LeftFrontPaw,
    RightFrontPaw,
    LeftBackPaw,
    RightBackPaw,
}

impl Joint {
    pub const COUNT: usize = 24;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
        Joint::TailBase,
        Joint::TailMid,
        Joint::TailTip,
        Joint::LeftFrontPaw,
        Joint::RightFrontPaw,
        Joint::LeftBackPaw,
        Joint::RightBackPaw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftEye => "left_eye",
            Joint::RightEye => "right_eye",
            Joint::LeftEar => "left_ear",
            Joint::RightEar => "right_ear",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
            Joint::TailBase => "tail_base",
            Joint::TailMid => "tail_mid",
            Joint::TailTip => "tail_tip",
            Joint::LeftFrontPaw => "left_front_paw",
            Joint::RightFrontPaw => "right_front_paw",
            Joint::LeftBackPaw => "left_back_paw",
            Joint::RightBackPaw => "right_back_paw",
        }
    }

    pub fn from_name(name: &str) -> Option<Joint> {
        Joint::ALL.iter().copied().find(|joint| joint.as_str() == name)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tracked landmark
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// Detection confidence in [0, 1]; 0 means not detected
    pub confidence: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn undetected() -> Self {
        Self::default()
    }

    pub fn is_detected(&self, min_confidence: f64) -> bool {
        self.confidence > 0.0 && self.confidence >= min_confidence
    }
}

/// All 24 landmarks of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<String, Keypoint>",
    into = "BTreeMap<Joint, Keypoint>"
)]
pub struct KeypointSet {
    points: [Keypoint; Joint::COUNT],
}

impl KeypointSet {
    /// A set where nothing was detected
    pub fn empty() -> Self {
        Self {
            points: [Keypoint::undetected(); Joint::COUNT],
        }
    }

    pub fn get(&self, joint: Joint) -> Keypoint {
        self.points[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, keypoint: Keypoint) {
        self.points[joint.index()] = keypoint;
    }

    pub fn with(mut self, joint: Joint, keypoint: Keypoint) -> Self {
        self.set(joint, keypoint);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, Keypoint)> + '_ {
        Joint::ALL.iter().map(move |joint| (*joint, self.get(*joint)))
    }

    /// Number of landmarks at or above `min_confidence`
    pub fn detected_count(&self, min_confidence: f64) -> usize {
        self.points
            .iter()
            .filter(|point| point.is_detected(min_confidence))
            .count()
    }
}

impl Default for KeypointSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<HashMap<String, Keypoint>> for KeypointSet {
    fn from(raw: HashMap<String, Keypoint>) -> Self {
        let mut set = KeypointSet::empty();
        for (name, keypoint) in raw {
            match Joint::from_name(&name) {
                Some(joint) => set.set(joint, keypoint),
                None => trace!("Ignoring unknown keypoint '{}'", name),
            }
        }
        set
    }
}

impl From<KeypointSet> for BTreeMap<Joint, Keypoint> {
    fn from(set: KeypointSet) -> Self {
        set.iter().collect()
    }
}

/// The 8 joints that carry an angle measurement (and a color marker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleJoint {
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
}

impl AngleJoint {
    pub const ALL: [AngleJoint; 8] = [
        AngleJoint::LeftShoulder,
        AngleJoint::RightShoulder,
        AngleJoint::LeftElbow,
        AngleJoint::RightElbow,
        AngleJoint::LeftHip,
        AngleJoint::RightHip,
        AngleJoint::LeftKnee,
        AngleJoint::RightKnee,
    ];

    /// Left/right pairs compared for symmetry
    pub const PAIRS: [(AngleJoint, AngleJoint); 4] = [
        (AngleJoint::LeftShoulder, AngleJoint::RightShoulder),
        (AngleJoint::LeftElbow, AngleJoint::RightElbow),
        (AngleJoint::LeftHip, AngleJoint::RightHip),
        (AngleJoint::LeftKnee, AngleJoint::RightKnee),
    ];

    pub fn joint(&self) -> Joint {
        match self {
            AngleJoint::LeftShoulder => Joint::LeftShoulder,
            AngleJoint::RightShoulder => Joint::RightShoulder,
            AngleJoint::LeftElbow => Joint::LeftElbow,
            AngleJoint::RightElbow => Joint::RightElbow,
            AngleJoint::LeftHip => Joint::LeftHip,
            AngleJoint::RightHip => Joint::RightHip,
            AngleJoint::LeftKnee => Joint::LeftKnee,
            AngleJoint::RightKnee => Joint::RightKnee,
        }
    }

    pub fn from_joint(joint: Joint) -> Option<AngleJoint> {
        AngleJoint::ALL.iter().copied().find(|j| j.joint() == joint)
    }

    pub fn as_str(&self) -> &'static str {
        self.joint().as_str()
    }

    /// Rank in the anatomical top-to-bottom ordering used to tell apart
    /// markers that share a color: shoulders, elbows, hips, knees, left
    /// before right.
    pub fn anatomical_rank(&self) -> u8 {
        match self {
            AngleJoint::LeftShoulder => 0,
            AngleJoint::RightShoulder => 1,
            AngleJoint::LeftElbow => 2,
            AngleJoint::RightElbow => 3,
            AngleJoint::LeftHip => 4,
            AngleJoint::RightHip => 5,
            AngleJoint::LeftKnee => 6,
            AngleJoint::RightKnee => 7,
        }
    }

    /// The (A, vertex, B) triplet whose angle at the vertex is this joint's angle
    pub fn triplet(&self) -> (Joint, Joint, Joint) {
        match self {
            AngleJoint::LeftShoulder => (Joint::LeftElbow, Joint::LeftShoulder, Joint::LeftHip),
            AngleJoint::RightShoulder => {
                (Joint::RightElbow, Joint::RightShoulder, Joint::RightHip)
            }
            AngleJoint::LeftElbow => (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist),
            AngleJoint::RightElbow => {
                (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist)
            }
            AngleJoint::LeftHip => (Joint::LeftShoulder, Joint::LeftHip, Joint::LeftKnee),
            AngleJoint::RightHip => (Joint::RightShoulder, Joint::RightHip, Joint::RightKnee),
            AngleJoint::LeftKnee => (Joint::LeftHip, Joint::LeftKnee, Joint::LeftAnkle),
            AngleJoint::RightKnee => (Joint::RightHip, Joint::RightKnee, Joint::RightAnkle),
        }
    }
}

impl std::fmt::Display for AngleJoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joint angles in degrees, each within [0, 180] and rounded to 0.1
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointAngles {
    pub left_shoulder: f64,
    pub right_shoulder: f64,
    pub left_elbow: f64,
    pub right_elbow: f64,
    pub left_hip: f64,
    pub right_hip: f64,
    pub left_knee: f64,
    pub right_knee: f64,
}

impl JointAngles {
    pub fn get(&self, joint: AngleJoint) -> f64 {
        match joint {
            AngleJoint::LeftShoulder => self.left_shoulder,
            AngleJoint::RightShoulder => self.right_shoulder,
            AngleJoint::LeftElbow => self.left_elbow,
            AngleJoint::RightElbow => self.right_elbow,
            AngleJoint::LeftHip => self.left_hip,
            AngleJoint::RightHip => self.right_hip,
            AngleJoint::LeftKnee => self.left_knee,
            AngleJoint::RightKnee => self.right_knee,
        }
    }

    pub fn set(&mut self, joint: AngleJoint, degrees: f64) {
        let slot = match joint {
            AngleJoint::LeftShoulder => &mut self.left_shoulder,
            AngleJoint::RightShoulder => &mut self.right_shoulder,
            AngleJoint::LeftElbow => &mut self.left_elbow,
            AngleJoint::RightElbow => &mut self.right_elbow,
            AngleJoint::LeftHip => &mut self.left_hip,
            AngleJoint::RightHip => &mut self.right_hip,
            AngleJoint::LeftKnee => &mut self.left_knee,
            AngleJoint::RightKnee => &mut self.right_knee,
        };
        *slot = degrees;
    }

    /// Left-side and right-side angles of the symmetry pairs, index-aligned
    pub fn paired_sides(&self) -> (Vec<f64>, Vec<f64>) {
        AngleJoint::PAIRS
            .iter()
            .map(|(left, right)| (self.get(*left), self.get(*right)))
            .unzip()
    }
}

/// Locomotion quality indicators derived for one result
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GaitMetrics {
    /// px/s
    pub speed: f64,
    /// px
    pub stride_length: f64,
    /// steps/min
    pub cadence: f64,
    /// [0, 1], 1 = perfectly symmetric
    pub symmetry: f64,
    /// [0, 1], 1 = perfectly smooth
    pub smoothness: f64,
}

/// One inference result as delivered by the `result` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Client timestamp of the frame this result belongs to (ms)
    pub timestamp: i64,
    #[serde(default)]
    pub keypoints: Option<KeypointSet>,
    #[serde(default)]
    pub joint_angles: Option<JointAngles>,
    #[serde(default)]
    pub gait_metrics: Option<GaitMetrics>,
    #[serde(default)]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_names_round_trip_through_lookup() {
        for joint in Joint::ALL {
            assert_eq!(Joint::from_name(joint.as_str()), Some(joint));
        }
        assert_eq!(Joint::from_name("left_front_paw"), Some(Joint::LeftFrontPaw));
        assert_eq!(Joint::from_name("left_antenna"), None);
    }

    #[test]
    fn test_missing_keys_deserialize_as_undetected() {
        let json = r#"{
            "nose": {"x": 10.0, "y": 20.0, "confidence": 0.9},
            "left_hip": {"x": 5.0, "y": 6.0, "confidence": 0.7},
            "unexpected_point": {"x": 1.0, "y": 1.0, "confidence": 1.0}
        }"#;
        let set: KeypointSet = serde_json::from_str(json).unwrap();

        assert_eq!(set.get(Joint::Nose), Keypoint::new(10.0, 20.0, 0.9));
        assert_eq!(set.get(Joint::LeftHip).confidence, 0.7);
        assert_eq!(set.get(Joint::TailTip), Keypoint::undetected());
        assert_eq!(set.iter().count(), Joint::COUNT);
        assert_eq!(set.detected_count(0.3), 2);
    }

    #[test]
    fn test_serialized_set_contains_every_joint() {
        let set = KeypointSet::empty().with(Joint::LeftFrontPaw, Keypoint::new(1.0, 2.0, 0.5));
        let value = serde_json::to_value(&set).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), Joint::COUNT);
        assert_eq!(object["left_front_paw"]["y"], 2.0);
        assert_eq!(object["right_back_paw"]["confidence"], 0.0);
    }

    #[test]
    fn test_result_with_null_detection() {
        let json = r#"{"timestamp": 1700, "keypoints": null, "joint_angles": null,
                       "gait_metrics": null, "confidence": 0.0}"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.timestamp, 1700);
        assert!(result.keypoints.is_none());
        assert!(result.gait_metrics.is_none());
    }

    #[test]
    fn test_anatomical_rank_is_top_to_bottom() {
        let mut joints = AngleJoint::ALL.to_vec();
        joints.reverse();
        joints.sort_by_key(|joint| joint.anatomical_rank());
        assert_eq!(joints, AngleJoint::ALL.to_vec());
        assert!(AngleJoint::LeftShoulder.anatomical_rank() < AngleJoint::LeftKnee.anatomical_rank());
    }

    #[test]
    fn test_paired_sides() {
        let mut angles = JointAngles::default();
        angles.set(AngleJoint::LeftHip, 120.0);
        angles.set(AngleJoint::RightHip, 100.0);
        let (left, right) = angles.paired_sides();
        assert_eq!(left, vec![0.0, 0.0, 120.0, 0.0]);
        assert_eq!(right, vec![0.0, 0.0, 100.0, 0.0]);
    }
}
