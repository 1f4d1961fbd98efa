//! Gait geometry: pure functions from keypoints and trajectories to angles,
//! distances, symmetry, smoothness, cadence, speed and stride length.
//!
//! None of these functions fail. Degenerate input (too few points, empty or
//! mismatched sequences, zero durations) maps to a fixed fallback value.

use crate::calibration::DetectionMode;
use crate::pose::{AngleJoint, GaitMetrics, Joint, JointAngles, KeypointSet};
use crate::trajectory::TrajectoryPoint;

/// Fewer points than this and cadence is reported as 0
pub const MIN_CADENCE_POINTS: usize = 10;
/// Fewer points than this and smoothness is reported as 1
pub const MIN_SMOOTHNESS_POINTS: usize = 4;
/// Fewer points than this and stride length is reported as 0
pub const MIN_STRIDE_POINTS: usize = 10;
/// Horizontal travel (px) below which a reversal is not counted as a stride
pub const MIN_STRIDE_PX: f64 = 10.0;
/// Velocity-difference variance that maps to smoothness 0
const SMOOTHNESS_VARIANCE_SCALE: f64 = 1000.0;

/// Anything with planar coordinates
pub trait Planar {
    fn x(&self) -> f64;
    fn y(&self) -> f64;
}

impl Planar for crate::pose::Keypoint {
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
}

impl Planar for TrajectoryPoint {
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
}

impl Planar for (f64, f64) {
    fn x(&self) -> f64 {
        self.0
    }
    fn y(&self) -> f64 {
        self.1
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Angle at `vertex` between the rays towards `a` and `b`, in degrees
/// within [0, 180], rounded to 0.1.
pub fn angle<P: Planar>(a: &P, vertex: &P, b: &P) -> f64 {
    let to_b = (b.y() - vertex.y()).atan2(b.x() - vertex.x());
    let to_a = (a.y() - vertex.y()).atan2(a.x() - vertex.x());
    let mut degrees = (to_b - to_a).abs().to_degrees();
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    round_to(degrees, 1)
}

pub fn distance<P: Planar, Q: Planar>(a: &P, b: &Q) -> f64 {
    ((b.x() - a.x()).powi(2) + (b.y() - a.y()).powi(2)).sqrt()
}

/// Angles of the 8 tracked joints.
///
/// A joint whose triplet contains a keypoint below `min_confidence` reads
/// 0.0. Color markers sit on shoulders, elbows, hips and knees only, so in
/// [`DetectionMode::ColorMarker`] the elbow and knee angles (which need
/// wrists and ankles) are 0.0.
pub fn joint_angles(keypoints: &KeypointSet, mode: DetectionMode, min_confidence: f64) -> JointAngles {
    let mut angles = JointAngles::default();

    for joint in AngleJoint::ALL {
        let needs_extremity = matches!(
            joint,
            AngleJoint::LeftElbow
                | AngleJoint::RightElbow
                | AngleJoint::LeftKnee
                | AngleJoint::RightKnee
        );
        if mode == DetectionMode::ColorMarker && needs_extremity {
            continue;
        }

        let (a, vertex, b) = joint.triplet();
        let (a, vertex, b) = (keypoints.get(a), keypoints.get(vertex), keypoints.get(b));
        if [a, vertex, b]
            .iter()
            .all(|point| point.is_detected(min_confidence))
        {
            angles.set(joint, angle(&a, &vertex, &b));
        }
    }

    angles
}

/// Midpoint between the hips, when both are detected
pub fn hip_center(keypoints: &KeypointSet, min_confidence: f64) -> Option<(f64, f64)> {
    let left = keypoints.get(Joint::LeftHip);
    let right = keypoints.get(Joint::RightHip);
    if !left.is_detected(min_confidence) || !right.is_detected(min_confidence) {
        return None;
    }
    Some(((left.x + right.x) / 2.0, (left.y + right.y) / 2.0))
}

/// Left/right symmetry of index-aligned angle sequences, in [0, 1].
///
/// Each index contributes `|left - right| / max(left, right)`; indices where
/// both sides are 0 are skipped. Empty or unequal-length input yields 0.
/// When every index is skipped the sides are identical and the score is 1.
pub fn symmetry(left: &[f64], right: &[f64]) -> f64 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }

    let differences: Vec<f64> = left
        .iter()
        .zip(right)
        .filter_map(|(l, r)| {
            let max = l.max(*r);
            if max == 0.0 {
                None
            } else {
                Some((l - r).abs() / max)
            }
        })
        .collect();

    if differences.is_empty() {
        return 1.0;
    }

    let mean = differences.iter().sum::<f64>() / differences.len() as f64;
    (1.0 - mean).max(0.0)
}

/// Step velocities (px/s), skipping steps with no elapsed time
fn velocities(points: &[TrajectoryPoint]) -> Vec<f64> {
    points
        .windows(2)
        .filter_map(|step| {
            let elapsed_ms = step[1].timestamp_ms - step[0].timestamp_ms;
            if elapsed_ms <= 0 {
                None
            } else {
                Some(distance(&step[0], &step[1]) / (elapsed_ms as f64 / 1000.0))
            }
        })
        .collect()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Movement smoothness in [0, 1] from the variance of consecutive velocity
/// changes (a jerk proxy). 1 when there is too little data to judge.
pub fn smoothness(points: &[TrajectoryPoint]) -> f64 {
    if points.len() < MIN_SMOOTHNESS_POINTS {
        return 1.0;
    }

    let velocities = velocities(points);
    if velocities.len() < 2 {
        return 1.0;
    }

    let changes: Vec<f64> = velocities.windows(2).map(|v| (v[1] - v[0]).abs()).collect();
    let variance = variance(&changes);

    (1.0 - (variance / SMOOTHNESS_VARIANCE_SCALE).min(1.0)).max(0.0)
}

/// Vertical direction of travel between two samples; `None` when flat
fn vertical_direction(from: &TrajectoryPoint, to: &TrajectoryPoint) -> Option<i8> {
    if to.y > from.y {
        Some(1)
    } else if to.y < from.y {
        Some(-1)
    } else {
        None
    }
}

fn elapsed_ms(points: &[TrajectoryPoint]) -> i64 {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
        _ => 0,
    }
}

/// Steps per minute from a paw trajectory, rounded to the nearest integer.
///
/// A step is a reversal of the vertical slope from positive to negative.
/// Flat segments keep the previous direction.
pub fn cadence(points: &[TrajectoryPoint]) -> f64 {
    if points.len() < MIN_CADENCE_POINTS {
        return 0.0;
    }

    let duration_ms = elapsed_ms(points);
    if duration_ms <= 0 {
        return 0.0;
    }

    let mut steps = 0u32;
    let mut direction: Option<i8> = None;
    for pair in points.windows(2) {
        if let Some(current) = vertical_direction(&pair[0], &pair[1]) {
            if direction == Some(1) && current == -1 {
                steps += 1;
            }
            direction = Some(current);
        }
    }

    let minutes = duration_ms as f64 / 60_000.0;
    (steps as f64 / minutes).round()
}

/// Path length per second over the whole trajectory
pub fn speed(points: &[TrajectoryPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let duration_ms = elapsed_ms(points);
    if duration_ms <= 0 {
        return 0.0;
    }

    let travelled: f64 = points.windows(2).map(|s| distance(&s[0], &s[1])).sum();
    travelled / (duration_ms as f64 / 1000.0)
}

/// Mean horizontal travel between consecutive vertical reversals.
/// Reversals closer than [`MIN_STRIDE_PX`] are not strides.
pub fn stride_length(points: &[TrajectoryPoint]) -> f64 {
    if points.len() < MIN_STRIDE_POINTS {
        return 0.0;
    }

    let mut strides = Vec::new();
    let mut direction: Option<i8> = None;
    let mut step_start_x = points[0].x;

    for pair in points.windows(2) {
        let Some(current) = vertical_direction(&pair[0], &pair[1]) else {
            continue;
        };
        if direction.is_some_and(|previous| previous != current) {
            let stride = (pair[1].x - step_start_x).abs();
            if stride > MIN_STRIDE_PX {
                strides.push(stride);
            }
            step_start_x = pair[1].x;
        }
        direction = Some(current);
    }

    if strides.is_empty() {
        return 0.0;
    }
    strides.iter().sum::<f64>() / strides.len() as f64
}

/// Assemble the full metrics record for one result.
///
/// `body` is the hip-centre track (speed, smoothness); `reference` is the
/// limb used for stepping (stride, cadence).
pub fn gait_metrics(angles: &JointAngles, body: &[TrajectoryPoint], reference: &[TrajectoryPoint]) -> GaitMetrics {
    let (left, right) = angles.paired_sides();
    GaitMetrics {
        speed: round_to(speed(body), 2),
        stride_length: round_to(stride_length(reference), 2),
        cadence: cadence(reference),
        symmetry: round_to(symmetry(&left, &right), 3),
        smoothness: round_to(smoothness(body), 3),
    }
}
