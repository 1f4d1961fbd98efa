use crate::calibration::DetectionMode;
use crate::config::AnalysisConfig;
use crate::events::AnalysisUpdate;
use crate::geometry;
use crate::persistence::MetricsSummary;
use crate::pose::{AnalysisResult, Joint};
use crate::trajectory::{Limb, Trajectory, TrajectoryBuffer, TrajectoryPoint};
use tracing::trace;

/// Folds the result stream of one session into trajectories and metrics
pub struct GaitTracker {
    trajectories: TrajectoryBuffer,
    /// Hip-centre track
    body: Trajectory,
    /// Stepping limb: a paw, or the left elbow when tracking markers
    reference: Trajectory,
    min_confidence: f64,
    summary: MetricsSummary,
}

impl GaitTracker {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            trajectories: TrajectoryBuffer::new(config.trajectory_capacity, config.min_confidence),
            body: Trajectory::new(config.history_capacity),
            reference: Trajectory::new(config.history_capacity),
            min_confidence: config.min_confidence,
            summary: MetricsSummary::default(),
        }
    }

    pub fn reference_joint(mode: DetectionMode) -> Joint {
        match mode {
            DetectionMode::AiPose => Joint::LeftFrontPaw,
            DetectionMode::ColorMarker => Joint::LeftElbow,
        }
    }

    /// Session start
    pub fn reset(&mut self) {
        self.trajectories.reset();
        self.body.clear();
        self.reference.clear();
        self.summary = MetricsSummary::default();
    }

    /// Track one result and derive its angles and metrics. Results without
    /// keypoints pass through whatever the service computed.
    pub fn ingest(&mut self, result: &AnalysisResult, mode: DetectionMode) -> AnalysisUpdate {
        let timestamp = result.timestamp;

        let (joint_angles, gait_metrics) = match &result.keypoints {
            Some(keypoints) => {
                self.trajectories.append_keypoints(keypoints, timestamp);

                if let Some((x, y)) = geometry::hip_center(keypoints, self.min_confidence) {
                    self.body.push(TrajectoryPoint::new(x, y, timestamp));
                }
                let reference = keypoints.get(Self::reference_joint(mode));
                if reference.is_detected(self.min_confidence) {
                    self.reference
                        .push(TrajectoryPoint::new(reference.x, reference.y, timestamp));
                }

                let angles = geometry::joint_angles(keypoints, mode, self.min_confidence);
                let metrics = geometry::gait_metrics(
                    &angles,
                    &self.body.snapshot(),
                    &self.reference.snapshot(),
                );
                (angles, Some(metrics))
            }
            None => {
                trace!("Result {} carries no keypoints", timestamp);
                (result.joint_angles.unwrap_or_default(), result.gait_metrics)
            }
        };

        if let Some(metrics) = &gait_metrics {
            self.summary.record(metrics);
        }

        AnalysisUpdate {
            timestamp,
            keypoints: result.keypoints.clone(),
            joint_angles,
            gait_metrics,
            confidence: result.confidence,
            latency_ms: None,
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        self.summary
    }

    pub fn trajectories(&self) -> &TrajectoryBuffer {
        &self.trajectories
    }

    pub fn limb_points(&self) -> [usize; 4] {
        Limb::ALL.map(|limb| self.trajectories.trajectory(limb).len())
    }
}
