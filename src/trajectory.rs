use crate::pose::{Joint, KeypointSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Default number of points kept per limb
pub const DEFAULT_TRAJECTORY_CAPACITY: usize = 200;

/// A sampled position at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: i64,
}

impl TrajectoryPoint {
    pub fn new(x: f64, y: f64, timestamp_ms: i64) -> Self {
        Self { x, y, timestamp_ms }
    }
}

/// The four tracked paws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limb {
    LeftFront,
    RightFront,
    LeftBack,
    RightBack,
}

impl Limb {
    pub const ALL: [Limb; 4] = [Limb::LeftFront, Limb::RightFront, Limb::LeftBack, Limb::RightBack];

    /// The keypoint that tracks this limb
    pub fn joint(&self) -> Joint {
        match self {
            Limb::LeftFront => Joint::LeftFrontPaw,
            Limb::RightFront => Joint::RightFrontPaw,
            Limb::LeftBack => Joint::LeftBackPaw,
            Limb::RightBack => Joint::RightBackPaw,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Bounded, time-ordered point history with FIFO eviction
#[derive(Debug, Clone)]
pub struct Trajectory {
    points: VecDeque<TrajectoryPoint>,
    capacity: usize,
    evicted: u64,
}

impl Trajectory {
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Trajectory capacity must be greater than 0");
        }
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a point, dropping the oldest one when full
    pub fn push(&mut self, point: TrajectoryPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
            self.evicted += 1;
            trace!("Trajectory full ({}), evicted oldest point", self.capacity);
        }
        self.points.push_back(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Ordered copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<TrajectoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<TrajectoryPoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points dropped to make room since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

/// Snapshot of trajectory buffer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryStats {
    pub points_appended: u64,
    pub points_evicted: u64,
    pub skipped_undetected: u64,
}

/// Per-limb trajectory history fed by incoming analysis results
#[derive(Debug, Clone)]
pub struct TrajectoryBuffer {
    limbs: [Trajectory; 4],
    min_confidence: f64,
    stats: TrajectoryStats,
}

impl TrajectoryBuffer {
    /// Create a buffer keeping `capacity` points per limb
    ///
    /// # Example
    /// ```
    /// use gaitstream::trajectory::{Limb, TrajectoryBuffer, TrajectoryPoint};
    ///
    /// let mut buffer = TrajectoryBuffer::new(200, 0.3);
    /// buffer.append(Limb::LeftFront, TrajectoryPoint::new(1.0, 2.0, 0));
    /// assert_eq!(buffer.snapshot(Limb::LeftFront).len(), 1);
    /// ```
    pub fn new(capacity: usize, min_confidence: f64) -> Self {
        debug!("Created trajectory buffer with capacity {} per limb", capacity);
        Self {
            limbs: [
                Trajectory::new(capacity),
                Trajectory::new(capacity),
                Trajectory::new(capacity),
                Trajectory::new(capacity),
            ],
            min_confidence,
            stats: TrajectoryStats::default(),
        }
    }

    pub fn append(&mut self, limb: Limb, point: TrajectoryPoint) {
        let trajectory = &mut self.limbs[limb.index()];
        let before = trajectory.evicted();
        trajectory.push(point);
        self.stats.points_appended += 1;
        self.stats.points_evicted += trajectory.evicted() - before;
    }

    /// Append each detected paw of one result. Paws below the confidence
    /// threshold carry no position and are skipped.
    pub fn append_keypoints(&mut self, keypoints: &KeypointSet, timestamp_ms: i64) {
        for limb in Limb::ALL {
            let keypoint = keypoints.get(limb.joint());
            if keypoint.is_detected(self.min_confidence) {
                self.append(limb, TrajectoryPoint::new(keypoint.x, keypoint.y, timestamp_ms));
            } else {
                self.stats.skipped_undetected += 1;
            }
        }
    }

    /// Empty every limb (session start)
    pub fn reset(&mut self) {
        for trajectory in self.limbs.iter_mut() {
            trajectory.clear();
        }
        debug!("Trajectory buffer reset");
    }

    pub fn snapshot(&self, limb: Limb) -> Vec<TrajectoryPoint> {
        self.limbs[limb.index()].snapshot()
    }

    pub fn trajectory(&self, limb: Limb) -> &Trajectory {
        &self.limbs[limb.index()]
    }

    pub fn capacity(&self) -> usize {
        self.limbs[0].capacity()
    }

    pub fn stats(&self) -> TrajectoryStats {
        self.stats.clone()
    }
}
