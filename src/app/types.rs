use crate::calibration::{CalibrationState, ColorMarkerConfig, DetectionMode, HsvRange, MarkerPreset};
use crate::connection::{ConnectionStats, ConnectionStatus};
use crate::error::Result;
use crate::media::SchedulerStats;
use crate::persistence::{MetricsSummary, Session};
use crate::pose::AngleJoint;
use crate::trajectory::TrajectoryStats;
use tokio::sync::oneshot;

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
    /// The configured run duration elapsed
    Timeout,
}

/// Requests from UI collaborators, processed one at a time
#[derive(Debug, Clone)]
pub enum OrchestratorCommand {
    Connect,
    Disconnect,
    SetDetectionMode(DetectionMode),
    AssignMarkerColor { joint: AngleJoint, color_name: String },
    SetColorRange { color_name: String, range: HsvRange },
    SetMarkerConfigs(Vec<ColorMarkerConfig>),
    CaptureCalibrationFrame,
    ConfirmCalibration,
    ResetCalibration,
    SavePreset { name: String },
    LoadPreset { id: String },
    DeletePreset { id: String },
    StartSession { dog_id: String, notes: Option<String> },
    EndSession,
    StartCapture,
    StopCapture,
    SetAnalyzing(bool),
    SetCaptureFps(u32),
    Snapshot,
    Shutdown(ShutdownReason),
}

/// Successful result of a command
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Done,
    Preset(MarkerPreset),
    Session(Session),
    Snapshot(Box<OrchestratorSnapshot>),
}

pub(super) struct CommandEnvelope {
    pub(super) command: OrchestratorCommand,
    pub(super) reply: Option<oneshot::Sender<Result<CommandOutcome>>>,
}

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone)]
pub struct OrchestratorSnapshot {
    pub connection_status: ConnectionStatus,
    pub connection: ConnectionStats,
    pub calibration: CalibrationState,
    pub scheduler: SchedulerStats,
    pub fps: u32,
    pub streaming: bool,
    pub analyzing: bool,
    pub session: Option<Session>,
    pub summary: MetricsSummary,
    pub trajectories: TrajectoryStats,
    /// Points currently held per limb (left front, right front, left back, right back)
    pub limb_points: [usize; 4],
}
