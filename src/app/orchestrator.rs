use super::tracker::GaitTracker;
use super::types::{
    CommandEnvelope, CommandOutcome, OrchestratorCommand, OrchestratorSnapshot, ShutdownReason,
};
use crate::calibration::{CalibrationCoordinator, ColorMarkerConfig, DetectionMode, HsvRange, MarkerPreset, PresetStore};
use crate::config::GaitConfig;
use crate::connection::{ConnectionManager, ReconnectPolicy};
use crate::error::{GaitError, Result};
use crate::events::{EventBus, GaitEvent};
use crate::media::{FrameScheduler, FrameSource};
use crate::persistence::{Session, SessionStore};
use crate::pose::AngleJoint;
use crate::transport::Connector;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// External collaborators the pipeline is wired to
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub frame_source: Box<dyn FrameSource>,
    pub preset_store: Arc<dyn PresetStore>,
    pub session_store: Arc<dyn SessionStore>,
}

/// Owns every piece of pipeline state and mutates it from a single task
pub struct GaitOrchestrator {
    pub(super) config: GaitConfig,
    pub(super) connection: ConnectionManager,
    pub(super) scheduler: FrameScheduler,
    pub(super) calibration: CalibrationCoordinator,
    pub(super) tracker: GaitTracker,
    pub(super) sessions: Arc<dyn SessionStore>,
    pub(super) event_bus: EventBus,
    pub(super) session: Option<Session>,

    pub(super) commands_tx: mpsc::Sender<CommandEnvelope>,
    pub(super) commands_rx: mpsc::Receiver<CommandEnvelope>,
    pub(super) cancellation_token: CancellationToken,
}

impl GaitOrchestrator {
    pub fn new(config: GaitConfig, collaborators: Collaborators) -> Self {
        let connection = ConnectionManager::new(
            config.connection.endpoint.clone(),
            collaborators.connector,
            ReconnectPolicy::from_config(&config.connection),
        );
        let scheduler = FrameScheduler::new(collaborators.frame_source, config.capture.fps);
        let calibration =
            CalibrationCoordinator::new(config.calibration.default_mode, collaborators.preset_store);
        let tracker = GaitTracker::new(&config.analysis);
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        Self {
            config,
            connection,
            scheduler,
            calibration,
            tracker,
            sessions: collaborators.session_store,
            event_bus,
            session: None,
            commands_tx,
            commands_rx,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Command sender for UI collaborators
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn config(&self) -> &GaitConfig {
        &self.config
    }

    /// Token that stops the event loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            connection_status: self.connection.status(),
            connection: self.connection.stats(),
            calibration: self.calibration.state(),
            scheduler: self.scheduler.stats(),
            fps: self.scheduler.fps(),
            streaming: self.scheduler.is_streaming(),
            analyzing: self.scheduler.is_analyzing(),
            session: self.session.clone(),
            summary: self.tracker.summary(),
            trajectories: self.tracker.trajectories().stats(),
            limb_points: self.tracker.limb_points(),
        }
    }

    /// Publish to observers; having none is not an error
    pub(super) fn publish(&self, event: GaitEvent) {
        if let Err(e) = self.event_bus.publish(event) {
            trace!("Event not delivered: {}", e);
        }
    }
}

/// Cloneable command sender
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<CommandEnvelope>,
}

impl OrchestratorHandle {
    /// Queue a command and wait for its outcome
    pub async fn send(&self, command: OrchestratorCommand) -> Result<CommandOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(CommandEnvelope {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| GaitError::system("Orchestrator is not running"))?;

        outcome
            .await
            .map_err(|_| GaitError::system("Orchestrator dropped the command"))?
    }

    /// Queue a command without waiting
    pub fn try_notify(&self, command: OrchestratorCommand) -> Result<()> {
        self.commands
            .try_send(CommandEnvelope {
                command,
                reply: None,
            })
            .map_err(|e| GaitError::system(format!("Failed to queue command: {}", e)))
    }

    async fn send_done(&self, command: OrchestratorCommand) -> Result<()> {
        self.send(command).await.map(|_| ())
    }

    pub async fn connect(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::Disconnect).await
    }

    pub async fn set_detection_mode(&self, mode: DetectionMode) -> Result<()> {
        self.send_done(OrchestratorCommand::SetDetectionMode(mode)).await
    }

    pub async fn assign_marker_color(&self, joint: AngleJoint, color_name: &str) -> Result<()> {
        self.send_done(OrchestratorCommand::AssignMarkerColor {
            joint,
            color_name: color_name.to_string(),
        })
        .await
    }

    pub async fn set_color_range(&self, color_name: &str, range: HsvRange) -> Result<()> {
        self.send_done(OrchestratorCommand::SetColorRange {
            color_name: color_name.to_string(),
            range,
        })
        .await
    }

    pub async fn set_marker_configs(&self, configs: Vec<ColorMarkerConfig>) -> Result<()> {
        self.send_done(OrchestratorCommand::SetMarkerConfigs(configs)).await
    }

    pub async fn capture_calibration_frame(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::CaptureCalibrationFrame).await
    }

    pub async fn confirm_calibration(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::ConfirmCalibration).await
    }

    pub async fn reset_calibration(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::ResetCalibration).await
    }

    pub async fn save_preset(&self, name: &str) -> Result<MarkerPreset> {
        match self
            .send(OrchestratorCommand::SavePreset {
                name: name.to_string(),
            })
            .await?
        {
            CommandOutcome::Preset(preset) => Ok(preset),
            other => Err(unexpected(other)),
        }
    }

    pub async fn load_preset(&self, id: &str) -> Result<()> {
        self.send_done(OrchestratorCommand::LoadPreset { id: id.to_string() })
            .await
    }

    pub async fn delete_preset(&self, id: &str) -> Result<()> {
        self.send_done(OrchestratorCommand::DeletePreset { id: id.to_string() })
            .await
    }

    pub async fn start_session(&self, dog_id: &str, notes: Option<String>) -> Result<Session> {
        match self
            .send(OrchestratorCommand::StartSession {
                dog_id: dog_id.to_string(),
                notes,
            })
            .await?
        {
            CommandOutcome::Session(session) => Ok(session),
            other => Err(unexpected(other)),
        }
    }

    pub async fn end_session(&self) -> Result<Session> {
        match self.send(OrchestratorCommand::EndSession).await? {
            CommandOutcome::Session(session) => Ok(session),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start_capture(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::StartCapture).await
    }

    pub async fn stop_capture(&self) -> Result<()> {
        self.send_done(OrchestratorCommand::StopCapture).await
    }

    pub async fn set_analyzing(&self, analyzing: bool) -> Result<()> {
        self.send_done(OrchestratorCommand::SetAnalyzing(analyzing)).await
    }

    /// Change the capture rate; takes effect on the running timer
    pub async fn set_capture_fps(&self, fps: u32) -> Result<()> {
        self.send_done(OrchestratorCommand::SetCaptureFps(fps)).await
    }

    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        match self.send(OrchestratorCommand::Snapshot).await? {
            CommandOutcome::Snapshot(snapshot) => Ok(*snapshot),
            other => Err(unexpected(other)),
        }
    }

    pub async fn shutdown(&self, reason: ShutdownReason) -> Result<()> {
        self.send_done(OrchestratorCommand::Shutdown(reason)).await
    }
}

fn unexpected(outcome: CommandOutcome) -> GaitError {
    GaitError::system(format!("Unexpected command outcome: {:?}", outcome))
}
