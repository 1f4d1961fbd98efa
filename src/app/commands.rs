use super::types::{CommandEnvelope, CommandOutcome, OrchestratorCommand, ShutdownReason};
use super::GaitOrchestrator;
use crate::error::{GaitError, MediaError, Result, TransportError};
use crate::events::GaitEvent;
use tracing::{debug, error, info, warn};

impl GaitOrchestrator {
    /// Run one command and reply to its sender. Returns the shutdown reason
    /// when the command asks the loop to stop.
    pub(super) async fn dispatch(&mut self, envelope: CommandEnvelope) -> Option<ShutdownReason> {
        let CommandEnvelope { command, reply } = envelope;
        debug!("Command: {:?}", command);

        let shutdown = match &command {
            OrchestratorCommand::Shutdown(reason) => Some(reason.clone()),
            _ => None,
        };

        let outcome = self.execute(command).await;
        match &outcome {
            Err(e) if e.is_recoverable() => warn!("Command failed: {}", e),
            Err(e) => error!("Command failed: {}", e),
            Ok(_) => {}
        }
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
        shutdown
    }

    async fn execute(&mut self, command: OrchestratorCommand) -> Result<CommandOutcome> {
        match command {
            OrchestratorCommand::Connect => {
                self.connection.connect().await?;
            }
            OrchestratorCommand::Disconnect => self.connection.disconnect(),
            OrchestratorCommand::SetDetectionMode(mode) => {
                self.calibration.set_mode(mode)?;
                self.connection.set_detection_mode(mode);
            }
            OrchestratorCommand::AssignMarkerColor { joint, color_name } => {
                self.calibration.assign_color(joint, &color_name)?;
                self.push_marker_configs();
            }
            OrchestratorCommand::SetColorRange { color_name, range } => {
                self.calibration.set_color_range(&color_name, range)?;
                self.push_marker_configs();
            }
            OrchestratorCommand::SetMarkerConfigs(configs) => {
                self.calibration.set_configs(configs)?;
                self.push_marker_configs();
            }
            OrchestratorCommand::CaptureCalibrationFrame => self.capture_calibration_frame().await?,
            OrchestratorCommand::ConfirmCalibration => {
                let mapping = self.calibration.confirm()?;
                self.connection.confirm_calibration(mapping);
            }
            OrchestratorCommand::ResetCalibration => {
                self.calibration.reset();
                self.connection.clear_confirmation();
            }
            OrchestratorCommand::SavePreset { name } => {
                let preset = self.calibration.save_preset(&name).await?;
                return Ok(CommandOutcome::Preset(preset));
            }
            OrchestratorCommand::LoadPreset { id } => {
                self.calibration.load_preset(&id)?;
                self.push_marker_configs();
            }
            OrchestratorCommand::DeletePreset { id } => self.calibration.delete_preset(&id).await?,
            OrchestratorCommand::StartSession { dog_id, notes } => {
                let session = self.start_session(&dog_id, notes).await?;
                return Ok(CommandOutcome::Session(session));
            }
            OrchestratorCommand::EndSession => {
                let session = self.end_session().await?;
                return Ok(CommandOutcome::Session(session));
            }
            OrchestratorCommand::StartCapture => self.start_capture().await?,
            OrchestratorCommand::StopCapture => self.scheduler.stop(),
            OrchestratorCommand::SetAnalyzing(analyzing) => self.scheduler.set_analyzing(analyzing),
            OrchestratorCommand::SetCaptureFps(fps) => self.scheduler.set_fps(fps),
            OrchestratorCommand::Snapshot => {
                return Ok(CommandOutcome::Snapshot(Box::new(self.snapshot())));
            }
            OrchestratorCommand::Shutdown(reason) => info!("Shutdown requested: {:?}", reason),
        }
        Ok(CommandOutcome::Done)
    }

    fn push_marker_configs(&mut self) {
        let configs = self.calibration.configs().to_vec();
        self.connection.update_marker_config(configs);
    }

    pub(super) async fn start_capture(&mut self) -> Result<()> {
        if let Err(e) = self.scheduler.start().await {
            self.report_media_error(&e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn capture_calibration_frame(&mut self) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let frame = match self.scheduler.capture_calibration_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.report_media_error(&e);
                return Err(e.into());
            }
        };
        self.connection.send_calibration_frame(frame);
        Ok(())
    }

    pub(super) async fn start_session(
        &mut self,
        dog_id: &str,
        notes: Option<String>,
    ) -> Result<crate::persistence::Session> {
        if let Some(active) = &self.session {
            return Err(GaitError::component(
                "session".to_string(),
                format!("session {} is still active", active.id),
            ));
        }

        if !self.scheduler.is_streaming() {
            self.start_capture().await?;
        }

        let session = self.sessions.create_session(dog_id, notes).await?;
        self.tracker.reset();
        self.scheduler.set_analyzing(true);
        self.session = Some(session.clone());

        info!("Session {} started for {}", session.id, dog_id);
        self.publish(GaitEvent::SessionStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    pub(super) async fn end_session(&mut self) -> Result<crate::persistence::Session> {
        let active = self.session.take().ok_or_else(|| {
            GaitError::component("session", "no active session")
        })?;

        self.scheduler.set_analyzing(false);
        let summary = self.tracker.summary();
        let session = self.sessions.end_session(&active.id, summary).await?;

        info!(
            "Session {} ended after {} analysed frames",
            session.id, summary.samples
        );
        self.publish(GaitEvent::SessionEnded {
            session: session.clone(),
        });
        Ok(session)
    }

    pub(super) fn report_media_error(&self, error: &MediaError) {
        self.publish(GaitEvent::MediaError {
            message: error.to_string(),
        });
    }
}
