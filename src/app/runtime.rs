use super::types::{CommandEnvelope, OrchestratorCommand, ShutdownReason};
use super::GaitOrchestrator;
use crate::connection::ConnectionEvent;
use crate::error::Result;
use crate::events::GaitEvent;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

impl GaitOrchestrator {
    /// Run the pipeline until a shutdown is requested, then tear it down
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        info!("Gait pipeline is running");

        self.setup_signal_handlers();

        let reason = self.event_loop().await;
        info!("Shutdown initiated: {:?}", reason);

        self.shutdown(&reason).await;

        info!("Gait pipeline shutdown complete");
        Ok(reason)
    }

    /// Spawn signal listeners that queue a shutdown command
    fn setup_signal_handlers(&self) {
        #[cfg(unix)]
        {
            let commands = self.commands_tx.clone();
            tokio::spawn(async move {
                let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(terminate) => terminate,
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if terminate.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    request_shutdown(&commands, "SIGTERM").await;
                }
            });
        }

        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                request_shutdown(&commands, "SIGINT").await;
            }
        });
    }

    /// Single owner loop: commands, capture ticks and connection events are
    /// handled one at a time against the same state.
    pub(super) async fn event_loop(&mut self) -> ShutdownReason {
        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    return ShutdownReason::UserRequest;
                }
                command = self.commands_rx.recv() => {
                    let Some(envelope) = command else {
                        return ShutdownReason::Error("Command channel closed".to_string());
                    };
                    if let Some(reason) = self.dispatch(envelope).await {
                        return reason;
                    }
                }
                _ = self.scheduler.next_tick() => {
                    self.on_capture_tick().await;
                }
                event = self.connection.next_event() => {
                    self.on_connection_event(event).await;
                }
            }
        }
    }

    async fn on_capture_tick(&mut self) {
        match self.scheduler.capture_frame().await {
            Ok(Some(frame)) => {
                if !self.connection.send_frame(frame) {
                    trace!("Frame dropped while {}", self.connection.status());
                }
            }
            Ok(None) => {}
            Err(e) => self.report_media_error(&e),
        }
    }

    pub(super) async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StatusChanged(status) => {
                self.publish(GaitEvent::ConnectionStatusChanged { status });
            }
            ConnectionEvent::Result { result, latency } => {
                if !self.scheduler.is_analyzing() {
                    trace!("Result {} arrived after analysis stopped", result.timestamp);
                    return;
                }

                let mut update = self.tracker.ingest(&result, self.calibration.mode());
                update.latency_ms = latency.map(|latency| latency.as_millis() as u64);

                if let Some(session) = &self.session {
                    if let Err(e) = self.sessions.save_result(&session.id, &result).await {
                        warn!("Failed to store result for session {}: {}", session.id, e);
                    }
                }

                self.publish(GaitEvent::AnalysisUpdated { update });
            }
            ConnectionEvent::CalibrationResult(points) => {
                let accepted = self.calibration.set_detected_points(points);
                debug!("{} calibration markers accepted", accepted);
                let points = self.calibration.detected_points().to_vec();
                self.publish(GaitEvent::CalibrationDetections { points });
            }
            ConnectionEvent::ModeSet(mode) => {
                self.publish(GaitEvent::ModeAcknowledged { mode });
            }
            ConnectionEvent::CalibrationConfirmed => {
                let label_mapping = self.calibration.label_mapping();
                self.publish(GaitEvent::CalibrationConfirmed { label_mapping });
            }
            ConnectionEvent::RemoteError(message) => {
                self.publish(GaitEvent::RemoteError { message });
            }
            ConnectionEvent::TransportError(message) => {
                self.publish(GaitEvent::TransportError { message });
            }
            ConnectionEvent::ReconnectDue => {
                if let Err(e) = self.connection.reconnect().await {
                    debug!("Reconnect failed: {}", e);
                }
            }
            ConnectionEvent::ReconnectAbandoned { attempts } => {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.connection.endpoint(),
                    attempts
                );
            }
        }
    }
}

async fn request_shutdown(commands: &mpsc::Sender<CommandEnvelope>, signal: &str) {
    let envelope = CommandEnvelope {
        command: OrchestratorCommand::Shutdown(ShutdownReason::Signal(signal.to_string())),
        reply: None,
    };
    if commands.send(envelope).await.is_err() {
        debug!("Pipeline already stopped when {} arrived", signal);
    }
}
