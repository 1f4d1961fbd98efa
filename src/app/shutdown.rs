use super::types::ShutdownReason;
use super::GaitOrchestrator;
use crate::events::GaitEvent;
use tracing::{error, info};

impl GaitOrchestrator {
    /// Release the camera, close any open session and drop the link
    pub(super) async fn shutdown(&mut self, reason: &ShutdownReason) {
        info!("Beginning graceful shutdown");

        self.publish(GaitEvent::ShutdownRequested {
            reason: format!("{:?}", reason),
        });

        self.scheduler.stop();

        if self.session.is_some() {
            if let Err(e) = self.end_session().await {
                error!("Error ending session during shutdown: {}", e);
            }
        }

        self.connection.disconnect();
        self.cancellation_token.cancel();

        info!("Graceful shutdown completed");
    }
}
