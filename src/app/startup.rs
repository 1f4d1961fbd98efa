use super::GaitOrchestrator;
use crate::error::Result;
use tracing::{info, warn};

impl GaitOrchestrator {
    /// Load saved presets, prime the calibration cache and open the
    /// connection. A failed first connect is not fatal; the reconnect timer
    /// keeps trying.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting gait pipeline");

        match self.calibration.load_presets().await {
            Ok(count) => info!("Loaded {} marker presets", count),
            Err(e) => warn!("Failed to load marker presets: {}", e),
        }

        let mode = self.calibration.mode();
        self.connection.set_detection_mode(mode);
        if mode == crate::calibration::DetectionMode::ColorMarker {
            let configs = self.calibration.configs().to_vec();
            self.connection.update_marker_config(configs);
        }

        if let Err(e) = self.connection.connect().await {
            warn!(
                "Initial connection to {} failed, retrying in the background: {}",
                self.connection.endpoint(),
                e
            );
        }

        info!("Gait pipeline started in {} mode", mode);
        Ok(())
    }
}
