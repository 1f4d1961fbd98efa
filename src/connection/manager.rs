use super::policy::ReconnectPolicy;
use crate::calibration::{ColorMarkerConfig, DetectedPoint, DetectionMode, LabelMapping};
use crate::error::TransportError;
use crate::pose::AnalysisResult;
use crate::protocol::{Inbound, Outbound};
use crate::transport::{Connector, TransportEvent, TransportLink};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the link to the inference service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything the manager reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StatusChanged(ConnectionStatus),
    /// Analysis result with the time since the most recent frame was sent
    Result {
        result: AnalysisResult,
        latency: Option<Duration>,
    },
    CalibrationResult(Vec<DetectedPoint>),
    ModeSet(DetectionMode),
    CalibrationConfirmed,
    /// Error reported by the service itself
    RemoteError(String),
    TransportError(String),
    /// The backoff elapsed; the owner should call `reconnect`
    ReconnectDue,
    /// The reconnect policy ran out of attempts
    ReconnectAbandoned { attempts: u32 },
}

/// Calibration state re-sent after every successful connect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedCalibration {
    pub mode: DetectionMode,
    pub marker_configs: Option<Vec<ColorMarkerConfig>>,
    pub label_mapping: Option<LabelMapping>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub results_received: u64,
    pub protocol_errors: u64,
    pub reconnect_attempts: u64,
    pub last_latency: Option<Duration>,
}

/// Owns the transport link, the reconnect timer and the calibration cache.
///
/// Not shared: a single task drives it by awaiting [`ConnectionManager::next_event`]
/// and calling the command methods between events.
pub struct ConnectionManager {
    endpoint: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    status: ConnectionStatus,
    link: Option<Box<dyn TransportLink>>,
    link_id: u64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    reconnect_at: Option<Instant>,
    manually_disconnected: bool,
    cache: CachedCalibration,
    last_send: Option<Instant>,
    pending: VecDeque<ConnectionEvent>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new<S: Into<String>>(endpoint: S, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            endpoint: endpoint.into(),
            connector,
            policy,
            status: ConnectionStatus::Disconnected,
            link: None,
            link_id: 0,
            events_tx,
            events_rx,
            reconnect_at: None,
            manually_disconnected: false,
            cache: CachedCalibration::default(),
            last_send: None,
            pending: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cached_calibration(&self) -> &CachedCalibration {
        &self.cache
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Open the link and replay cached calibration. No-op when already connected.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.status == ConnectionStatus::Connected {
            return Ok(());
        }

        self.manually_disconnected = false;
        self.reconnect_at = None;
        self.set_status(ConnectionStatus::Connecting);

        self.link_id += 1;
        let link_id = self.link_id;
        match self
            .connector
            .open(&self.endpoint, link_id, self.events_tx.clone())
            .await
        {
            Ok(link) => {
                self.link = Some(link);
                self.policy.reset();
                self.set_status(ConnectionStatus::Connected);
                info!("Connected to {} (link {})", self.endpoint, link_id);
                self.replay_calibration();
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.endpoint, e);
                self.set_status(ConnectionStatus::Error);
                self.pending
                    .push_back(ConnectionEvent::TransportError(e.to_string()));
                self.set_status(ConnectionStatus::Disconnected);
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Attempt triggered by [`ConnectionEvent::ReconnectDue`]
    pub async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.stats.reconnect_attempts += 1;
        debug!(
            "Reconnect attempt {} to {}",
            self.policy.attempts(),
            self.endpoint
        );
        self.connect().await
    }

    /// Close the link and stop reconnecting
    pub fn disconnect(&mut self) {
        self.manually_disconnected = true;
        self.reconnect_at = None;
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        // Anything still queued from the old link is stale now
        self.link_id += 1;
        self.set_status(ConnectionStatus::Disconnected);
        info!("Disconnected from {}", self.endpoint);
    }

    /// Send a frame and stamp the latency clock. Returns false (and drops the
    /// frame) unless connected.
    pub fn send_frame(&mut self, payload: String) -> bool {
        if !self.is_connected() {
            trace!("Dropping frame while {}", self.status);
            return false;
        }

        let message = Outbound::Frame {
            payload,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        let sent = self.send(&message);
        if sent {
            self.last_send = Some(Instant::now());
            self.stats.frames_sent += 1;
        }
        sent
    }

    pub fn set_detection_mode(&mut self, mode: DetectionMode) -> bool {
        self.cache.mode = mode;
        self.send_if_connected(&Outbound::SetMode { mode })
    }

    /// Calibration frames are one-shot and never replayed
    pub fn send_calibration_frame(&mut self, payload: String) -> bool {
        self.send_if_connected(&Outbound::CalibrateFrame { payload })
    }

    pub fn update_marker_config(&mut self, markers: Vec<ColorMarkerConfig>) -> bool {
        self.cache.marker_configs = Some(markers.clone());
        self.send_if_connected(&Outbound::UpdateMarkerConfig { markers })
    }

    pub fn confirm_calibration(&mut self, label_mapping: LabelMapping) -> bool {
        self.cache.label_mapping = Some(label_mapping.clone());
        self.send_if_connected(&Outbound::ConfirmCalibration { label_mapping })
    }

    /// Forget the confirmed mapping so it is not replayed
    pub fn clear_confirmation(&mut self) {
        self.cache.label_mapping = None;
    }

    /// Wait for the next event. Cancel-safe: dropping the future loses nothing.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            let reconnect_at = self.reconnect_at;
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.handle_transport_event(event);
                }
                _ = sleep_until_deadline(reconnect_at) => {
                    self.reconnect_at = None;
                    return ConnectionEvent::ReconnectDue;
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        if event.link_id() != self.link_id {
            trace!("Ignoring event from stale link {}", event.link_id());
            return;
        }

        match event {
            TransportEvent::Message { text, .. } => self.handle_message(&text),
            TransportEvent::Error { message, .. } => {
                error!("Transport error on {}: {}", self.endpoint, message);
                self.set_status(ConnectionStatus::Error);
                self.pending.push_back(ConnectionEvent::TransportError(message));
            }
            TransportEvent::Closed { .. } => {
                self.link = None;
                if self.manually_disconnected {
                    return;
                }
                warn!("Connection to {} closed", self.endpoint);
                self.set_status(ConnectionStatus::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn handle_message(&mut self, text: &str) {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.stats.protocol_errors += 1;
                warn!("Dropping inbound message: {}", e);
                return;
            }
        };

        let event = match inbound {
            Inbound::Result(result) => {
                let latency = self.last_send.map(|sent| sent.elapsed());
                self.stats.results_received += 1;
                self.stats.last_latency = latency;
                ConnectionEvent::Result { result, latency }
            }
            Inbound::CalibrationResult { detected_points } => {
                ConnectionEvent::CalibrationResult(detected_points)
            }
            Inbound::ModeSet { mode } => ConnectionEvent::ModeSet(mode),
            Inbound::CalibrationConfirmed => ConnectionEvent::CalibrationConfirmed,
            Inbound::Error { message } => {
                warn!("Inference service reported: {}", message);
                ConnectionEvent::RemoteError(message)
            }
        };
        self.pending.push_back(event);
    }

    /// Mode first, then markers, then the mapping that refers to them
    fn replay_calibration(&mut self) {
        let mut replayed = vec![Outbound::SetMode {
            mode: self.cache.mode,
        }];
        if let Some(markers) = &self.cache.marker_configs {
            replayed.push(Outbound::UpdateMarkerConfig {
                markers: markers.clone(),
            });
        }
        if let Some(label_mapping) = &self.cache.label_mapping {
            replayed.push(Outbound::ConfirmCalibration {
                label_mapping: label_mapping.clone(),
            });
        }

        debug!("Replaying {} calibration messages", replayed.len());
        for message in &replayed {
            self.send(message);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.manually_disconnected || self.reconnect_at.is_some() {
            return;
        }
        match self.policy.next_delay() {
            Some(delay) => {
                info!("Reconnecting to {} in {:?}", self.endpoint, delay);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                self.pending.push_back(ConnectionEvent::ReconnectAbandoned {
                    attempts: self.policy.attempts(),
                });
            }
        }
    }

    fn send_if_connected(&mut self, message: &Outbound) -> bool {
        if !self.is_connected() {
            debug!("Cached {} for replay on next connect", message.message_type());
            return false;
        }
        self.send(message)
    }

    fn send(&mut self, message: &Outbound) -> bool {
        let Some(link) = &self.link else {
            return false;
        };

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", message.message_type(), e);
                return false;
            }
        };

        match link.send_text(text) {
            Ok(()) => {
                trace!("Sent {}", message.message_type());
                true
            }
            Err(e) => {
                warn!("Failed to send {}: {}", message.message_type(), e);
                false
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("Connection status: {} -> {}", self.status, status);
            self.status = status;
            self.pending.push_back(ConnectionEvent::StatusChanged(status));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
