use crate::calibration::{DetectedPoint, DetectionMode, LabelMapping};
use crate::connection::ConnectionStatus;
use crate::error::EventBusError;
use crate::persistence::Session;
use crate::pose::{GaitMetrics, JointAngles, KeypointSet};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// One analysed frame as presented to UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisUpdate {
    pub timestamp: i64,
    pub keypoints: Option<KeypointSet>,
    pub joint_angles: JointAngles,
    pub gait_metrics: Option<GaitMetrics>,
    pub confidence: f64,
    pub latency_ms: Option<u64>,
}

/// Events published for UI and other observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GaitEvent {
    ConnectionStatusChanged { status: ConnectionStatus },
    AnalysisUpdated { update: AnalysisUpdate },
    CalibrationDetections { points: Vec<DetectedPoint> },
    CalibrationConfirmed { label_mapping: LabelMapping },
    /// The inference service switched to `mode`
    ModeAcknowledged { mode: DetectionMode },
    RemoteError { message: String },
    /// Link failure; a reconnect follows unless the operator disconnected
    TransportError { message: String },
    /// Camera failure that the operator has to act on
    MediaError { message: String },
    SessionStarted { session: Session },
    SessionEnded { session: Session },
    ShutdownRequested { reason: String },
}

impl GaitEvent {
    pub fn description(&self) -> String {
        match self {
            GaitEvent::ConnectionStatusChanged { status } => format!("Connection {}", status),
            GaitEvent::AnalysisUpdated { update } => format!(
                "Analysis at {} (confidence {:.2})",
                update.timestamp, update.confidence
            ),
            GaitEvent::CalibrationDetections { points } => {
                format!("{} calibration markers detected", points.len())
            }
            GaitEvent::CalibrationConfirmed { label_mapping } => {
                format!("Calibration confirmed ({} colors)", label_mapping.len())
            }
            GaitEvent::ModeAcknowledged { mode } => format!("Detection mode set to {}", mode),
            GaitEvent::RemoteError { message } => format!("Inference error: {}", message),
            GaitEvent::TransportError { message } => format!("Connection error: {}", message),
            GaitEvent::MediaError { message } => format!("Camera error: {}", message),
            GaitEvent::SessionStarted { session } => format!("Session {} started", session.id),
            GaitEvent::SessionEnded { session } => format!("Session {} ended", session.id),
            GaitEvent::ShutdownRequested { reason } => format!("Shutdown requested: {}", reason),
        }
    }

    /// Event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            GaitEvent::ConnectionStatusChanged { .. } => "connection_status_changed",
            GaitEvent::AnalysisUpdated { .. } => "analysis_updated",
            GaitEvent::CalibrationDetections { .. } => "calibration_detections",
            GaitEvent::CalibrationConfirmed { .. } => "calibration_confirmed",
            GaitEvent::ModeAcknowledged { .. } => "mode_acknowledged",
            GaitEvent::RemoteError { .. } => "remote_error",
            GaitEvent::TransportError { .. } => "transport_error",
            GaitEvent::MediaError { .. } => "media_error",
            GaitEvent::SessionStarted { .. } => "session_started",
            GaitEvent::SessionEnded { .. } => "session_ended",
            GaitEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Broadcast channel fanning events out to every subscriber
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GaitEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GaitEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn receiver(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.to_string())
    }

    /// Publish to all subscribers; returns how many received it
    pub fn publish(&self, event: GaitEvent) -> Result<usize, EventBusError> {
        match &event {
            GaitEvent::ConnectionStatusChanged { status } => info!("Connection {}", status),
            GaitEvent::RemoteError { message } => warn!("Inference error: {}", message),
            GaitEvent::TransportError { message } => warn!("Connection error: {}", message),
            GaitEvent::MediaError { message } => error!("Camera error: {}", message),
            GaitEvent::AnalysisUpdated { .. } => trace!("Event: {}", event.description()),
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Custom(fn(&GaitEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &GaitEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Receiver that skips events its filter rejects
pub struct EventReceiver {
    receiver: broadcast::Receiver<GaitEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<GaitEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Next matching event. A lagged receiver reports how many events it
    /// missed and can keep receiving afterwards.
    pub async fn recv(&mut self) -> Result<GaitEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        trace!("Receiver '{}' got {}", self.name, event.event_type());
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Option<GaitEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn status(status: ConnectionStatus) -> GaitEvent {
        GaitEvent::ConnectionStatusChanged { status }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(status(ConnectionStatus::Connected)).unwrap(), 2);

        let received = timeout(Duration::from_millis(100), first.recv()).await.unwrap().unwrap();
        assert_eq!(received, status(ConnectionStatus::Connected));
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(!bus.has_subscribers());
        assert!(matches!(
            bus.publish(status(ConnectionStatus::Connecting)),
            Err(EventBusError::PublishFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new(10);
        let mut errors = bus.receiver(
            EventFilter::EventTypes(vec!["remote_error", "media_error"]),
            "errors",
        );

        bus.publish(status(ConnectionStatus::Connected)).unwrap();
        bus.publish(GaitEvent::RemoteError {
            message: "model missing".to_string(),
        })
        .unwrap();

        let event = timeout(Duration::from_millis(100), errors.recv()).await.unwrap().unwrap();
        assert_eq!(event.event_type(), "remote_error");
        assert_eq!(errors.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_count() {
        let bus = EventBus::new(2);
        let mut receiver = bus.receiver(EventFilter::All, "slow");
        for _ in 0..5 {
            bus.publish(status(ConnectionStatus::Connected)).unwrap();
        }

        assert_eq!(receiver.recv().await, Err(EventBusError::Lagged { count: 3 }));
        assert!(receiver.recv().await.is_ok());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GaitEvent::ModeAcknowledged {
            mode: DetectionMode::ColorMarker,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "mode_acknowledged");
        assert_eq!(value["mode"], "color_marker");
        assert_eq!(event.description(), "Detection mode set to color_marker");
    }

    #[test]
    fn test_custom_filter() {
        let filter = EventFilter::Custom(|event| {
            matches!(event, GaitEvent::ConnectionStatusChanged { status } if *status == ConnectionStatus::Error)
        });
        assert!(filter.matches(&status(ConnectionStatus::Error)));
        assert!(!filter.matches(&status(ConnectionStatus::Connected)));
    }
}
