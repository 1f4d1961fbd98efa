use super::*;
use crate::calibration::{DetectionMode, MemoryPresetStore};
use crate::config::GaitConfig;
use crate::connection::ConnectionStatus;
use crate::error::{CalibrationError, GaitError, MediaError, TransportError};
use crate::events::{EventBus, EventFilter, EventReceiver, GaitEvent};
use crate::media::MemoryFrameSource;
use crate::persistence::{FallbackSessionStore, SessionStatus, UnavailableSessionStore};
use crate::pose::AngleJoint;
use crate::transport::MockConnector;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FRAME: &str = "data:image/jpeg;base64,/9j/AA==";
const RESULT_JSON: &str = r#"{"type": "result", "data": {"timestamp": 1, "confidence": 0.9}}"#;

struct Harness {
    handle: OrchestratorHandle,
    bus: EventBus,
    connector: MockConnector,
    releases: Arc<AtomicU32>,
    task: JoinHandle<(ShutdownReason, GaitOrchestrator)>,
}

impl Harness {
    fn spawn(source: MemoryFrameSource) -> Self {
        let connector = MockConnector::new();
        let releases = source.release_counter();
        let mut orchestrator = GaitOrchestrator::new(
            GaitConfig::default(),
            Collaborators {
                connector: Arc::new(connector.clone()),
                frame_source: Box::new(source),
                preset_store: Arc::new(MemoryPresetStore::new()),
                session_store: Arc::new(FallbackSessionStore::new(Arc::new(
                    UnavailableSessionStore,
                ))),
            },
        );
        let handle = orchestrator.handle();
        let bus = orchestrator.event_bus();

        let task = tokio::spawn(async move {
            let reason = orchestrator.event_loop().await;
            orchestrator.shutdown(&reason).await;
            (reason, orchestrator)
        });

        Self {
            handle,
            bus,
            connector,
            releases,
            task,
        }
    }

    fn events(&self, types: Vec<&'static str>) -> EventReceiver {
        self.bus.receiver(EventFilter::EventTypes(types), "test")
    }

    async fn stop(self) -> (ShutdownReason, GaitOrchestrator) {
        self.handle
            .shutdown(ShutdownReason::UserRequest)
            .await
            .unwrap();
        self.task.await.unwrap()
    }
}

async fn next(receiver: &mut EventReceiver) -> GaitEvent {
    timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("event timed out")
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_session_streams_frames_and_publishes_results() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));
    let mut updates = harness.events(vec!["analysis_updated"]);

    harness.handle.connect().await.unwrap();
    let session = harness
        .handle
        .start_session("rex", Some("left fore".to_string()))
        .await
        .unwrap();
    assert!(session.local);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let frames = harness
        .connector
        .sent_types()
        .iter()
        .filter(|t| t.as_str() == "frame")
        .count();
    assert!(frames >= 3, "only {} frames sent", frames);

    assert!(harness.connector.push_inbound(RESULT_JSON));
    match next(&mut updates).await {
        GaitEvent::AnalysisUpdated { update } => {
            assert_eq!(update.timestamp, 1);
            assert!(update.latency_ms.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert!(snapshot.streaming);
    assert!(snapshot.analyzing);
    assert_eq!(snapshot.connection.results_received, 1);
    assert_eq!(snapshot.session.map(|s| s.id), Some(session.id.clone()));

    let ended = harness.handle.end_session().await.unwrap();
    assert_eq!(ended.id, session.id);
    assert_eq!(ended.status, SessionStatus::Completed);
    assert!(!harness.handle.snapshot().await.unwrap().analyzing);

    let (reason, _) = harness.stop().await;
    assert_eq!(reason, ShutdownReason::UserRequest);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_replayed_after_connection_drop() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));
    let handle = harness.handle.clone();

    handle.connect().await.unwrap();
    handle
        .set_detection_mode(DetectionMode::ColorMarker)
        .await
        .unwrap();
    handle
        .assign_marker_color(AngleJoint::LeftKnee, "Red")
        .await
        .unwrap();
    handle.confirm_calibration().await.unwrap();

    assert!(matches!(
        handle.set_detection_mode(DetectionMode::AiPose).await,
        Err(GaitError::Calibration(CalibrationError::AlreadyConfirmed))
    ));

    harness.connector.clear_sent();
    assert!(harness.connector.drop_connection());
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
    assert!(snapshot.calibration.is_confirmed);
    assert_eq!(harness.connector.open_count(), 2);
    assert_eq!(
        harness.connector.sent_types(),
        vec!["set_mode", "update_marker_config", "confirm_calibration"]
    );

    handle.reset_calibration().await.unwrap();
    handle.set_detection_mode(DetectionMode::AiPose).await.unwrap();

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_calibration_frame_needs_connection() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));
    let mut detections = harness.events(vec!["calibration_detections"]);

    assert!(matches!(
        harness.handle.capture_calibration_frame().await,
        Err(GaitError::Transport(TransportError::NotConnected))
    ));

    harness.handle.connect().await.unwrap();
    harness.handle.capture_calibration_frame().await.unwrap();
    assert!(harness
        .connector
        .sent_types()
        .contains(&"calibrate_frame".to_string()));

    harness.connector.push_inbound(
        r#"{"type": "calibration_result", "data": {"detected_points": [
            {"id": "Red_1", "x": 1.0, "y": 2.0, "suggested_label": "left_shoulder", "color_name": "Red", "confidence": 0.8},
            {"id": "Grey_1", "x": 3.0, "y": 4.0, "suggested_label": "tail", "confidence": 0.4}
        ]}}"#,
    );
    match next(&mut detections).await {
        GaitEvent::CalibrationDetections { points } => {
            assert_eq!(points.len(), 1);
            assert_eq!(points[0].id, "Red_1");
        }
        other => panic!("unexpected event {:?}", other),
    }

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_camera_failure_blocks_session() {
    let harness = Harness::spawn(MemoryFrameSource::failing(MediaError::PermissionDenied {
        details: "camera blocked".to_string(),
    }));
    let mut errors = harness.events(vec!["media_error"]);

    let result = harness.handle.start_session("rex", None).await;
    assert!(matches!(
        result,
        Err(GaitError::Media(MediaError::PermissionDenied { .. }))
    ));
    assert!(matches!(next(&mut errors).await, GaitEvent::MediaError { .. }));

    let snapshot = harness.handle.snapshot().await.unwrap();
    assert!(snapshot.session.is_none());
    assert!(!snapshot.streaming);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle_errors() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));

    assert!(harness.handle.end_session().await.is_err());

    harness.handle.start_session("rex", None).await.unwrap();
    assert!(harness.handle.start_session("rex", None).await.is_err());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_camera_and_link() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));
    let mut lifecycle = harness.events(vec!["shutdown_requested", "session_ended"]);

    harness.handle.connect().await.unwrap();
    harness.handle.start_session("rex", None).await.unwrap();
    assert!(harness.connector.is_open());

    let connector = harness.connector.clone();
    let releases = Arc::clone(&harness.releases);
    let (reason, orchestrator) = harness.stop().await;

    assert_eq!(reason, ShutdownReason::UserRequest);
    assert_eq!(releases.load(Ordering::Relaxed), 1);
    assert!(!connector.is_open());
    assert_eq!(orchestrator.snapshot().connection_status, ConnectionStatus::Disconnected);
    assert!(orchestrator.snapshot().session.is_none());

    assert!(matches!(next(&mut lifecycle).await, GaitEvent::ShutdownRequested { .. }));
    assert!(matches!(next(&mut lifecycle).await, GaitEvent::SessionEnded { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_startup_survives_unreachable_service() {
    let connector = MockConnector::new();
    connector.fail_next(1);
    let mut orchestrator = GaitOrchestrator::new(
        GaitConfig::default(),
        Collaborators {
            connector: Arc::new(connector.clone()),
            frame_source: Box::new(MemoryFrameSource::new([FRAME])),
            preset_store: Arc::new(MemoryPresetStore::new()),
            session_store: Arc::new(FallbackSessionStore::new(Arc::new(UnavailableSessionStore))),
        },
    );

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.snapshot().connection_status, ConnectionStatus::Disconnected);
    assert_eq!(connector.open_count(), 0);
    assert!(orchestrator.connection.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_reaches_subscribers() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));
    let mut errors = harness.events(vec!["transport_error", "connection_status_changed"]);

    harness.handle.connect().await.unwrap();
    assert!(harness.connector.transport_error("connection reset by peer"));

    loop {
        match next(&mut errors).await {
            GaitEvent::TransportError { message } => {
                assert_eq!(message, "connection reset by peer");
                break;
            }
            GaitEvent::ConnectionStatusChanged { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(
        harness.handle.snapshot().await.unwrap().connection_status,
        ConnectionStatus::Error
    );

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_capture_rate_change_applies_to_running_timer() {
    let harness = Harness::spawn(MemoryFrameSource::new([FRAME]));

    harness.handle.start_capture().await.unwrap();
    harness.handle.set_capture_fps(4).await.unwrap();
    assert_eq!(harness.handle.snapshot().await.unwrap().fps, 4);

    harness.handle.set_capture_fps(10_000).await.unwrap();
    assert_eq!(
        harness.handle.snapshot().await.unwrap().fps,
        crate::media::MAX_CAPTURE_FPS
    );

    harness.stop().await;
}
