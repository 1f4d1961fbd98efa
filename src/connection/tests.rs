use super::*;
use crate::calibration::{default_marker_configs, DetectionMode, LabelMapping};
use crate::pose::AngleJoint;
use crate::transport::MockConnector;
use std::sync::Arc;
use std::time::Duration;

const RESULT_JSON: &str = r#"{"type": "result", "data": {"timestamp": 1, "confidence": 0.9}}"#;

fn manager_with(connector: &MockConnector) -> ConnectionManager {
    ConnectionManager::new(
        "mock://inference",
        Arc::new(connector.clone()),
        ReconnectPolicy::unbounded(Duration::from_millis(3000)),
    )
}

fn full_mapping() -> LabelMapping {
    let mut mapping = LabelMapping::new();
    for config in default_marker_configs() {
        mapping.insert(config.color_name, config.joint_name);
    }
    mapping
}

/// Drain queued events until `wanted` shows up
async fn wait_for(manager: &mut ConnectionManager, wanted: &ConnectionEvent) {
    loop {
        if &manager.next_event().await == wanted {
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_reports_status_and_replays_mode() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);

    manager.connect().await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(
        manager.next_event().await,
        ConnectionEvent::StatusChanged(ConnectionStatus::Connecting)
    );
    assert_eq!(
        manager.next_event().await,
        ConnectionEvent::StatusChanged(ConnectionStatus::Connected)
    );
    assert_eq!(connector.sent_types(), vec!["set_mode"]);

    // Second connect is a no-op
    manager.connect().await.unwrap();
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_then_reconnect_replays_calibration_before_frames() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    assert!(manager.set_detection_mode(DetectionMode::ColorMarker));
    assert!(manager.update_marker_config(default_marker_configs()));
    assert!(manager.confirm_calibration(full_mapping()));

    connector.clear_sent();
    assert!(connector.drop_connection());

    wait_for(
        &mut manager,
        &ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected),
    )
    .await;
    assert!(manager.reconnect_pending());
    assert!(!manager.send_frame("lost".to_string()));

    let started = tokio::time::Instant::now();
    assert_eq!(manager.next_event().await, ConnectionEvent::ReconnectDue);
    assert_eq!(started.elapsed(), Duration::from_millis(3000));

    manager.reconnect().await.unwrap();
    assert!(manager.send_frame("data:image/jpeg;base64,AAAA".to_string()));

    assert_eq!(
        connector.sent_types(),
        vec!["set_mode", "update_marker_config", "confirm_calibration", "frame"]
    );

    let replayed: serde_json::Value = serde_json::from_str(&connector.sent()[0]).unwrap();
    assert_eq!(replayed["data"]["mode"], "color_marker");
    assert_eq!(manager.stats().reconnect_attempts, 1);
    assert_eq!(connector.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_replay_order_ignores_caching_order() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);

    // Cached while offline, deliberately in reverse order
    assert!(!manager.confirm_calibration(full_mapping()));
    assert!(!manager.update_marker_config(default_marker_configs()));
    assert!(!manager.set_detection_mode(DetectionMode::ColorMarker));
    assert!(connector.sent().is_empty());

    manager.connect().await.unwrap();
    assert_eq!(
        connector.sent_types(),
        vec!["set_mode", "update_marker_config", "confirm_calibration"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cleared_confirmation_is_not_replayed() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.update_marker_config(default_marker_configs());
    manager.confirm_calibration(full_mapping());
    manager.clear_confirmation();

    manager.connect().await.unwrap();
    assert_eq!(connector.sent_types(), vec!["set_mode", "update_marker_config"]);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_frames_are_not_cached() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    assert!(!manager.send_calibration_frame("offline".to_string()));

    manager.connect().await.unwrap();
    assert!(manager.send_calibration_frame("online".to_string()));
    assert_eq!(connector.sent_types(), vec!["set_mode", "calibrate_frame"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_retries_until_success() {
    let connector = MockConnector::new();
    connector.fail_next(2);
    let mut manager = manager_with(&connector);

    assert!(manager.connect().await.is_err());
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    let mut failures = 0;
    loop {
        match manager.next_event().await {
            ConnectionEvent::TransportError(_) => failures += 1,
            ConnectionEvent::ReconnectDue => {
                if manager.reconnect().await.is_ok() {
                    break;
                }
            }
            _ => {}
        }
    }

    assert_eq!(failures, 2);
    assert!(manager.is_connected());
    assert_eq!(manager.stats().reconnect_attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_policy_abandons() {
    let connector = MockConnector::new();
    connector.fail_next(10);
    let mut manager = ConnectionManager::new(
        "mock://inference",
        Arc::new(connector.clone()),
        ReconnectPolicy::bounded(Duration::from_millis(100), 2),
    );

    let _ = manager.connect().await;
    let attempts = loop {
        match manager.next_event().await {
            ConnectionEvent::ReconnectDue => {
                let _ = manager.reconnect().await;
            }
            ConnectionEvent::ReconnectAbandoned { attempts } => break attempts,
            _ => {}
        }
    };
    assert_eq!(attempts, 2);
    assert!(!manager.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    connector.drop_connection();
    wait_for(
        &mut manager,
        &ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected),
    )
    .await;
    assert!(manager.reconnect_pending());

    manager.disconnect();
    assert!(!manager.reconnect_pending());

    let waited = tokio::time::timeout(Duration::from_secs(30), manager.next_event()).await;
    assert!(waited.is_err(), "no reconnect may fire after disconnect");
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_does_not_reconnect() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();
    manager.disconnect();

    assert!(!connector.is_open());
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(!manager.reconnect_pending());
    assert!(!manager.send_frame("frame".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_inbound_is_dropped() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    connector.push_inbound("{garbage");
    connector.push_inbound(r#"{"type": "heartbeat"}"#);
    connector.push_inbound(r#"{"type": "calibration_confirmed"}"#);

    wait_for(&mut manager, &ConnectionEvent::CalibrationConfirmed).await;
    assert!(manager.is_connected());
    assert_eq!(manager.stats().protocol_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn test_latency_uses_last_sent_frame() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    manager.send_frame("a".to_string());
    tokio::time::advance(Duration::from_millis(50)).await;
    manager.send_frame("b".to_string());
    tokio::time::advance(Duration::from_millis(120)).await;

    connector.push_inbound(RESULT_JSON);
    let latency = loop {
        if let ConnectionEvent::Result { latency, .. } = manager.next_event().await {
            break latency;
        }
    };

    assert_eq!(latency, Some(Duration::from_millis(120)));
    let stats = manager.stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.results_received, 1);
    assert_eq!(stats.last_latency, Some(Duration::from_millis(120)));
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_keeps_reconnect_schedule() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    connector.transport_error("reset by peer");
    wait_for(
        &mut manager,
        &ConnectionEvent::TransportError("reset by peer".to_string()),
    )
    .await;
    assert_eq!(manager.status(), ConnectionStatus::Error);

    connector.drop_connection();
    wait_for(&mut manager, &ConnectionEvent::ReconnectDue).await;
    manager.reconnect().await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_control_messages() {
    let connector = MockConnector::new();
    let mut manager = manager_with(&connector);
    manager.connect().await.unwrap();

    connector.push_inbound(r#"{"type": "mode_set", "data": {"mode": "color_marker"}}"#);
    wait_for(&mut manager, &ConnectionEvent::ModeSet(DetectionMode::ColorMarker)).await;

    connector.push_inbound(r#"{"type": "error", "data": "no pose model"}"#);
    wait_for(
        &mut manager,
        &ConnectionEvent::RemoteError("no pose model".to_string()),
    )
    .await;

    connector.push_inbound(
        r#"{"type": "calibration_result", "data": {"detected_points": [
            {"id": "Red_1", "x": 1.0, "y": 2.0, "suggested_label": "left_shoulder", "confidence": 0.5}
        ]}}"#,
    );
    match manager.next_event().await {
        ConnectionEvent::CalibrationResult(points) => {
            assert_eq!(points[0].suggested_joint(), Some(AngleJoint::LeftShoulder));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
