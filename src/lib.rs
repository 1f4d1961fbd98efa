pub mod app;
pub mod calibration;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod geometry;
pub mod media;
pub mod persistence;
pub mod pose;
pub mod protocol;
pub mod trajectory;
pub mod transport;

pub use app::{Collaborators, GaitOrchestrator, OrchestratorCommand, OrchestratorHandle, ShutdownReason};
pub use calibration::{
    CalibrationCoordinator, ColorMarkerConfig, DetectedPoint, DetectionMode, HsvRange, JsonPresetStore,
    MarkerPreset, MemoryPresetStore, PresetStore,
};
pub use config::GaitConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, ReconnectPolicy};
pub use error::{GaitError, Result};
pub use events::{AnalysisUpdate, EventBus, EventFilter, EventReceiver, GaitEvent};
pub use media::{DirectoryFrameSource, FrameScheduler, FrameSource, MemoryFrameSource};
pub use persistence::{
    FallbackSessionStore, InMemorySessionStore, MetricsSummary, Session, SessionStore, UnavailableSessionStore,
};
pub use pose::{AnalysisResult, AngleJoint, GaitMetrics, Joint, JointAngles, Keypoint, KeypointSet};
pub use trajectory::{Limb, Trajectory, TrajectoryBuffer, TrajectoryPoint};
pub use transport::{Connector, MockConnector, TransportLink};

#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;
