use thiserror::Error;

#[derive(Error, Debug)]
pub enum GaitError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Connection-level failures. Never fatal: the connection manager reacts by
/// scheduling a reconnect.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {details}")]
    Connect { endpoint: String, details: String },

    #[error("Connection attempt to {endpoint} timed out")]
    ConnectTimeout { endpoint: String },

    #[error("Send failed: {details}")]
    Send { details: String },

    #[error("Connection closed")]
    Closed,

    #[error("Not connected")]
    NotConnected,
}

/// Malformed or unexpected inbound traffic. Logged and dropped.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type: {message_type}")]
    UnknownType { message_type: String },

    #[error("Invalid payload for '{message_type}': {details}")]
    InvalidPayload { message_type: String, details: String },
}

/// Camera or frame-source failures, surfaced to the operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Camera access denied: {details}")]
    PermissionDenied { details: String },

    #[error("Camera not available: {details}")]
    NotAvailable { details: String },

    #[error("Frame capture failed: {details}")]
    Capture { details: String },

    #[error("Media stream not acquired")]
    NotAcquired,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration already confirmed")]
    AlreadyConfirmed,

    #[error("Unknown marker color: {color_name}")]
    UnknownColor { color_name: String },

    #[error("Joint {joint} is not tracked by color markers")]
    UnsupportedJoint { joint: String },

    #[error("Invalid HSV range: {details}")]
    InvalidHsvRange { details: String },

    #[error("Preset not found: {id}")]
    PresetNotFound { id: String },

    #[error("The built-in default preset cannot be deleted")]
    DefaultPresetProtected,

    #[error("Preset name must not be empty")]
    EmptyPresetName,

    #[error("Preset store failure: {details}")]
    Store { details: String },
}

/// Session persistence collaborator failures. Caught locally; the live
/// pipeline carries on with a locally synthesized record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Persistence backend unavailable: {details}")]
    Unavailable { details: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Persistence request failed: {details}")]
    Request { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },

    #[error("Event bus closed")]
    ChannelClosed,
}

impl GaitError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the live pipeline can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GaitError::Transport(_)
                | GaitError::Protocol(_)
                | GaitError::Media(_)
                | GaitError::Persistence(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GaitError>;
