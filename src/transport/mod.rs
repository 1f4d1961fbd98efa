//! Bidirectional text transport to the inference endpoint.
//!
//! A [`Connector`] opens links; each link pushes its inbound traffic and
//! lifecycle changes into the event channel handed to `open`, tagged with the
//! link id so stale events from a replaced link can be told apart.

pub mod mock;

#[cfg(feature = "websocket")]
pub mod websocket;

use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Traffic and lifecycle notifications from an open link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message { link_id: u64, text: String },
    Closed { link_id: u64 },
    Error { link_id: u64, message: String },
}

impl TransportEvent {
    pub fn link_id(&self) -> u64 {
        match self {
            TransportEvent::Message { link_id, .. }
            | TransportEvent::Closed { link_id }
            | TransportEvent::Error { link_id, .. } => *link_id,
        }
    }
}

/// Write half of an open connection
pub trait TransportLink: Send {
    /// Queue a text message. Messages are delivered in call order.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Close the link. No further events are emitted for it afterwards.
    fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        link_id: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, TransportError>;
}

pub use mock::{MockConnector, MockLinkHandle};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
