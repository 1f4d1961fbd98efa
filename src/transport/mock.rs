use super::{Connector, TransportEvent, TransportLink};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct MockState {
    sent: Vec<String>,
    fail_next: u32,
    open_count: u32,
    active: Option<(u64, mpsc::UnboundedSender<TransportEvent>)>,
}

/// In-process connector for exercising the connection manager without a
/// network. Clones share state, so a test keeps one handle while the manager
/// owns another.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    /// Every text sent on any link, in order
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// `type` field of every sent message, in order
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter_map(|value| value["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Number of successful opens
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Deliver a message from the "server" on the active link
    pub fn push_inbound(&self, text: &str) -> bool {
        self.emit(|link_id| TransportEvent::Message {
            link_id,
            text: text.to_string(),
        })
    }

    /// Simulate the server dropping the connection
    pub fn drop_connection(&self) -> bool {
        let delivered = self.emit(|link_id| TransportEvent::Closed { link_id });
        self.state.lock().active = None;
        delivered
    }

    /// Simulate a transport error on the active link
    pub fn transport_error(&self, message: &str) -> bool {
        self.emit(|link_id| TransportEvent::Error {
            link_id,
            message: message.to_string(),
        })
    }

    fn emit<F: FnOnce(u64) -> TransportEvent>(&self, event: F) -> bool {
        let state = self.state.lock();
        match &state.active {
            Some((link_id, events)) => events.send(event(*link_id)).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        endpoint: &str,
        link_id: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                details: "mock connection refused".to_string(),
            });
        }

        state.open_count += 1;
        state.active = Some((link_id, events));
        debug!("Mock link {} opened to {}", link_id, endpoint);

        Ok(Box::new(MockLinkHandle {
            link_id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Link handed out by [`MockConnector`]
pub struct MockLinkHandle {
    link_id: u64,
    state: Arc<Mutex<MockState>>,
}

impl MockLinkHandle {
    fn is_current(state: &MockState, link_id: u64) -> bool {
        matches!(state.active, Some((active, _)) if active == link_id)
    }
}

impl TransportLink for MockLinkHandle {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !Self::is_current(&state, self.link_id) {
            return Err(TransportError::Closed);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if Self::is_current(&state, self.link_id) {
            state.active = None;
        }
    }
}
