use super::{Connector, TransportEvent, TransportLink};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Opens WebSocket links with a bounded handshake time
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        endpoint: &str,
        link_id: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn TransportLink>, TransportError> {
        debug!("Opening WebSocket link {} to {}", link_id, endpoint);

        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(endpoint))
                .await
                .map_err(|_| TransportError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                })?
                .map_err(|e| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    details: e.to_string(),
                })?;

        info!("WebSocket link {} connected to {}", link_id, endpoint);

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(message).await {
                            warn!("WebSocket link {} write failed: {}", link_id, e);
                            break;
                        }
                    }
                }
            }
            trace!("WebSocket link {} writer stopped", link_id);
        });

        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_cancel.cancelled() => return,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message { link_id, text }).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket link {} closed by peer: {:?}", link_id, frame);
                        break;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!("Ignoring {} byte binary message on link {}", data.len(), link_id);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error {
                            link_id,
                            message: e.to_string(),
                        });
                        break;
                    }
                    None => break,
                }
            }
            let _ = events.send(TransportEvent::Closed { link_id });
        });

        Ok(Box::new(WebSocketLink {
            outbound: outbound_tx,
            cancel,
            writer: Some(writer),
            reader: Some(reader),
        }))
    }
}

struct WebSocketLink {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportLink for WebSocketLink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| TransportError::Send {
                details: "writer task has stopped".to_string(),
            })
    }

    fn close(&mut self) {
        self.cancel.cancel();
        // The writer sends the close frame on its own; the reader has nothing left to do
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.take();
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.close();
    }
}
