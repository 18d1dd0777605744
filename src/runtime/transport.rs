//! Transport seam of the async run loop, and an in-process channel
//! implementation for embedding and tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{Error, Result};

use super::services::{RequestEnvelope, ResponseEnvelope};

/// Moves decoded service requests in and responses out. Encoding and
/// security live behind this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Requests that arrived, waiting at most `timeout` for the first one.
    async fn receive(&self, timeout: Duration) -> Vec<RequestEnvelope>;

    async fn send(&self, response: ResponseEnvelope) -> Result<()>;
}

/// Server side of an in-process channel pair.
pub struct ChannelTransport {
    requests: Mutex<mpsc::UnboundedReceiver<RequestEnvelope>>,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
}

/// Client side of an in-process channel pair.
pub struct ClientEndpoint {
    requests: mpsc::UnboundedSender<RequestEnvelope>,
    responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ClientEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport { requests: Mutex::new(request_rx), responses: response_tx },
            ClientEndpoint { requests: request_tx, responses: response_rx },
        )
    }
}

fn closed(what: &str) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("{what} closed")))
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn receive(&self, timeout: Duration) -> Vec<RequestEnvelope> {
        let mut rx = self.requests.lock().await;
        let first = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                // Every client is gone; keep the loop from spinning.
                tokio::time::sleep(timeout).await;
                return Vec::new();
            }
            Err(_) => return Vec::new(),
        };
        let mut batch = vec![first];
        while let Ok(request) = rx.try_recv() {
            batch.push(request);
        }
        batch
    }

    async fn send(&self, response: ResponseEnvelope) -> Result<()> {
        self.responses.send(response).map_err(|_| closed("client endpoint"))
    }
}

impl ClientEndpoint {
    pub fn send(&self, request: RequestEnvelope) -> Result<()> {
        self.requests.send(request).map_err(|_| closed("server transport"))
    }

    /// Next response; `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<ResponseEnvelope> {
        self.responses.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ResponseEnvelope> {
        self.responses.try_recv().ok()
    }
}
