//! WebSocket client and transport abstraction
//!
//! Handles connection, message reception and close. The [`Transport`] trait
//! lets the stream managers run against scripted transports in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StreamError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Data frame received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Binary frame; its payload is UTF-8 JSON
    Binary(Vec<u8>),
}

impl Inbound {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Inbound::Text(text) => text.as_bytes(),
            Inbound::Binary(data) => data,
        }
    }
}

/// A single outbound connection
#[async_trait]
pub trait Transport: Send {
    /// Open the connection
    async fn connect(&mut self) -> Result<()>;

    /// Send a text frame
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next data frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<Inbound>>;

    /// Close the connection
    async fn close(&mut self);

    fn endpoint(&self) -> &str;
}

/// Creates a fresh transport per connection attempt
pub trait Connector: Send + Sync {
    fn transport(&self, endpoint: &str) -> Box<dyn Transport>;
}

/// Connector producing [`WebSocketClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn transport(&self, endpoint: &str) -> Box<dyn Transport> {
        Box::new(WebSocketClient::new(endpoint))
    }
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl Transport for WebSocketClient {
    async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(self.endpoint.as_str()).await.map_err(|e| {
            StreamError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(StreamError::NotConnected)?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::WebSocketMessage(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        loop {
            let stream = self.stream.as_mut().ok_or(StreamError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Received text message");
                    return Ok(Some(Inbound::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(len = data.len(), "Received binary message");
                    return Ok(Some(Inbound::Binary(data)));
                }
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!("Received pong");
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "Received close frame");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    self.stream = None;
                    return Err(StreamError::WebSocketMessage(e.to_string()));
                }
                None => {
                    warn!("WebSocket stream ended");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_bytes() {
        assert_eq!(Inbound::Text("{}".to_string()).as_bytes(), b"{}");
        assert_eq!(Inbound::Binary(b"[1]".to_vec()).as_bytes(), b"[1]");
    }

    #[tokio::test]
    async fn test_unconnected_client() {
        let mut client = WebSocketClient::new("wss://example.invalid/websocket/v1");
        assert!(!client.is_connected());
        assert!(matches!(
            client.send("{}".to_string()).await,
            Err(StreamError::NotConnected)
        ));
        assert!(matches!(client.recv().await, Err(StreamError::NotConnected)));
        client.close().await;
    }
}
