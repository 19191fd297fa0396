//! Contract of the privileged backend that owns the authenticated order stream
//!
//! Credentials never reach this layer. The backend starts and stops the
//! transport on request and relays what happens on it as a feed with three
//! channels: messages, status changes and errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_DISCONNECTED: &str = "disconnected";
pub const STATUS_ERROR: &str = "error";

/// One event on the relayed feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// JSON-encoded venue order event
    Message(String),
    /// One of `connected`, `disconnected`, `error`
    Status(String),
    /// Human-readable error
    Error(String),
}

/// Error body of a failed start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    pub message: String,
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<BackendError>,
}

impl StartResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(BackendError {
                message: message.into(),
            }),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrivateStreamBackend: Send + Sync {
    /// Ask the backend to open the authenticated stream
    async fn start_private_stream(&self) -> Result<StartResponse>;

    /// Ask the backend to close the stream. Stopping a stopped stream is not an error.
    async fn stop_private_stream(&self) -> Result<()>;

    /// Register a listener on the relayed feed; dropping the receiver unregisters it
    fn subscribe(&self) -> broadcast::Receiver<FeedEvent>;
}
