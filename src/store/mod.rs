//! Observable stores
//!
//! Shared state published by the stream managers and read by the render
//! layer. Managers are the only writers; readers take snapshots or subscribe
//! to change notifications.

mod activity;
mod orderbook;
mod orders;

pub use activity::{ActivityLog, LogEntry, LogLevel};
pub use orderbook::{Level, OrderBookStore, OrderBookView};
pub use orders::{OpenOrder, OpenOrderStore, OpenOrdersView, OrderSide, OrderState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}
