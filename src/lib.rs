//! Market Stream - real-time order book and open-order streams
//!
//! This crate keeps a live order book for the selected market from the
//! exchange's public WebSocket feed and a live set of open orders from the
//! private order feed relayed by a privileged backend. Both are exposed as
//! observable stores for a rendering layer.

pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod parser;
pub mod private;
pub mod reconnect;
pub mod store;
pub mod throttle;
pub mod websocket;

pub use config::Config;
pub use error::{Result, StreamError};
pub use market::Exchange;
pub use parser::{OrderEvent, OrderbookFrame, ParsedFrame};
pub use private::{FeedEvent, PrivateStreamBackend, PrivateStreamManager, RelayBackend, StartResponse};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use store::{
    ActivityLog, ConnectionStatus, LogEntry, LogLevel, OpenOrder, OpenOrderStore, OrderBookStore,
    OrderBookView, OpenOrdersView,
};
pub use websocket::{Connector, PublicStreamConfig, PublicStreamManager, WsConnector};

/// Stores shared between the stream managers and their readers
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub orderbook: OrderBookStore,
    pub orders: OpenOrderStore,
    pub activity: ActivityLog,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}
