//! WebSocket module for the public order book stream

mod client;
mod manager;

pub use client::{Connector, Inbound, Transport, WebSocketClient, WsConnector};
pub use manager::{
    PublicStreamConfig, PublicStreamManager, CONNECTION_LOST_MESSAGE, PARSE_ERROR_MESSAGE,
    SUPPORTED_EXCHANGE, TRANSPORT_ERROR_MESSAGE,
};

pub(crate) use manager::fire;
