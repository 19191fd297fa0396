//! Private open-order stream
//!
//! The authenticated transport is owned by a backend; this side only drives it
//! and reconciles the relayed order events into the open-order store.

mod backend;
mod manager;
mod relay;

pub use backend::{
    BackendError, FeedEvent, PrivateStreamBackend, StartResponse, STATUS_CONNECTED,
    STATUS_DISCONNECTED, STATUS_ERROR,
};
pub use manager::PrivateStreamManager;
pub use relay::{RelayBackend, EVENT_SOCKET_DOWN_MESSAGE};

#[cfg(test)]
pub(crate) use backend::MockPrivateStreamBackend;
