//! Order book store

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use super::ConnectionStatus;

/// A single level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book state read by the render layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookView {
    /// Asks, lowest price first
    pub asks: Vec<Level>,
    /// Bids, highest price first
    pub bids: Vec<Level>,
    /// Exchange timestamp of the last accepted frame (milliseconds)
    pub timestamp: Option<u64>,
    pub ws_status: ConnectionStatus,
    pub ws_error: Option<String>,
}

impl OrderBookView {
    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Absolute spread between best ask and best bid
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Get spread in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.spread(), self.mid_price()) {
            (Some(spread), Some(mid)) if mid > Decimal::ZERO => {
                Some(spread / mid * Decimal::from(10000))
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }
}

/// Process-wide order book state with change notification
#[derive(Debug, Clone)]
pub struct OrderBookStore {
    inner: Arc<watch::Sender<OrderBookView>>,
}

impl Default for OrderBookStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OrderBookView::default());
        Self { inner: Arc::new(tx) }
    }

    /// Current state
    pub fn snapshot(&self) -> OrderBookView {
        self.inner.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<OrderBookView> {
        self.inner.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.borrow().ws_status
    }

    /// Replace both sides and the timestamp in one update
    pub(crate) fn set_book(&self, asks: Vec<Level>, bids: Vec<Level>, timestamp: Option<u64>) {
        self.inner.send_modify(|view| {
            view.asks = asks;
            view.bids = bids;
            view.timestamp = timestamp;
        });
    }

    pub(crate) fn clear_book(&self) {
        self.inner.send_if_modified(|view| {
            if view.is_empty() && view.timestamp.is_none() {
                return false;
            }
            view.asks.clear();
            view.bids.clear();
            view.timestamp = None;
            true
        });
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.inner.send_if_modified(|view| {
            let changed = view.ws_status != status;
            view.ws_status = status;
            changed
        });
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        self.inner.send_if_modified(|view| {
            let changed = view.ws_error != error;
            view.ws_error = error;
            changed
        });
    }
}
