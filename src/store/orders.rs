//! Open order store
//!
//! Holds at most one entry per order uuid. Orders reaching a terminal state
//! are removed, never retained.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use super::ConnectionStatus;

/// Side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    /// Human-readable form used in activity messages
    pub fn label(&self) -> &'static str {
        match self {
            OrderSide::Bid => "Buy",
            OrderSide::Ask => "Sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Bid => write!(f, "bid"),
            OrderSide::Ask => write!(f, "ask"),
        }
    }
}

/// Lifecycle state of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Wait,
    Trade,
    Done,
    Cancel,
    /// States this layer does not track
    #[serde(other)]
    Other,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Done | OrderState::Cancel)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Wait => "wait",
            OrderState::Trade => "trade",
            OrderState::Done => "done",
            OrderState::Cancel => "cancel",
            OrderState::Other => "other",
        };
        f.write_str(s)
    }
}

/// One of the user's open orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub uuid: String,
    pub market: String,
    pub side: OrderSide,
    pub ord_type: Option<String>,
    pub state: OrderState,
    pub price: Option<Decimal>,
    pub volume: Decimal,
    pub executed_volume: Decimal,
    pub remaining_volume: Decimal,
    /// Order creation time (milliseconds)
    pub order_timestamp: Option<u64>,
}

/// Open order state read by the render layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOrdersView {
    orders: HashMap<String, OpenOrder>,
    pub ws_status: ConnectionStatus,
    pub ws_error: Option<String>,
}

impl OpenOrdersView {
    /// Open orders, newest first
    pub fn orders(&self) -> Vec<OpenOrder> {
        let mut orders: Vec<OpenOrder> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            b.order_timestamp
                .cmp(&a.order_timestamp)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        orders
    }

    /// Open orders of one market, newest first
    pub fn orders_for_market(&self, market: &str) -> Vec<OpenOrder> {
        let mut orders = self.orders();
        orders.retain(|o| o.market == market);
        orders
    }

    pub fn get(&self, uuid: &str) -> Option<&OpenOrder> {
        self.orders.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Process-wide open order state with change notification
#[derive(Debug, Clone)]
pub struct OpenOrderStore {
    inner: Arc<watch::Sender<OpenOrdersView>>,
}

impl Default for OpenOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOrderStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OpenOrdersView::default());
        Self { inner: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> OpenOrdersView {
        self.inner.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OpenOrdersView> {
        self.inner.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.borrow().ws_status
    }

    /// Insert or replace by uuid
    pub(crate) fn upsert(&self, order: OpenOrder) {
        self.inner.send_modify(|view| {
            view.orders.insert(order.uuid.clone(), order);
        });
    }

    /// Remove by uuid, returning the removed entry
    pub(crate) fn remove(&self, uuid: &str) -> Option<OpenOrder> {
        let mut removed = None;
        self.inner.send_if_modified(|view| {
            removed = view.orders.remove(uuid);
            removed.is_some()
        });
        removed
    }

    pub(crate) fn clear(&self) {
        self.inner.send_if_modified(|view| {
            if view.orders.is_empty() {
                return false;
            }
            view.orders.clear();
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(uuid: &str, market: &str, ts: u64) -> OpenOrder {
        OpenOrder {
            uuid: uuid.to_string(),
            market: market.to_string(),
            side: OrderSide::Bid,
            ord_type: Some("limit".to_string()),
            state: OrderState::Wait,
            price: Some(dec!(100)),
            volume: dec!(1),
            executed_volume: dec!(0),
            remaining_volume: dec!(1),
            order_timestamp: Some(ts),
        }
    }

    #[test]
    fn test_upsert_is_keyed_by_uuid() {
        let store = OpenOrderStore::new();
        store.upsert(order("u1", "KRW-BTC", 1));

        let mut partial = order("u1", "KRW-BTC", 1);
        partial.state = OrderState::Trade;
        partial.executed_volume = dec!(0.4);
        partial.remaining_volume = dec!(0.6);
        store.upsert(partial);

        let view = store.snapshot();
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("u1").unwrap().executed_volume, dec!(0.4));
    }

    #[test]
    fn test_remove_and_clear() {
        let store = OpenOrderStore::new();
        store.upsert(order("u1", "KRW-BTC", 1));
        store.upsert(order("u2", "KRW-BTC", 2));

        assert!(store.remove("u1").is_some());
        assert!(store.remove("u1").is_none());
        assert_eq!(store.snapshot().len(), 1);

        store.clear();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_sorted_view() {
        let store = OpenOrderStore::new();
        store.upsert(order("a", "KRW-BTC", 10));
        store.upsert(order("b", "KRW-ETH", 30));
        store.upsert(order("c", "KRW-BTC", 20));

        let view = store.snapshot();
        let uuids: Vec<String> = view.orders().into_iter().map(|o| o.uuid).collect();
        assert_eq!(uuids, vec!["b", "c", "a"]);

        let btc: Vec<String> = view
            .orders_for_market("KRW-BTC")
            .into_iter()
            .map(|o| o.uuid)
            .collect();
        assert_eq!(btc, vec!["c", "a"]);
    }
}
