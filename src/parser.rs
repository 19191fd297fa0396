//! Parser module for venue wire messages
//!
//! Handles the public order book frames, the outbound subscription frame and
//! the normalization of relayed private order events. Venue field names stay
//! inside this module.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{Level, OpenOrder, OrderSide, OrderState};

/// Stream type of order book frames
pub const ORDERBOOK_TYPE: &str = "orderbook";

/// Public order book frame.
///
/// Aliases cover the abbreviated field names of the venue's compact format.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookFrame {
    /// Stream type
    #[serde(rename = "type", alias = "ty")]
    pub frame_type: String,

    /// Market code
    #[serde(alias = "cd", default)]
    pub code: String,

    /// Exchange timestamp (milliseconds)
    #[serde(alias = "tms", default)]
    pub timestamp: Option<u64>,

    /// Paired ask/bid levels, best first
    #[serde(alias = "obu", default)]
    pub orderbook_units: Vec<OrderbookUnit>,
}

/// One row of the venue's order book: an ask level and a bid level side by side
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookUnit {
    #[serde(alias = "ap")]
    pub ask_price: Decimal,

    #[serde(alias = "bp")]
    pub bid_price: Decimal,

    #[serde(alias = "as")]
    pub ask_size: Decimal,

    #[serde(alias = "bs")]
    pub bid_size: Decimal,
}

impl OrderbookFrame {
    /// Split the units into ask and bid sequences, keeping the venue ordering
    pub fn into_levels(self) -> (Vec<Level>, Vec<Level>) {
        self.orderbook_units
            .into_iter()
            .map(|unit| {
                (
                    Level {
                        price: unit.ask_price,
                        size: unit.ask_size,
                    },
                    Level {
                        price: unit.bid_price,
                        size: unit.bid_size,
                    },
                )
            })
            .unzip()
    }
}

/// Parsed public stream message
#[derive(Debug, Clone)]
pub enum ParsedFrame {
    Orderbook(OrderbookFrame),
    /// Any other declared type, or none at all
    Ignored(Option<String>),
}

impl ParsedFrame {
    /// Parse a raw frame. Binary frames are passed as their bytes and must be UTF-8 JSON.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)?;

        let frame_type = value
            .get("type")
            .or_else(|| value.get("ty"))
            .and_then(Value::as_str);

        if frame_type != Some(ORDERBOOK_TYPE) {
            return Ok(ParsedFrame::Ignored(frame_type.map(str::to_string)));
        }

        let frame: OrderbookFrame = serde_json::from_value(value)?;
        Ok(ParsedFrame::Orderbook(frame))
    }
}

#[derive(Serialize)]
struct Ticket<'a> {
    ticket: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypeSpec<'a> {
    #[serde(rename = "type")]
    stream_type: &'a str,
    codes: [&'a str; 1],
    is_only_realtime: bool,
}

/// Build the subscription frame for a single market's realtime order book
pub fn orderbook_subscription(ticket: &str, code: &str) -> Result<String> {
    let frame = (
        Ticket { ticket },
        TypeSpec {
            stream_type: ORDERBOOK_TYPE,
            codes: [code],
            is_only_realtime: true,
        },
    );
    Ok(serde_json::to_string(&frame)?)
}

/// Private order event as relayed by the backend, in venue field names
#[derive(Debug, Clone, Deserialize)]
struct WireOrderEvent {
    uuid: String,

    #[serde(rename = "code", alias = "market")]
    market: String,

    #[serde(rename = "ask_bid", alias = "side", deserialize_with = "deserialize_side")]
    side: OrderSide,

    #[serde(alias = "order_type", default)]
    ord_type: Option<String>,

    state: OrderState,

    #[serde(default)]
    price: Option<Decimal>,

    #[serde(default)]
    avg_price: Option<Decimal>,

    #[serde(default)]
    volume: Option<Decimal>,

    #[serde(default)]
    executed_volume: Option<Decimal>,

    #[serde(default)]
    remaining_volume: Option<Decimal>,

    #[serde(default)]
    order_timestamp: Option<u64>,

    #[serde(default)]
    timestamp: Option<u64>,
}

/// Normalized private order event
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub uuid: String,
    pub market: String,
    pub side: OrderSide,
    pub ord_type: Option<String>,
    pub state: OrderState,
    pub price: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    pub volume: Decimal,
    pub executed_volume: Decimal,
    pub remaining_volume: Decimal,
    pub order_timestamp: Option<u64>,
}

impl OrderEvent {
    /// Parse and normalize a relayed payload
    pub fn parse(payload: &str) -> Result<Self> {
        let wire: WireOrderEvent = serde_json::from_str(payload)?;
        Ok(wire.into())
    }

    /// Open-order entry carried by this event
    pub fn to_open_order(&self) -> OpenOrder {
        OpenOrder {
            uuid: self.uuid.clone(),
            market: self.market.clone(),
            side: self.side,
            ord_type: self.ord_type.clone(),
            state: self.state,
            price: self.price,
            volume: self.volume,
            executed_volume: self.executed_volume,
            remaining_volume: self.remaining_volume,
            order_timestamp: self.order_timestamp,
        }
    }
}

impl From<WireOrderEvent> for OrderEvent {
    fn from(wire: WireOrderEvent) -> Self {
        Self {
            uuid: wire.uuid,
            market: wire.market,
            side: wire.side,
            ord_type: wire.ord_type,
            state: wire.state,
            price: wire.price,
            avg_price: wire.avg_price,
            volume: wire.volume.unwrap_or_default(),
            executed_volume: wire.executed_volume.unwrap_or_default(),
            remaining_volume: wire.remaining_volume.unwrap_or_default(),
            order_timestamp: wire.order_timestamp.or(wire.timestamp),
        }
    }
}

/// Venue sends "BID"/"ASK"; normalized payloads send "bid"/"ask"
fn deserialize_side<'de, D>(deserializer: D) -> std::result::Result<OrderSide, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_ascii_lowercase().as_str() {
        "bid" => Ok(OrderSide::Bid),
        "ask" => Ok(OrderSide::Ask),
        other => Err(serde::de::Error::custom(format!("Invalid order side: {}", other))),
    }
}
