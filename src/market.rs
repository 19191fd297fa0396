//! Exchange identifiers and market code helpers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StreamError;

/// Exchanges known to the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Upbit,
    Bithumb,
    Binance,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Upbit => "upbit",
            Exchange::Bithumb => "bithumb",
            Exchange::Binance => "binance",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upbit" => Ok(Exchange::Upbit),
            "bithumb" => Ok(Exchange::Bithumb),
            "binance" => Ok(Exchange::Binance),
            other => Err(StreamError::ConfigError(format!("Unknown exchange: {}", other))),
        }
    }
}

/// Base currency of a `QUOTE-BASE` market code (`KRW-BTC` -> `BTC`).
///
/// Codes without a separator are returned as-is.
pub fn base_currency(market: &str) -> &str {
    market.split_once('-').map(|(_, base)| base).unwrap_or(market)
}
