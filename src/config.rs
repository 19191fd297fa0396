//! Configuration module for the stream layer

use serde::{Deserialize, Deserializer};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::market::Exchange;
use crate::reconnect::ReconnectPolicy;

/// Public order book endpoint
pub const DEFAULT_WS_ENDPOINT: &str = "wss://api.upbit.com/websocket/v1";

/// Config file read by [`Config::load`] unless `MARKET_STREAM_CONFIG` says otherwise
pub const DEFAULT_CONFIG_FILE: &str = "market-stream.toml";

/// Prefix of the environment overrides (`STREAM_MARKET`, `STREAM_WS_ENDPOINT`, ...)
const ENV_PREFIX: &str = "STREAM";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Exchange selected in the terminal
    pub exchange: Exchange,

    /// Market code to stream (e.g. "KRW-BTC")
    #[serde(default)]
    pub market: Option<String>,

    /// Public WebSocket endpoint
    pub ws_endpoint: String,

    /// HTTP endpoint of the backend relay for the private stream
    #[serde(default)]
    pub relay_endpoint: Option<String>,

    /// Event socket of the backend relay, derived from `relay_endpoint` when absent
    #[serde(default)]
    pub relay_ws_endpoint: Option<String>,

    /// Minimum spacing between published order book updates
    pub throttle_interval_ms: u64,

    /// Reconnect delay ladder
    #[serde(deserialize_with = "deserialize_delays")]
    pub reconnect_delays_ms: Vec<u64>,

    /// Port of the health/metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from `.env`, the config file and `STREAM_*` environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = env::var("MARKET_STREAM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::build(Some(Path::new(&path)), true)
    }

    /// Load configuration from a single file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::build(Some(path), false)
    }

    fn build(file: Option<&Path>, with_env: bool) -> Result<Self> {
        let defaults = Self::default();
        let delays: Vec<i64> = defaults
            .reconnect_delays_ms
            .iter()
            .map(|d| *d as i64)
            .collect();

        let mut builder = config::Config::builder()
            .set_default("exchange", defaults.exchange.as_str())?
            .set_default("ws_endpoint", defaults.ws_endpoint.as_str())?
            .set_default("throttle_interval_ms", defaults.throttle_interval_ms as i64)?
            .set_default("reconnect_delays_ms", delays)?
            .set_default("health_port", defaults.health_port as i64)?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        if with_env {
            builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect_delays_ms.is_empty() {
            return Err(StreamError::ConfigError(
                "reconnect_delays_ms must contain at least one delay".to_string(),
            ));
        }
        if self.market.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(StreamError::ConfigError("market must not be blank".to_string()));
        }
        Ok(())
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from_millis(&self.reconnect_delays_ms)
    }

    /// Event socket of the relay: explicit setting, else `relay_endpoint` with a ws scheme
    pub fn relay_events_endpoint(&self) -> Option<String> {
        if let Some(ws) = &self.relay_ws_endpoint {
            return Some(ws.clone());
        }
        self.relay_endpoint.as_ref().map(|http| {
            let base = http.trim_end_matches('/');
            let ws = if let Some(rest) = base.strip_prefix("https://") {
                format!("wss://{}", rest)
            } else if let Some(rest) = base.strip_prefix("http://") {
                format!("ws://{}", rest)
            } else {
                base.to_string()
            };
            format!("{}/private-stream/events", ws)
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: Exchange::Upbit,
            market: None,
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            relay_endpoint: None,
            relay_ws_endpoint: None,
            throttle_interval_ms: 16,
            reconnect_delays_ms: vec![1000, 2000, 4000, 8000, 16000],
            health_port: 9090,
        }
    }
}

/// Accepts either a list (`[1000, 2000]`) or a comma-separated string (`"1000,2000"`)
fn deserialize_delays<'de, D>(deserializer: D) -> std::result::Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DelayList {
        List(Vec<u64>),
        Text(String),
    }

    match DelayList::deserialize(deserializer)? {
        DelayList::List(delays) => Ok(delays),
        DelayList::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>().map_err(serde::de::Error::custom))
            .collect(),
    }
}
