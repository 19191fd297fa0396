//! Prometheus counters for both streams

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{Result, StreamError};

pub const PUBLIC_STREAM: &str = "orderbook";
pub const PRIVATE_STREAM: &str = "orders";

/// Counters registered on the default registry
pub struct StreamMetrics {
    /// Reconnects scheduled, by stream
    pub reconnects: IntCounterVec,
    /// Order book frames accepted from the transport
    pub frames_received: IntCounter,
    /// Order book snapshots written to the store
    pub books_published: IntCounter,
    /// Frames overwritten in the pending slot before a flush
    pub frames_coalesced: IntCounter,
    /// Unparseable messages, by stream
    pub parse_errors: IntCounterVec,
    /// Order events applied, by lifecycle state
    pub order_events: IntCounterVec,
}

static METRICS: OnceLock<StreamMetrics> = OnceLock::new();

/// Process-wide metrics, registered on first use
pub fn metrics() -> &'static StreamMetrics {
    METRICS.get_or_init(StreamMetrics::register)
}

impl StreamMetrics {
    fn register() -> Self {
        let metrics = Self {
            reconnects: counter_vec(
                "stream_reconnects_scheduled_total",
                "Reconnect attempts scheduled",
                &["stream"],
            ),
            frames_received: counter(
                "orderbook_frames_received_total",
                "Order book frames received",
            ),
            books_published: counter(
                "orderbook_published_total",
                "Order book snapshots published to the store",
            ),
            frames_coalesced: counter(
                "orderbook_frames_coalesced_total",
                "Order book frames superseded before publication",
            ),
            parse_errors: counter_vec(
                "stream_parse_errors_total",
                "Messages that failed to parse",
                &["stream"],
            ),
            order_events: counter_vec(
                "order_events_total",
                "Private order events applied",
                &["state"],
            ),
        };

        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(metrics.reconnects.clone()),
            Box::new(metrics.frames_received.clone()),
            Box::new(metrics.books_published.clone()),
            Box::new(metrics.frames_coalesced.clone()),
            Box::new(metrics.parse_errors.clone()),
            Box::new(metrics.order_events.clone()),
        ];
        let registry = prometheus::default_registry();
        for collector in collectors {
            if let Err(e) = registry.register(collector) {
                warn!(error = %e, "Failed to register metric");
            }
        }

        metrics
    }
}

// Definitions are constant; construction only fails on invalid names.
fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("valid metric definition")
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("valid metric definition")
}

/// Default registry in the Prometheus text format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| StreamError::Metrics(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| StreamError::Metrics(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        metrics().reconnects.with_label_values(&[PUBLIC_STREAM]).inc();
        metrics().frames_received.inc();

        let text = render().unwrap();
        assert!(text.contains("stream_reconnects_scheduled_total"));
        assert!(text.contains("orderbook_frames_received_total"));
    }
}
