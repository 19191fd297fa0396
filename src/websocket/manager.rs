//! Public order book stream manager
//!
//! Keeps a live order book for one market at a time. A single task owns all
//! mutable state and handles one event at a time: target changes, transport
//! events, the reconnect timer and the throttle flush timer. Every transport
//! is tagged with a connection id; events from superseded connections are
//! discarded.

use chrono::Utc;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, Sleep};
use tracing::{debug, info, trace, warn};

use super::client::{Connector, Inbound, Transport};
use crate::config::{Config, DEFAULT_WS_ENDPOINT};
use crate::market::Exchange;
use crate::metrics::{metrics, PUBLIC_STREAM};
use crate::parser::{orderbook_subscription, ParsedFrame};
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::store::{ActivityLog, ConnectionStatus, Level, OrderBookStore};
use crate::throttle::{Offer, Throttle};

/// The only venue whose public order book this manager streams
pub const SUPPORTED_EXCHANGE: Exchange = Exchange::Upbit;

pub const PARSE_ERROR_MESSAGE: &str = "Failed to parse order book data";
pub const TRANSPORT_ERROR_MESSAGE: &str = "WebSocket error occurred";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Reconnecting...";

/// Settings of the public stream
#[derive(Debug, Clone)]
pub struct PublicStreamConfig {
    pub endpoint: String,
    pub throttle_interval: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for PublicStreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            throttle_interval: Duration::from_millis(16),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl From<&Config> for PublicStreamConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            throttle_interval: config.throttle_interval(),
            reconnect_policy: config.reconnect_policy(),
        }
    }
}

enum Command {
    SetTarget {
        market: Option<String>,
        exchange: Option<Exchange>,
    },
    Shutdown,
}

/// Handle to the public stream task
pub struct PublicStreamManager {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PublicStreamManager {
    /// Spawn the manager. It stays disconnected until a valid target is set.
    pub fn spawn(
        config: PublicStreamConfig,
        connector: Arc<dyn Connector>,
        store: OrderBookStore,
        log: ActivityLog,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let stream = PublicStream {
            throttle: Throttle::new(config.throttle_interval),
            backoff: Backoff::new(config.reconnect_policy.clone()),
            config,
            connector,
            store,
            log,
            market: None,
            connection: None,
            next_connection_id: 0,
            reconnect_timer: None,
            flush_timer: None,
            events_tx,
        };
        let task = tokio::spawn(stream.run(command_rx, events_rx));

        Self { commands, task }
    }

    /// Select the market and exchange to stream.
    ///
    /// The stream is active only for the supported exchange with a market
    /// present; any other combination disconnects it.
    pub fn set_target(&self, market: Option<String>, exchange: Option<Exchange>) {
        let _ = self.commands.send(Command::SetTarget { market, exchange });
    }

    /// Close the stream for good and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Public stream task ended abnormally");
        }
    }
}

#[derive(Debug)]
enum ConnectionEvent {
    Opened,
    Message(Inbound),
    Error(String),
    Closed,
}

#[derive(Debug)]
struct Tagged {
    id: u64,
    event: ConnectionEvent,
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// The connection currently owned by the manager
struct Connection {
    id: u64,
    market: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Set when this side asked for the close; consumed by the close handler
    intentional_close: bool,
}

impl Connection {
    fn close_intentionally(&mut self) {
        self.intentional_close = true;
        let _ = self.outbound.send(Outbound::Close);
    }
}

#[derive(Debug)]
struct BookUpdate {
    asks: Vec<Level>,
    bids: Vec<Level>,
    timestamp: Option<u64>,
}

struct PublicStream {
    config: PublicStreamConfig,
    connector: Arc<dyn Connector>,
    store: OrderBookStore,
    log: ActivityLog,
    /// Market of the active target, `None` while inert
    market: Option<String>,
    connection: Option<Connection>,
    next_connection_id: u64,
    backoff: Backoff,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    flush_timer: Option<Pin<Box<Sleep>>>,
    throttle: Throttle<BookUpdate>,
    events_tx: mpsc::UnboundedSender<Tagged>,
}

impl PublicStream {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Tagged>,
    ) {
        info!("Starting public order book stream manager");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetTarget { market, exchange }) => self.on_target(market, exchange),
                    Some(Command::Shutdown) | None => {
                        self.deactivate();
                        break;
                    }
                },
                Some(tagged) = events.recv() => self.on_connection_event(tagged),
                _ = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.connect();
                }
                _ = fire(&mut self.flush_timer) => {
                    self.flush_timer = None;
                    self.on_flush();
                }
            }
        }

        info!("Public order book stream manager stopped");
    }

    fn on_target(&mut self, market: Option<String>, exchange: Option<Exchange>) {
        let market = match (market, exchange) {
            (Some(market), Some(exchange)) if exchange == SUPPORTED_EXCHANGE && !market.is_empty() => {
                Some(market)
            }
            _ => None,
        };

        if market == self.market {
            return;
        }
        self.market = market;

        if self.market.is_some() {
            self.connect();
        } else {
            self.deactivate();
        }
    }

    fn connect(&mut self) {
        let Some(market) = self.market.clone() else {
            return;
        };

        self.reconnect_timer = None;
        if let Some(mut previous) = self.connection.take() {
            debug!(id = previous.id, market = %previous.market, "Closing superseded connection");
            previous.close_intentionally();
            self.clear_book();
        }

        self.store.set_error(None);
        self.store.set_status(ConnectionStatus::Connecting);

        self.next_connection_id += 1;
        let id = self.next_connection_id;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let transport = self.connector.transport(&self.config.endpoint);
        tokio::spawn(run_connection(transport, id, self.events_tx.clone(), outbound_rx));

        debug!(id, market = %market, endpoint = %self.config.endpoint, "Opening order book connection");
        self.connection = Some(Connection {
            id,
            market,
            outbound,
            intentional_close: false,
        });
    }

    fn deactivate(&mut self) {
        self.reconnect_timer = None;
        if let Some(connection) = self.connection.as_mut() {
            connection.close_intentionally();
        }
        self.clear_book();
        self.store.set_status(ConnectionStatus::Disconnected);
        self.store.set_error(None);
    }

    fn on_connection_event(&mut self, tagged: Tagged) {
        let Some(connection) = self.connection.as_ref() else {
            trace!(id = tagged.id, "Discarding event without a connection");
            return;
        };
        if connection.id != tagged.id {
            trace!(id = tagged.id, current = connection.id, "Discarding event from superseded connection");
            return;
        }
        // a connection being closed only reports its close
        if connection.intentional_close && !matches!(tagged.event, ConnectionEvent::Closed) {
            return;
        }

        match tagged.event {
            ConnectionEvent::Opened => self.on_open(),
            ConnectionEvent::Message(message) => self.on_message(message),
            ConnectionEvent::Error(error) => self.on_error(error),
            ConnectionEvent::Closed => self.on_close(),
        }
    }

    fn on_open(&mut self) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };

        self.store.set_status(ConnectionStatus::Connected);
        self.backoff.reset();
        self.store.set_error(None);
        self.log
            .info(format!("Order book stream connected ({})", connection.market));

        let ticket = format!("market-stream-{}-{}", Utc::now().timestamp_millis(), connection.id);
        match orderbook_subscription(&ticket, &connection.market) {
            Ok(frame) => {
                debug!(ticket = %ticket, market = %connection.market, "Subscribing to order book");
                let _ = connection.outbound.send(Outbound::Text(frame));
            }
            Err(e) => warn!(error = %e, "Failed to build subscription frame"),
        }
    }

    fn on_message(&mut self, message: Inbound) {
        match ParsedFrame::parse(message.as_bytes()) {
            Ok(ParsedFrame::Orderbook(frame)) => {
                metrics().frames_received.inc();
                let timestamp = frame.timestamp;
                let (asks, bids) = frame.into_levels();
                self.offer(BookUpdate {
                    asks,
                    bids,
                    timestamp,
                });
            }
            Ok(ParsedFrame::Ignored(frame_type)) => {
                trace!(frame_type = ?frame_type, "Ignoring non order book frame");
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse order book frame");
                metrics().parse_errors.with_label_values(&[PUBLIC_STREAM]).inc();
                self.store.set_error(Some(PARSE_ERROR_MESSAGE.to_string()));
            }
        }
    }

    fn offer(&mut self, update: BookUpdate) {
        let superseding = self.throttle.has_pending();

        match self.throttle.offer(update, Instant::now()) {
            Offer::Publish(update) => self.publish(update),
            Offer::Deferred { flush_at } => {
                if superseding {
                    metrics().frames_coalesced.inc();
                }
                if let Some(at) = flush_at {
                    self.flush_timer = Some(Box::pin(sleep_until(at)));
                }
            }
        }
    }

    fn on_flush(&mut self) {
        if let Some(update) = self.throttle.flush(Instant::now()) {
            self.publish(update);
        }
    }

    fn publish(&self, update: BookUpdate) {
        self.store.set_book(update.asks, update.bids, update.timestamp);
        metrics().books_published.inc();
    }

    fn on_error(&mut self, error: String) {
        self.log.error(format!("Order book stream error: {}", error));
        self.store.set_error(Some(TRANSPORT_ERROR_MESSAGE.to_string()));
    }

    fn on_close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        self.store.set_status(ConnectionStatus::Disconnected);
        self.clear_book();

        if connection.intentional_close {
            debug!(id = connection.id, market = %connection.market, "Order book connection closed");
            return;
        }

        self.log
            .warning(format!("Order book stream disconnected ({})", connection.market));
        self.store.set_error(Some(CONNECTION_LOST_MESSAGE.to_string()));

        let delay = self.backoff.next_delay();
        metrics().reconnects.with_label_values(&[PUBLIC_STREAM]).inc();
        self.log.info(format!(
            "Reconnecting order book stream in {:?} (attempt {})",
            delay,
            self.backoff.attempts()
        ));
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    /// Empty the book and drop any frame waiting for a flush
    fn clear_book(&mut self) {
        self.throttle.cancel();
        self.flush_timer = None;
        self.store.clear_book();
    }
}

/// Owns one transport: reports its lifecycle as tagged events and executes outbound requests
async fn run_connection(
    mut transport: Box<dyn Transport>,
    id: u64,
    events: mpsc::UnboundedSender<Tagged>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let emit = |event: ConnectionEvent| {
        let _ = events.send(Tagged { id, event });
    };

    // a close requested during the handshake abandons it
    let connected = tokio::select! {
        result = transport.connect() => result,
        _ = outbound.recv() => {
            emit(ConnectionEvent::Closed);
            return;
        }
    };
    if let Err(e) = connected {
        emit(ConnectionEvent::Error(e.to_string()));
        emit(ConnectionEvent::Closed);
        return;
    }
    emit(ConnectionEvent::Opened);

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = transport.send(text).await {
                        emit(ConnectionEvent::Error(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    transport.close().await;
                    emit(ConnectionEvent::Closed);
                    return;
                }
            },
            inbound = transport.recv() => match inbound {
                Ok(Some(message)) => emit(ConnectionEvent::Message(message)),
                Ok(None) => {
                    debug!(id, endpoint = %transport.endpoint(), "Connection closed by peer");
                    emit(ConnectionEvent::Closed);
                    return;
                }
                Err(e) => {
                    emit(ConnectionEvent::Error(e.to_string()));
                    emit(ConnectionEvent::Closed);
                    return;
                }
            },
        }
    }
}

/// Completes when the timer elapses; never completes when no timer is set
pub(crate) async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(timer) => timer.await,
        None => pending().await,
    }
}
