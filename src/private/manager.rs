//! Private order event stream manager
//!
//! Maintains the set of open orders from the feed relayed by the backend.
//! The transport lives in the backend; this task only registers on the
//! feed, asks the backend to start or stop, reconciles order events and
//! retries with backoff when the stream drops.
//!
//! A `connecting` guard makes `connect` idempotent while an attempt is in
//! flight or the stream is live. It is cleared on every failed or
//! disconnected outcome, but not on `connected`.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use super::backend::{
    FeedEvent, PrivateStreamBackend, StartResponse, STATUS_CONNECTED, STATUS_DISCONNECTED,
    STATUS_ERROR,
};
use crate::error::Result;
use crate::market::base_currency;
use crate::metrics::{metrics, PRIVATE_STREAM};
use crate::parser::OrderEvent;
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::store::{ActivityLog, ConnectionStatus, OpenOrderStore, OrderState};
use crate::websocket::fire;

const START_FAILED_MESSAGE: &str = "Failed to start private stream";

enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Handle to the private stream task
pub struct PrivateStreamManager {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PrivateStreamManager {
    pub fn spawn(
        backend: Arc<dyn PrivateStreamBackend>,
        store: OpenOrderStore,
        log: ActivityLog,
        policy: ReconnectPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (start_tx, start_rx) = mpsc::unbounded_channel();

        let stream = PrivateStream {
            backend,
            store,
            log,
            backoff: Backoff::new(policy),
            reconnect_timer: None,
            connecting: false,
            live: false,
            feed: None,
            attempt: 0,
            start_tx,
        };
        let task = tokio::spawn(stream.run(command_rx, start_rx));

        Self { commands, task }
    }

    /// Start streaming; ignored while an attempt is in flight or the stream is live
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Stop streaming and clear the open orders
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Disconnect and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Private stream task ended abnormally");
        }
    }
}

struct StartOutcome {
    attempt: u64,
    result: Result<StartResponse>,
}

struct PrivateStream {
    backend: Arc<dyn PrivateStreamBackend>,
    store: OpenOrderStore,
    log: ActivityLog,
    backoff: Backoff,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    /// Guard against overlapping connects
    connecting: bool,
    live: bool,
    /// Registered feed listener
    feed: Option<broadcast::Receiver<FeedEvent>>,
    /// Identity of the latest start request; older outcomes are discarded
    attempt: u64,
    start_tx: mpsc::UnboundedSender<StartOutcome>,
}

impl PrivateStream {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut starts: mpsc::UnboundedReceiver<StartOutcome>,
    ) {
        info!("Starting private order stream manager");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                },
                event = next_feed_event(&mut self.feed) => self.on_feed(event),
                Some(outcome) = starts.recv() => self.on_start_outcome(outcome),
                _ = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.connect();
                }
            }
        }

        info!("Private order stream manager stopped");
    }

    fn connect(&mut self) {
        if self.connecting {
            debug!("Private stream connect already in progress");
            return;
        }
        self.connecting = true;

        self.reconnect_timer = None;
        self.teardown_listeners();
        self.store.set_error(None);
        self.store.set_status(ConnectionStatus::Connecting);

        // listen before the backend can report anything
        self.feed = Some(self.backend.subscribe());

        self.attempt += 1;
        let attempt = self.attempt;
        let backend = self.backend.clone();
        let start_tx = self.start_tx.clone();
        tokio::spawn(async move {
            let result = backend.start_private_stream().await;
            let _ = start_tx.send(StartOutcome { attempt, result });
        });
        debug!(attempt, "Requested private stream start");
    }

    async fn disconnect(&mut self) {
        debug!(live = self.live, connecting = self.connecting, "Stopping private stream");
        self.reconnect_timer = None;
        self.connecting = false;
        self.teardown_listeners();
        // outcome of an in-flight start no longer applies
        self.attempt += 1;

        if let Err(e) = self.backend.stop_private_stream().await {
            debug!(error = %e, "Ignoring private stream stop failure");
        }

        self.live = false;
        self.store.clear();
        self.store.set_status(ConnectionStatus::Disconnected);
        self.store.set_error(None);
    }

    fn teardown_listeners(&mut self) {
        self.feed = None;
    }

    fn on_start_outcome(&mut self, outcome: StartOutcome) {
        if outcome.attempt != self.attempt {
            debug!(attempt = outcome.attempt, current = self.attempt, "Discarding stale start outcome");
            return;
        }

        match outcome.result {
            Ok(response) if response.success => debug!("Private stream start accepted"),
            Ok(response) => {
                let message = response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| START_FAILED_MESSAGE.to_string());
                self.on_start_failure(message);
            }
            Err(e) => self.on_start_failure(e.to_string()),
        }
    }

    fn on_start_failure(&mut self, message: String) {
        self.store.set_error(Some(message.clone()));
        self.store.set_status(ConnectionStatus::Disconnected);
        self.connecting = false;
        self.log.error(format!("{}: {}", START_FAILED_MESSAGE, message));

        let delay = self.schedule_reconnect();
        debug!(delay = ?delay, "Retrying private stream start");
    }

    fn on_feed(&mut self, event: std::result::Result<FeedEvent, RecvError>) {
        match event {
            Ok(FeedEvent::Message(payload)) => self.on_message(&payload),
            Ok(FeedEvent::Status(status)) => self.on_status(&status),
            Ok(FeedEvent::Error(message)) => {
                self.log.error(format!("Private stream error: {}", message));
                self.store.set_error(Some(message));
            }
            Err(RecvError::Lagged(skipped)) => {
                // missed terminal events would leave finished orders behind
                warn!(skipped, "Private feed listener lagged, resynchronizing");
                self.log
                    .warning(format!("Missed {} private stream events", skipped));
                self.on_status(STATUS_DISCONNECTED);
                self.teardown_listeners();
            }
            Err(RecvError::Closed) => {
                warn!("Private feed closed");
                self.teardown_listeners();
            }
        }
    }

    fn on_status(&mut self, status: &str) {
        match status {
            STATUS_CONNECTED => {
                self.store.set_status(ConnectionStatus::Connected);
                self.store.set_error(None);
                self.backoff.reset();
                self.live = true;
                self.log.info("Private order stream connected");
            }
            STATUS_DISCONNECTED => {
                self.store.set_status(ConnectionStatus::Disconnected);
                self.live = false;
                self.connecting = false;
                self.store.clear();

                let delay = self.schedule_reconnect();
                self.log.info(format!(
                    "Private order stream disconnected. Reconnecting in {:?} (attempt {})",
                    delay,
                    self.backoff.attempts()
                ));
            }
            STATUS_ERROR => {
                self.store.set_status(ConnectionStatus::Disconnected);
                self.live = false;
                self.connecting = false;
            }
            other => debug!(status = %other, "Ignoring unknown private stream status"),
        }
    }

    fn on_message(&mut self, payload: &str) {
        let event = match OrderEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to parse order event");
                metrics().parse_errors.with_label_values(&[PRIVATE_STREAM]).inc();
                return;
            }
        };

        let state = event.state.to_string();
        metrics().order_events.with_label_values(&[state.as_str()]).inc();

        if event.state.is_terminal() {
            self.store.remove(&event.uuid);
        } else if event.state != OrderState::Other {
            self.store.upsert(event.to_open_order());
        }

        match event.state {
            OrderState::Wait => {}
            OrderState::Trade => {
                let price = event
                    .price
                    .or(event.avg_price)
                    .map(|p| p.normalize().to_string())
                    .unwrap_or_else(|| "market".to_string());
                self.log.info(format!(
                    "{} {} order partially filled: {} {} @ {}",
                    event.market,
                    event.side.label(),
                    event.executed_volume.normalize(),
                    base_currency(&event.market),
                    price
                ));
            }
            OrderState::Done => {
                self.log.success(format!(
                    "{} {} order filled",
                    event.market,
                    event.side.label()
                ));
            }
            OrderState::Cancel => {
                self.log.info(format!(
                    "{} {} order cancelled",
                    event.market,
                    event.side.label()
                ));
            }
            OrderState::Other => {
                debug!(uuid = %event.uuid, "Ignoring order event in untracked state");
            }
        }
    }

    fn schedule_reconnect(&mut self) -> std::time::Duration {
        let delay = self.backoff.next_delay();
        metrics().reconnects.with_label_values(&[PRIVATE_STREAM]).inc();
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        delay
    }
}

/// Next event of the registered listener; never completes when none is registered
async fn next_feed_event(
    feed: &mut Option<broadcast::Receiver<FeedEvent>>,
) -> std::result::Result<FeedEvent, RecvError> {
    match feed.as_mut() {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}
