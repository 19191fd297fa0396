//! Common test utilities for the stream manager integration tests
//!
//! Scripted transports stand in for the exchange socket and a fake backend
//! stands in for the privileged relay. All tests run on a paused clock.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

use market_stream::error::{Result, StreamError};
use market_stream::private::{FeedEvent, PrivateStreamBackend, StartResponse};
use market_stream::store::{LogEntry, LogLevel};
use market_stream::websocket::{Connector, Inbound, Transport};

/// Order book frame from the exchange documentation
pub const ORDERBOOK_FRAME: &str = r#"{
    "type": "orderbook",
    "code": "KRW-BTC",
    "timestamp": 1704067200000,
    "orderbook_units": [
        {"ask_price": 100, "bid_price": 99, "ask_size": 1, "bid_size": 2}
    ]
}"#;

/// Same frame in the compact format
pub const COMPACT_ORDERBOOK_FRAME: &str = r#"{
    "ty": "orderbook",
    "cd": "KRW-BTC",
    "tms": 1704067200500,
    "obu": [
        {"ap": 101, "bp": 98, "as": 3, "bs": 4}
    ]
}"#;

/// Order book frame with a single level at the given ask price
pub fn orderbook_frame(ask_price: u64, timestamp: u64) -> String {
    format!(
        r#"{{"type":"orderbook","code":"KRW-BTC","timestamp":{},"orderbook_units":[{{"ask_price":{},"bid_price":{},"ask_size":1,"bid_size":1}}]}}"#,
        timestamp,
        ask_price,
        ask_price - 1
    )
}

/// Private order event in venue field names
pub fn order_event(uuid: &str, state: &str) -> String {
    format!(
        r#"{{"type":"myOrder","code":"KRW-BTC","uuid":"{}","ask_bid":"BID","order_type":"limit","state":"{}","price":50000000,"volume":0.02,"remaining_volume":0.01,"executed_volume":0.01,"order_timestamp":1704067200000}}"#,
        uuid, state
    )
}

/// Let every task run to idle; advances the paused clock by one millisecond
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Drain all activity log entries received so far
pub fn drain_log(rx: &mut broadcast::Receiver<LogEntry>) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    while let Ok(entry) = rx.try_recv() {
        entries.push(entry);
    }
    entries
}

pub fn count_level(entries: &[LogEntry], level: LogLevel) -> usize {
    entries.iter().filter(|e| e.level == level).count()
}

/// Frame pushed by the scripted server
#[derive(Debug)]
pub enum MockFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
    Error(String),
}

/// Test-side handle of one scripted connection
pub struct MockLink {
    pub endpoint: String,
    frames: mpsc::UnboundedSender<MockFrame>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    pub fn push_text(&self, text: &str) {
        let _ = self.frames.send(MockFrame::Text(text.to_string()));
    }

    pub fn push_binary(&self, data: &[u8]) {
        let _ = self.frames.send(MockFrame::Binary(data.to_vec()));
    }

    /// Close from the server side
    pub fn drop_connection(&self) {
        let _ = self.frames.send(MockFrame::Close);
    }

    pub fn fail(&self, message: &str) {
        let _ = self.frames.send(MockFrame::Error(message.to_string()));
    }

    /// Frames the client sent so far
    pub fn sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    endpoint: String,
    fail_connect: bool,
    frames: mpsc::UnboundedReceiver<MockFrame>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(StreamError::WebSocketConnection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let _ = self.sent.send(text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>> {
        match self.frames.recv().await {
            Some(MockFrame::Text(text)) => Ok(Some(Inbound::Text(text))),
            Some(MockFrame::Binary(data)) => Ok(Some(Inbound::Binary(data))),
            Some(MockFrame::Close) => Ok(None),
            Some(MockFrame::Error(message)) => Err(StreamError::WebSocketMessage(message)),
            // test dropped its handle; keep the connection idle
            None => pending().await,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Connector handing out scripted transports
pub struct MockConnector {
    links: mpsc::UnboundedSender<MockLink>,
    created: AtomicUsize,
    failures: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
        let (links, links_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            links,
            created: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        (connector, links_rx)
    }

    /// Make the next `count` connection attempts fail during the handshake
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of transports created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn transport(&self, endpoint: &str) -> Box<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let fail_connect = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.links.send(MockLink {
            endpoint: endpoint.to_string(),
            frames: frames_tx,
            sent: sent_rx,
            closed: closed.clone(),
        });

        Box::new(MockTransport {
            endpoint: endpoint.to_string(),
            fail_connect,
            frames: frames_rx,
            sent: sent_tx,
            closed,
        })
    }
}

/// Backend double driven by the test
pub struct FakeBackend {
    feed: broadcast::Sender<FeedEvent>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    responses: Mutex<VecDeque<Result<StartResponse>>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(64);
        Arc::new(Self {
            feed,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            responses: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
        })
    }

    /// Hold start requests until the returned gate is notified
    pub fn hold_starts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Queue the result of a future start request; unqueued starts succeed
    pub fn script_start(&self, response: Result<StartResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn emit(&self, event: FeedEvent) {
        let _ = self.feed.send(event);
    }

    pub fn status(&self, status: &str) {
        self.emit(FeedEvent::Status(status.to_string()));
    }

    pub fn message(&self, payload: String) {
        self.emit(FeedEvent::Message(payload));
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Registered feed listeners
    pub fn listeners(&self) -> usize {
        self.feed.receiver_count()
    }
}

#[async_trait]
impl PrivateStreamBackend for FakeBackend {
    async fn start_private_stream(&self) -> Result<StartResponse> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StartResponse::ok()))
    }

    async fn stop_private_stream(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}
