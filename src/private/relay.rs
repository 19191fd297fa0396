//! Backend relay over loopback HTTP and WebSocket
//!
//! Start and stop are plain POST requests. The relay's event socket carries
//! `{"channel": "message" | "status" | "error", "data": "<string>"}` envelopes
//! which are forwarded onto the broadcast feed. Start requests wait for the
//! event socket, since status changes sent before it is open are lost.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::backend::{FeedEvent, PrivateStreamBackend, StartResponse, STATUS_DISCONNECTED};
use crate::error::Result;
use crate::websocket::{Transport, WebSocketClient};

const FEED_CAPACITY: usize = 1024;
const EVENT_SOCKET_RETRY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_SOCKET_WAIT: Duration = Duration::from_secs(5);

pub const EVENT_SOCKET_DOWN_MESSAGE: &str = "Relay event socket is not connected";

#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    data: String,
}

impl Envelope {
    fn into_event(self) -> Option<FeedEvent> {
        match self.channel.as_str() {
            "message" => Some(FeedEvent::Message(self.data)),
            "status" => Some(FeedEvent::Status(self.data)),
            "error" => Some(FeedEvent::Error(self.data)),
            _ => None,
        }
    }
}

pub struct RelayBackend {
    http: reqwest::Client,
    base_url: String,
    feed: broadcast::Sender<FeedEvent>,
    /// Whether the event socket is open
    ready: watch::Receiver<bool>,
    pump: JoinHandle<()>,
}

impl RelayBackend {
    /// Create the backend and start following the relay's event socket
    pub fn spawn(base_url: &str, events_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (ready_tx, ready) = watch::channel(false);
        let pump = tokio::spawn(follow_event_socket(
            events_url.to_string(),
            feed.clone(),
            ready_tx,
        ));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            feed,
            ready,
            pump,
        })
    }

    pub fn is_event_socket_open(&self) -> bool {
        *self.ready.borrow()
    }

    async fn wait_for_event_socket(&self) -> bool {
        let mut ready = self.ready.clone();
        let opened = timeout(EVENT_SOCKET_WAIT, ready.wait_for(|open| *open)).await;
        matches!(opened, Ok(Ok(_)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/private-stream/{}", self.base_url, path)
    }
}

impl Drop for RelayBackend {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl PrivateStreamBackend for RelayBackend {
    async fn start_private_stream(&self) -> Result<StartResponse> {
        if !self.wait_for_event_socket().await {
            return Ok(StartResponse::failed(EVENT_SOCKET_DOWN_MESSAGE));
        }

        let url = self.url("start");
        debug!(url = %url, "Requesting private stream start");

        let response = self.http.post(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(StartResponse::failed(format!("Relay responded with {}", status)));
        }
        Ok(response.json::<StartResponse>().await?)
    }

    async fn stop_private_stream(&self) -> Result<()> {
        let url = self.url("stop");
        debug!(url = %url, "Requesting private stream stop");

        self.http.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}

/// Forward relay envelopes onto the feed, reopening the socket when it drops
async fn follow_event_socket(
    url: String,
    feed: broadcast::Sender<FeedEvent>,
    ready: watch::Sender<bool>,
) {
    loop {
        let mut client = WebSocketClient::new(&url);

        match client.connect().await {
            Ok(()) => {
                info!(url = %url, "Following relay event socket");
                ready.send_replace(true);
                loop {
                    match client.recv().await {
                        Ok(Some(message)) => {
                            match serde_json::from_slice::<Envelope>(message.as_bytes()) {
                                Ok(envelope) => match envelope.into_event() {
                                    Some(event) => {
                                        let _ = feed.send(event);
                                    }
                                    None => debug!("Ignoring relay envelope on unknown channel"),
                                },
                                Err(e) => warn!(error = %e, "Malformed relay envelope"),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Relay event socket failed");
                            break;
                        }
                    }
                }
                ready.send_replace(false);
                // the stream state is unknown without the relay
                let _ = feed.send(FeedEvent::Status(STATUS_DISCONNECTED.to_string()));
            }
            Err(e) => debug!(error = %e, "Relay event socket unavailable"),
        }

        sleep(EVENT_SOCKET_RETRY).await;
    }
}
