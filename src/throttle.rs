//! Latest-wins throttle for high-frequency snapshot replacement
//!
//! At most one value is published per interval. Values arriving inside the
//! interval overwrite a single pending slot which is published by one
//! scheduled flush.

use std::time::Duration;
use tokio::time::Instant;

/// Result of offering a value to the throttle
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    /// Publish this value now
    Publish(T),
    /// Value is pending; `flush_at` is set when the caller must schedule a flush
    Deferred { flush_at: Option<Instant> },
}

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_published: Option<Instant>,
    pending: Option<T>,
    flush_scheduled: bool,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_published: None,
            pending: None,
            flush_scheduled: false,
        }
    }

    pub fn offer(&mut self, value: T, now: Instant) -> Offer<T> {
        let due = match self.last_published {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };

        if due {
            // anything pending is older than this value
            self.pending = None;
            self.last_published = Some(now);
            return Offer::Publish(value);
        }

        self.pending = Some(value);
        if self.flush_scheduled {
            return Offer::Deferred { flush_at: None };
        }

        self.flush_scheduled = true;
        let flush_at = self
            .last_published
            .map(|last| last + self.interval)
            .unwrap_or(now);
        Offer::Deferred {
            flush_at: Some(flush_at),
        }
    }

    /// Take the pending value when the scheduled flush fires
    pub fn flush(&mut self, now: Instant) -> Option<T> {
        self.flush_scheduled = false;
        let value = self.pending.take()?;
        self.last_published = Some(now);
        Some(value)
    }

    /// Drop the pending value and forget the scheduled flush
    pub fn cancel(&mut self) {
        self.pending = None;
        self.flush_scheduled = false;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
