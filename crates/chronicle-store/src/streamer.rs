//! Mirrors newly saved events to an external stream.
//!
//! On every save the tracker store hands the streamer the events that were
//! not part of the previously stored dialogue. Each one is published as a
//! flat JSON object: the event's own fields plus `sender_id`.
//!
//! Publishing is best effort. A failed publish is logged and skipped; the
//! save that triggered it still goes ahead.

use chronicle_types::{Dialogue, Event};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::StoreError;
use crate::relational;

/// Destination for newly saved events.
#[derive(Debug, Clone)]
pub enum EventStreamer {
    /// Publish on a NATS subject.
    Nats(NatsStreamer),
    /// Send into an in-process channel.
    Channel(mpsc::UnboundedSender<Value>),
}

impl EventStreamer {
    /// Connect the broker described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for a broker kind other than `nats`,
    /// and [`StoreError::Nats`] if the connection fails.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, StoreError> {
        if config.kind != "nats" {
            return Err(StoreError::Config(format!(
                "unsupported event broker '{}'",
                config.kind
            )));
        }
        let streamer = NatsStreamer::connect(&config.url, &config.subject).await?;
        Ok(Self::Nats(streamer))
    }

    /// An in-process streamer and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Channel(tx), rx)
    }

    /// Publish each event in order. Failures are logged, never returned.
    pub async fn publish_all(&self, sender_id: &str, events: &[Event]) {
        for event in events {
            let message = stream_message(sender_id, event);
            match self {
                Self::Nats(nats) => nats.publish(&message).await,
                Self::Channel(tx) => {
                    if tx.send(message).is_err() {
                        warn!(sender_id, "event channel closed, dropping event");
                    }
                }
            }
        }
        if !events.is_empty() {
            debug!(sender_id, count = events.len(), "streamed new events");
        }
    }
}

/// NATS publisher bound to one subject.
#[derive(Clone)]
pub struct NatsStreamer {
    client: async_nats::Client,
    subject: String,
}

impl NatsStreamer {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Nats`] if the connection cannot be established.
    pub async fn connect(url: &str, subject: &str) -> Result<Self, StoreError> {
        info!(url = url, subject = subject, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| StoreError::Nats(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self {
            client,
            subject: subject.to_owned(),
        })
    }

    /// The subject events are published on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    async fn publish(&self, message: &Value) {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "failed to serialize event");
                return;
            }
        };
        if let Err(e) = self
            .client
            .publish(self.subject.clone(), payload.into())
            .await
        {
            warn!(subject = %self.subject, error = %e, "failed to publish event");
        }
    }
}

impl std::fmt::Debug for NatsStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsStreamer")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// The stream payload for one event: its fields plus `sender_id`.
pub fn stream_message(sender_id: &str, event: &Event) -> Value {
    let mut message = event.to_value();
    if let Value::Object(map) = &mut message {
        map.insert("sender_id".to_owned(), Value::String(sender_id.to_owned()));
    }
    message
}

/// Events beyond the first `previous_count`, i.e. those not yet stored.
pub fn new_events(events: &[Event], previous_count: usize) -> &[Event] {
    events.get(previous_count..).unwrap_or_default()
}

/// The events of a tracker that `stored` does not hold yet.
///
/// An unbounded tracker only ever appends, so the stored event count is the
/// offset. A `bounded` tracker drops its oldest events, which shifts that
/// offset; its delta is everything newer than the last stored timestamp.
pub fn pending_events<'a>(
    events: &'a [Event],
    stored: Option<&Dialogue>,
    bounded: bool,
) -> &'a [Event] {
    let Some(stored) = stored else {
        return events;
    };
    if !bounded {
        return new_events(events, stored.len());
    }
    match stored.events.last() {
        Some(last) => relational::events_after(events, last.timestamp()),
        None => events,
    }
}
