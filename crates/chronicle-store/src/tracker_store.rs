//! The tracker store facade.
//!
//! [`TrackerStore`] layers the conversation lifecycle over any backend:
//! trackers are looked up by sender id, created (seeded with an
//! `action_listen` event) when absent, and saved back. On save the events
//! not yet stored are mirrored to the attached [`EventStreamer`], if any.
//!
//! Backends only ever see [`Dialogue`]s. Turning a dialogue back into a
//! [`Tracker`] needs the [`Domain`]; without one, lookups log a warning and
//! report no tracker.

use std::collections::BTreeSet;
use std::sync::Arc;

use chronicle_types::{ACTION_LISTEN_NAME, Dialogue, Domain, Event, Tracker};
use tracing::{debug, warn};

use crate::backend::StoreBackend;
use crate::config::ChronicleConfig;
use crate::error::StoreError;
use crate::resolver::StoreResolver;
use crate::serializer;
use crate::streamer::{self, EventStreamer};

/// Conversation persistence over a configured backend.
#[derive(Debug, Default)]
pub struct TrackerStore {
    backend: StoreBackend,
    domain: Option<Arc<Domain>>,
    streamer: Option<EventStreamer>,
    max_event_history: Option<usize>,
}

impl TrackerStore {
    /// A store over `backend` that rebuilds trackers with `domain`.
    pub fn new(backend: StoreBackend, domain: Option<Arc<Domain>>) -> Self {
        Self {
            backend,
            domain,
            streamer: None,
            max_event_history: None,
        }
    }

    /// Mirror newly saved events to `streamer`.
    #[must_use]
    pub fn with_streamer(mut self, streamer: EventStreamer) -> Self {
        self.streamer = Some(streamer);
        self
    }

    /// Default event retention for trackers handed out by this store.
    ///
    /// Stored dialogues are trimmed to the same bound on save.
    #[must_use]
    pub const fn with_max_event_history(mut self, max_event_history: Option<usize>) -> Self {
        self.max_event_history = max_event_history;
        self
    }

    /// Build the store described by `config`: domain, backend and stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Domain`] if the configured domain cannot be
    /// loaded, the backend's connection errors, and [`StoreError::Nats`] or
    /// [`StoreError::Config`] if the event broker cannot be set up.
    pub async fn from_config(
        config: &ChronicleConfig,
        resolver: &StoreResolver,
    ) -> Result<Self, StoreError> {
        let domain = config.load_domain()?.map(Arc::new);
        if domain.is_none() {
            warn!("no domain configured, stored trackers cannot be rebuilt");
        }

        let backend = resolver.resolve(config.tracker_store.as_ref()).await?;
        let mut store =
            Self::new(backend, domain).with_max_event_history(config.max_event_history);

        if let Some(broker) = config.event_broker.as_ref() {
            store = store.with_streamer(EventStreamer::connect(broker).await?);
        }
        Ok(store)
    }

    /// The tracker for `sender_id`, created and saved if none is stored.
    ///
    /// `max_event_history` overrides the store's default retention for this
    /// tracker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDomain`] when no domain is configured;
    /// nothing is written in that case. Backend errors propagate.
    pub async fn get_or_create(
        &self,
        sender_id: &str,
        max_event_history: Option<usize>,
    ) -> Result<Tracker, StoreError> {
        let max_event_history = max_event_history.or(self.max_event_history);
        if let Some(tracker) = self.retrieve_bounded(sender_id, max_event_history).await? {
            return Ok(tracker);
        }
        debug!(sender_id, "creating a new tracker");
        self.create_bounded(sender_id, true, max_event_history).await
    }

    /// Create a fresh tracker for `sender_id` and save it.
    ///
    /// Any record already stored under `sender_id` is replaced (or, for the
    /// relational backend, appended to).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDomain`] when no domain is configured,
    /// and backend errors from the save.
    pub async fn create_tracker(
        &self,
        sender_id: &str,
        append_action_listen: bool,
    ) -> Result<Tracker, StoreError> {
        self.create_bounded(sender_id, append_action_listen, self.max_event_history)
            .await
    }

    /// An unsaved, empty tracker for `sender_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDomain`] when no domain is configured.
    pub fn init_tracker(&self, sender_id: &str) -> Result<Tracker, StoreError> {
        let domain = self.require_domain(sender_id)?;
        Ok(Tracker::new(sender_id, domain, self.max_event_history))
    }

    /// The stored tracker for `sender_id`.
    ///
    /// `None` when nothing is stored, the record expired, or no domain is
    /// configured to rebuild it with.
    ///
    /// # Errors
    ///
    /// Backend and decoding errors propagate.
    pub async fn retrieve(&self, sender_id: &str) -> Result<Option<Tracker>, StoreError> {
        self.retrieve_bounded(sender_id, self.max_event_history).await
    }

    /// The stored dialogue for `sender_id`, without rebuilding a tracker.
    ///
    /// # Errors
    ///
    /// Backend and decoding errors propagate.
    pub async fn retrieve_dialogue(&self, sender_id: &str) -> Result<Option<Dialogue>, StoreError> {
        self.backend.retrieve(sender_id).await
    }

    /// Stream the events added since the last save, then persist.
    ///
    /// Trackers with a `max_event_history` bound have their delta taken by
    /// timestamp rather than by stored event count, since trimming shifts
    /// the count.
    ///
    /// # Errors
    ///
    /// Backend errors propagate. Streaming failures are only logged.
    pub async fn save(&self, tracker: &Tracker) -> Result<(), StoreError> {
        if let Some(streamer) = self.streamer.as_ref() {
            let previous = self.backend.retrieve(tracker.sender_id()).await?;
            let pending = streamer::pending_events(
                tracker.events(),
                previous.as_ref(),
                tracker.max_event_history().is_some(),
            );
            streamer.publish_all(tracker.sender_id(), pending).await;
        }

        self.backend.save(&tracker.as_dialogue()).await?;
        debug!(
            sender_id = tracker.sender_id(),
            events = tracker.events().len(),
            backend = self.backend.name(),
            "saved tracker"
        );
        Ok(())
    }

    /// Every stored sender id.
    ///
    /// # Errors
    ///
    /// Backend errors propagate.
    pub async fn keys(&self) -> Result<BTreeSet<String>, StoreError> {
        self.backend.keys().await
    }

    /// The backend in use.
    pub const fn backend(&self) -> &StoreBackend {
        &self.backend
    }

    /// The domain trackers are rebuilt with, if any.
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_deref()
    }

    async fn retrieve_bounded(
        &self,
        sender_id: &str,
        max_event_history: Option<usize>,
    ) -> Result<Option<Tracker>, StoreError> {
        let Some(dialogue) = self.backend.retrieve(sender_id).await? else {
            debug!(sender_id, "no stored tracker");
            return Ok(None);
        };
        let Some(domain) = self.domain.as_deref() else {
            warn!(sender_id, "can't recreate tracker from store, no domain given");
            return Ok(None);
        };
        debug!(sender_id, events = dialogue.len(), "recreating tracker");
        serializer::reconstruct(dialogue, Some(domain), max_event_history).map(Some)
    }

    async fn create_bounded(
        &self,
        sender_id: &str,
        append_action_listen: bool,
        max_event_history: Option<usize>,
    ) -> Result<Tracker, StoreError> {
        let domain = self.require_domain(sender_id)?;
        let mut tracker = Tracker::new(sender_id, domain, max_event_history);
        if append_action_listen {
            tracker.update(Event::action(ACTION_LISTEN_NAME));
        }
        self.save(&tracker).await?;
        Ok(tracker)
    }

    fn require_domain(&self, sender_id: &str) -> Result<&Domain, StoreError> {
        self.domain
            .as_deref()
            .ok_or_else(|| StoreError::MissingDomain {
                sender_id: sender_id.to_owned(),
            })
    }
}
