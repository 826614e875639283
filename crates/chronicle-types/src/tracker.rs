//! Conversation trackers and their serializable projection.
//!
//! A [`Tracker`] is the live state of one conversation: the ordered event
//! log plus state derived by replaying it against a [`Domain`]. A
//! [`Dialogue`] is the part that is persisted: the conversation id and the
//! events. Derived state is never stored; it is rebuilt on retrieval.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::Domain;
use crate::event::{Event, EventKind};

/// The persisted snapshot of a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    /// Conversation id.
    pub sender_id: String,
    /// Ordered event log.
    pub events: Vec<Event>,
}

impl Dialogue {
    /// Create a dialogue from its parts.
    pub fn new(sender_id: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            sender_id: sender_id.into(),
            events,
        }
    }

    /// Number of events.
    pub const fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the dialogue holds no events.
    pub const fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Live state of a single conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracker {
    sender_id: String,
    events: Vec<Event>,
    max_event_history: Option<usize>,
    initial_slots: BTreeMap<String, Value>,
    slots: BTreeMap<String, Value>,
    latest_message: Option<Event>,
    latest_action_name: Option<String>,
    paused: bool,
}

impl Tracker {
    /// Create an empty tracker whose slots are initialised from `domain`.
    ///
    /// When `max_event_history` is set only the most recent events are
    /// retained.
    pub fn new(sender_id: impl Into<String>, domain: &Domain, max_event_history: Option<usize>) -> Self {
        let initial_slots = domain.initial_slot_values();
        Self {
            sender_id: sender_id.into(),
            events: Vec::new(),
            max_event_history,
            slots: initial_slots.clone(),
            initial_slots,
            latest_message: None,
            latest_action_name: None,
            paused: false,
        }
    }

    /// Rebuild a tracker by replaying a stored dialogue.
    pub fn from_dialogue(dialogue: Dialogue, domain: &Domain, max_event_history: Option<usize>) -> Self {
        let mut tracker = Self::new(dialogue.sender_id, domain, max_event_history);
        tracker.events = dialogue.events;
        tracker.enforce_history_bound();
        tracker.replay();
        tracker
    }

    /// Append an event and apply it to the derived state.
    pub fn update(&mut self, event: Event) {
        let kind = event.kind();
        self.events.push(event);
        self.enforce_history_bound();
        match kind {
            EventKind::UserUtteranceReverted | EventKind::ActionReverted => self.replay(),
            _ => {
                if let Some(event) = self.events.last().cloned() {
                    self.apply(&event);
                }
            }
        }
    }

    /// Conversation id.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// The retained event log, oldest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Upper bound on retained events, if any.
    pub const fn max_event_history(&self) -> Option<usize> {
        self.max_event_history
    }

    /// Change the retention bound, dropping the oldest events if needed.
    pub fn set_max_event_history(&mut self, max_event_history: Option<usize>) {
        self.max_event_history = max_event_history;
        if self.enforce_history_bound() {
            self.replay();
        }
    }

    /// Current value of every declared slot.
    pub const fn slots(&self) -> &BTreeMap<String, Value> {
        &self.slots
    }

    /// Current value of one slot; `None` when the slot is not declared.
    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    /// Most recent user message still in effect.
    pub const fn latest_message(&self) -> Option<&Event> {
        self.latest_message.as_ref()
    }

    /// Intent of the most recent user message.
    pub fn latest_intent_name(&self) -> Option<&str> {
        self.latest_message.as_ref().and_then(Event::intent_name)
    }

    /// Name of the most recent action still in effect.
    pub fn latest_action_name(&self) -> Option<&str> {
        self.latest_action_name.as_deref()
    }

    /// Whether the conversation is paused.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Events that are still in effect after restarts and reverts.
    ///
    /// A `restart` discards everything before it. A `rewind` discards the
    /// most recent user message and everything after it; an `undo` does the
    /// same for the most recent action.
    pub fn applied_events(&self) -> Vec<&Event> {
        let mut applied: Vec<&Event> = Vec::with_capacity(self.events.len());
        for event in &self.events {
            match event.kind() {
                EventKind::Restarted => applied.clear(),
                EventKind::UserUtteranceReverted => revert_to_last(&mut applied, EventKind::User),
                EventKind::ActionReverted => revert_to_last(&mut applied, EventKind::Action),
                _ => applied.push(event),
            }
        }
        applied
    }

    /// Clone the persisted projection.
    pub fn as_dialogue(&self) -> Dialogue {
        Dialogue::new(self.sender_id.clone(), self.events.clone())
    }

    /// Consume the tracker into its persisted projection.
    pub fn into_dialogue(self) -> Dialogue {
        Dialogue::new(self.sender_id, self.events)
    }

    /// JSON view of the derived state and the full event log.
    pub fn current_state(&self) -> Value {
        let latest_message = self.latest_message.as_ref().map_or_else(
            || json!({}),
            |message| {
                json!({
                    "text": message.text(),
                    "intent": message.get("parse_data").and_then(|p| p.get("intent")),
                })
            },
        );
        let events: Vec<Value> = self.events.iter().map(Event::to_value).collect();
        json!({
            "sender_id": self.sender_id,
            "slots": self.slots,
            "latest_message": latest_message,
            "latest_event_time": self.events.last().map(Event::timestamp),
            "latest_action_name": self.latest_action_name,
            "paused": self.paused,
            "events": events,
        })
    }

    /// Recompute derived state from the applied events.
    fn replay(&mut self) {
        self.reset();
        let applied: Vec<Event> = self.applied_events().into_iter().cloned().collect();
        for event in &applied {
            self.apply(event);
        }
    }

    /// Fold a single event into the derived state.
    fn apply(&mut self, event: &Event) {
        match event.kind() {
            EventKind::User => self.latest_message = Some(event.clone()),
            EventKind::Action => {
                self.latest_action_name = event.action_name().map(str::to_owned);
            }
            EventKind::SlotSet => {
                if let Some((name, value)) = event.slot_update() {
                    if let Some(slot) = self.slots.get_mut(name) {
                        *slot = value.clone();
                    } else {
                        tracing::debug!(
                            sender_id = %self.sender_id,
                            slot = name,
                            "ignoring update of undeclared slot"
                        );
                    }
                }
            }
            EventKind::Restarted => self.reset(),
            EventKind::AllSlotsReset => self.slots.clone_from(&self.initial_slots),
            EventKind::Paused => self.paused = true,
            EventKind::Resumed => self.paused = false,
            EventKind::Bot
            | EventKind::UserUtteranceReverted
            | EventKind::ActionReverted
            | EventKind::Other => {}
        }
    }

    /// Return derived state to its initial values.
    fn reset(&mut self) {
        self.slots.clone_from(&self.initial_slots);
        self.latest_message = None;
        self.latest_action_name = None;
        self.paused = false;
    }

    /// Drop the oldest events beyond the retention bound.
    ///
    /// Returns `true` if any event was dropped.
    fn enforce_history_bound(&mut self) -> bool {
        let Some(max) = self.max_event_history else {
            return false;
        };
        let excess = self.events.len().saturating_sub(max);
        if excess == 0 {
            return false;
        }
        self.events.drain(..excess);
        true
    }
}

/// Pop applied events back to and including the last one of `kind`.
///
/// Nothing is removed when no such event exists.
fn revert_to_last(applied: &mut Vec<&Event>, kind: EventKind) {
    if let Some(position) = applied.iter().rposition(|e| e.kind() == kind) {
        applied.truncate(position);
    }
}
