//! Conversation events.
//!
//! An [`Event`] is one immutable, timestamped occurrence in a conversation:
//! a user message, a bot utterance, an executed action, a slot update, and so
//! on. On the wire an event is a flat JSON object:
//!
//! ```json
//! {"event": "action", "timestamp": 1718000000.123456, "name": "action_listen"}
//! ```
//!
//! The `event` tag and `timestamp` are fixed; every other key belongs to the
//! type-specific payload and is preserved verbatim, including keys this crate
//! does not interpret.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Name of the action that puts the bot into a listening state.
///
/// Every freshly created tracker starts with this action executed.
pub const ACTION_LISTEN_NAME: &str = "action_listen";

/// Last timestamp handed out by [`next_timestamp`], in microseconds.
static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Value reported for a slot update that carries no `value` field.
static NULL_VALUE: Value = Value::Null;

/// Microseconds per second, used to convert the clock into float seconds.
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Returns the current time as float seconds since the Unix epoch.
///
/// Values are strictly increasing within a process, even when the wall clock
/// stalls or steps backwards, so events created back-to-back never share a
/// timestamp.
pub fn next_timestamp() -> f64 {
    let now = Utc::now().timestamp_micros();
    let advance = |last: i64| now.max(last.saturating_add(1));
    let previous = LAST_TIMESTAMP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(advance(last)))
        .unwrap_or_else(|last| last);

    #[allow(clippy::cast_precision_loss)]
    let micros = advance(previous) as f64;
    micros / MICROS_PER_SECOND
}

/// Event types with replay semantics.
///
/// Tags not listed here are carried as [`EventKind::Other`] and stored
/// untouched; they simply do not affect derived tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The user sent a message (`user`).
    User,
    /// The bot uttered a message (`bot`).
    Bot,
    /// An action was executed (`action`).
    Action,
    /// A slot was set (`slot`).
    SlotSet,
    /// The conversation was restarted (`restart`).
    Restarted,
    /// All slots were reset to their initial values (`reset_slots`).
    AllSlotsReset,
    /// The most recent user message was reverted (`rewind`).
    UserUtteranceReverted,
    /// The most recent action was reverted (`undo`).
    ActionReverted,
    /// The conversation was paused (`pause`).
    Paused,
    /// The conversation was resumed (`resume`).
    Resumed,
    /// Any other tag.
    Other,
}

impl EventKind {
    /// Map a wire tag to its kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user" => Self::User,
            "bot" => Self::Bot,
            "action" => Self::Action,
            "slot" => Self::SlotSet,
            "restart" => Self::Restarted,
            "reset_slots" => Self::AllSlotsReset,
            "rewind" => Self::UserUtteranceReverted,
            "undo" => Self::ActionReverted,
            "pause" => Self::Paused,
            "resume" => Self::Resumed,
            _ => Self::Other,
        }
    }

    /// The wire tag for this kind, or `None` for [`EventKind::Other`].
    pub const fn tag(self) -> Option<&'static str> {
        match self {
            Self::User => Some("user"),
            Self::Bot => Some("bot"),
            Self::Action => Some("action"),
            Self::SlotSet => Some("slot"),
            Self::Restarted => Some("restart"),
            Self::AllSlotsReset => Some("reset_slots"),
            Self::UserUtteranceReverted => Some("rewind"),
            Self::ActionReverted => Some("undo"),
            Self::Paused => Some("pause"),
            Self::Resumed => Some("resume"),
            Self::Other => None,
        }
    }
}

/// One immutable, timestamped occurrence in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Type tag (`user`, `action`, `slot`, ...).
    #[serde(rename = "event")]
    type_name: String,
    /// Seconds since the Unix epoch.
    timestamp: f64,
    /// Type-specific fields plus any extra data.
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Event {
    /// Create an event stamped with [`next_timestamp`].
    pub fn new(type_name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self::with_timestamp(type_name, next_timestamp(), payload)
    }

    /// Create an event with an explicit timestamp.
    ///
    /// Payload keys named `event` or `timestamp` are dropped since they
    /// would shadow the fixed fields on the wire.
    pub fn with_timestamp(
        type_name: impl Into<String>,
        timestamp: f64,
        mut payload: Map<String, Value>,
    ) -> Self {
        payload.remove("event");
        payload.remove("timestamp");
        Self {
            type_name: type_name.into(),
            timestamp,
            payload,
        }
    }

    /// A user message, optionally classified with an intent.
    pub fn user(text: &str, intent: Option<&str>, confidence: f64) -> Self {
        let intent = intent.map_or(Value::Null, |name| {
            json!({ "name": name, "confidence": confidence })
        });
        Self::new(
            "user",
            object(json!({
                "text": text,
                "parse_data": { "text": text, "intent": intent, "entities": [] },
            })),
        )
    }

    /// A bot utterance.
    pub fn bot(text: &str) -> Self {
        Self::new("bot", object(json!({ "text": text })))
    }

    /// An executed action.
    pub fn action(name: &str) -> Self {
        Self::new("action", object(json!({ "name": name })))
    }

    /// A slot update.
    pub fn slot(name: &str, value: Value) -> Self {
        Self::new("slot", object(json!({ "name": name, "value": value })))
    }

    /// A conversation restart.
    pub fn restarted() -> Self {
        Self::new("restart", Map::new())
    }

    /// A reset of every slot to its initial value.
    pub fn all_slots_reset() -> Self {
        Self::new("reset_slots", Map::new())
    }

    /// Reverts everything back to and including the last user message.
    pub fn user_utterance_reverted() -> Self {
        Self::new("rewind", Map::new())
    }

    /// Reverts everything back to and including the last action.
    pub fn action_reverted() -> Self {
        Self::new("undo", Map::new())
    }

    /// Pauses the conversation.
    pub fn paused() -> Self {
        Self::new("pause", Map::new())
    }

    /// Resumes a paused conversation.
    pub fn resumed() -> Self {
        Self::new("resume", Map::new())
    }

    /// The wire type tag.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The replay kind derived from the type tag.
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.type_name)
    }

    /// Seconds since the Unix epoch.
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Type-specific fields and extra data.
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// A single payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Intent name of a user message (`parse_data.intent.name`).
    pub fn intent_name(&self) -> Option<&str> {
        self.payload
            .get("parse_data")?
            .get("intent")?
            .get("name")?
            .as_str()
    }

    /// Action name, for `action` events only.
    pub fn action_name(&self) -> Option<&str> {
        match self.kind() {
            EventKind::Action => self.payload.get("name")?.as_str(),
            _ => None,
        }
    }

    /// Slot name and value, for `slot` events only.
    pub fn slot_update(&self) -> Option<(&str, &Value)> {
        match self.kind() {
            EventKind::SlotSet => {
                let name = self.payload.get("name")?.as_str()?;
                Some((name, self.payload.get("value").unwrap_or(&NULL_VALUE)))
            }
            _ => None,
        }
    }

    /// Message text, for `user` and `bot` events.
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text")?.as_str()
    }

    /// The event as a JSON object with the tag and timestamp merged in.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.payload.len().saturating_add(2));
        map.insert("event".to_owned(), Value::String(self.type_name.clone()));
        map.insert("timestamp".to_owned(), json!(self.timestamp));
        map.extend(self.payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(map)
    }
}

/// Unwrap a `json!` object literal into its map.
fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
