//! Versioned encoding of dialogues.
//!
//! Memory and cache backends store dialogues as opaque bytes produced here.
//! The format is plain JSON and independent of any backend, so a record
//! read through one backend can be written to another:
//!
//! ```json
//! {"version": 1, "sender_id": "alice", "events": [{"event": "action", ...}]}
//! ```

use chronicle_types::{Dialogue, Domain, Event, Tracker};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Format version written by this build.
pub const DIALOGUE_FORMAT_VERSION: u32 = 1;

/// Borrowed view used for encoding without cloning events.
#[derive(Serialize)]
struct DialogueRecordRef<'a> {
    version: u32,
    sender_id: &'a str,
    events: &'a [Event],
}

/// Owned record used for decoding.
#[derive(Deserialize)]
struct DialogueRecord {
    version: u32,
    sender_id: String,
    #[serde(default)]
    events: Vec<Event>,
}

/// Encode a dialogue as JSON text.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if an event payload cannot be encoded.
pub fn encode_dialogue(dialogue: &Dialogue) -> Result<String, StoreError> {
    let record = DialogueRecordRef {
        version: DIALOGUE_FORMAT_VERSION,
        sender_id: &dialogue.sender_id,
        events: &dialogue.events,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Decode a dialogue previously produced by [`encode_dialogue`].
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] for malformed input and
/// [`StoreError::UnsupportedVersion`] for records from another format version.
pub fn decode_dialogue(bytes: &[u8]) -> Result<Dialogue, StoreError> {
    let record: DialogueRecord = serde_json::from_slice(bytes)?;
    if record.version != DIALOGUE_FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: record.version,
            supported: DIALOGUE_FORMAT_VERSION,
        });
    }
    Ok(Dialogue::new(record.sender_id, record.events))
}

/// Encode a tracker's dialogue projection.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if an event payload cannot be encoded.
pub fn serialize(tracker: &Tracker) -> Result<Vec<u8>, StoreError> {
    let record = DialogueRecordRef {
        version: DIALOGUE_FORMAT_VERSION,
        sender_id: tracker.sender_id(),
        events: tracker.events(),
    };
    Ok(serde_json::to_vec(&record)?)
}

/// Decode bytes into a tracker for `sender_id`.
///
/// The stored sender id is ignored in favour of the one requested, which is
/// the id the record was looked up by.
///
/// # Errors
///
/// Returns [`StoreError::MissingDomain`] when `domain` is `None`, and the
/// errors of [`decode_dialogue`] for bad input.
pub fn deserialize(
    sender_id: &str,
    bytes: &[u8],
    domain: Option<&Domain>,
    max_event_history: Option<usize>,
) -> Result<Tracker, StoreError> {
    let mut dialogue = decode_dialogue(bytes)?;
    sender_id.clone_into(&mut dialogue.sender_id);
    reconstruct(dialogue, domain, max_event_history)
}

/// Replay a dialogue into a tracker.
///
/// # Errors
///
/// Returns [`StoreError::MissingDomain`] when `domain` is `None`.
pub fn reconstruct(
    dialogue: Dialogue,
    domain: Option<&Domain>,
    max_event_history: Option<usize>,
) -> Result<Tracker, StoreError> {
    let domain = domain.ok_or_else(|| StoreError::MissingDomain {
        sender_id: dialogue.sender_id.clone(),
    })?;
    Ok(Tracker::from_dialogue(dialogue, domain, max_event_history))
}
