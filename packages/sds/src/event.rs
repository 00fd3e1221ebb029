//! Decoder for the tagged JSON events a core emits.
//!
//! Decoding is two-phase: first only the `eventType` discriminant is read,
//! then the payload is re-decoded with the schema that discriminant selects.
//!
//! | eventType              | fields                                   |
//! |------------------------|------------------------------------------|
//! | `message_ready`        | `messageId`, `channelId`                 |
//! | `message_sent`         | `messageId`, `channelId`                 |
//! | `missing_dependencies` | `messageId`, `missingDeps`, `channelId`  |
//! | `periodic_sync`        | none                                     |
//!
//! Unknown discriminants decode to `Ok(None)` so newer cores can emit event
//! types this bridge does not understand yet.

use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::error::EventDecodeError;
use crate::types::{HistoryEntry, MessageId};

pub const MESSAGE_READY: &str = "message_ready";
pub const MESSAGE_SENT: &str = "message_sent";
pub const MISSING_DEPENDENCIES: &str = "missing_dependencies";
pub const PERIODIC_SYNC: &str = "periodic_sync";

/// One decoded core event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdsEvent {
    /// A message's dependencies are met and it can be delivered.
    MessageReady {
        message_id: MessageId,
        channel_id: String,
    },
    /// An outgoing message was acknowledged by a peer.
    MessageSent {
        message_id: MessageId,
        channel_id: String,
    },
    /// A received message is waiting on the listed dependencies.
    MissingDependencies {
        message_id: MessageId,
        missing_deps: Vec<HistoryEntry>,
        channel_id: String,
    },
    /// The core ran a periodic maintenance sweep.
    PeriodicSync,
}

impl SdsEvent {
    /// Wire discriminant for this variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            SdsEvent::MessageReady { .. } => MESSAGE_READY,
            SdsEvent::MessageSent { .. } => MESSAGE_SENT,
            SdsEvent::MissingDependencies { .. } => MISSING_DEPENDENCIES,
            SdsEvent::PeriodicSync => PERIODIC_SYNC,
        }
    }

    /// Encode in the wire shape [`decode_event`] accepts.
    pub fn to_json(&self) -> String {
        let value = match self {
            SdsEvent::MessageReady {
                message_id,
                channel_id,
            }
            | SdsEvent::MessageSent {
                message_id,
                channel_id,
            } => json!({
                "eventType": self.event_type(),
                "messageId": message_id,
                "channelId": channel_id,
            }),
            SdsEvent::MissingDependencies {
                message_id,
                missing_deps,
                channel_id,
            } => json!({
                "eventType": MISSING_DEPENDENCIES,
                "messageId": message_id,
                "missingDeps": missing_deps,
                "channelId": channel_id,
            }),
            SdsEvent::PeriodicSync => json!({ "eventType": PERIODIC_SYNC }),
        };
        value.to_string()
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "eventType")]
    event_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    message_id: MessageId,
    channel_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MissingDepsPayload {
    message_id: MessageId,
    #[serde(deserialize_with = "null_as_empty")]
    missing_deps: Vec<HistoryEntry>,
    channel_id: String,
}

// Required, but a core with nothing to report may send `null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<HistoryEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<HistoryEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode one event payload.
///
/// Returns `Ok(None)` for an unrecognized discriminant.
pub fn decode_event(payload: &str) -> Result<Option<SdsEvent>, EventDecodeError> {
    let envelope: Envelope =
        serde_json::from_str(payload).map_err(EventDecodeError::InvalidEnvelope)?;

    let event = match envelope.event_type.as_str() {
        MESSAGE_READY => {
            let p = decode_payload::<MessagePayload>(MESSAGE_READY, payload)?;
            SdsEvent::MessageReady {
                message_id: p.message_id,
                channel_id: p.channel_id,
            }
        }
        MESSAGE_SENT => {
            let p = decode_payload::<MessagePayload>(MESSAGE_SENT, payload)?;
            SdsEvent::MessageSent {
                message_id: p.message_id,
                channel_id: p.channel_id,
            }
        }
        MISSING_DEPENDENCIES => {
            let p = decode_payload::<MissingDepsPayload>(MISSING_DEPENDENCIES, payload)?;
            SdsEvent::MissingDependencies {
                message_id: p.message_id,
                missing_deps: p.missing_deps,
                channel_id: p.channel_id,
            }
        }
        PERIODIC_SYNC => SdsEvent::PeriodicSync,
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn decode_payload<T>(event_type: &'static str, payload: &str) -> Result<T, EventDecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(payload)
        .map_err(|source| EventDecodeError::InvalidPayload { event_type, source })
}
