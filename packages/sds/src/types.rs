//! Identity types shared by the bridge, the decoder and the cores.
//!
//! These are plain data. Field names serialize in camelCase because that is
//! the shape the reliability core speaks on its event and response channels.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Opaque identifier of a message.
///
/// Immutable once created; compared by string equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One causal dependency of a message, plus the hint a caller can use to
/// fetch that dependency's content when it is not available locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub message_id: MessageId,
    #[serde(default, deserialize_with = "nullable_bytes")]
    pub retrieval_hint: Vec<u8>,
}

impl HistoryEntry {
    pub fn new(message_id: impl Into<MessageId>, retrieval_hint: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            retrieval_hint: retrieval_hint.into(),
        }
    }
}

/// Result of unwrapping an incoming message.
///
/// Every field may be absent. No `message` together with a non-empty
/// `missing_deps` means the core buffered the message until its dependencies
/// are marked as met.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwrappedMessage {
    #[serde(default)]
    pub message: Option<Vec<u8>>,
    #[serde(default)]
    pub missing_deps: Option<Vec<HistoryEntry>>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl UnwrappedMessage {
    /// Dependencies not yet met, empty when none were reported.
    pub fn missing_deps(&self) -> &[HistoryEntry] {
        self.missing_deps.as_deref().unwrap_or_default()
    }

    /// True when the core is holding the message back for missing dependencies.
    pub fn is_buffered(&self) -> bool {
        self.message.is_none() && !self.missing_deps().is_empty()
    }
}

// The core emits `null` for an entry that never had a hint attached.
fn nullable_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<u8>>::deserialize(deserializer)?.unwrap_or_default())
}
