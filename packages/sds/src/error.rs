//! Structured error types for the bridge.
//!
//! Only façade operations surface errors to a caller. Inbound-path failures
//! (decode errors, registry misses, callback failures) have no caller to
//! return to; they are logged where they happen and the event is dropped.

use std::fmt;

use thiserror::Error;

/// Status reported by a failing native call: integer code plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeStatus {
    pub code: i32,
    pub message: String,
}

impl NativeStatus {
    /// Generic failure code used when a core has nothing more specific.
    pub const FAILURE: i32 = 1;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(Self::FAILURE, message)
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

impl std::error::Error for NativeStatus {}

/// Result of a call into the native core.
pub type NativeResult<T> = std::result::Result<T, NativeStatus>;

/// Errors surfaced by [`ReliabilityManager`](crate::ReliabilityManager) operations.
#[derive(Debug, Error)]
pub enum SdsError {
    /// The core could not allocate a context. The manager was never usable.
    #[error("failed to create reliability manager ({0})")]
    Construction(NativeStatus),

    /// A native call reported a non-zero status.
    #[error("native {operation} failed ({status})")]
    Native {
        operation: &'static str,
        status: NativeStatus,
    },

    /// The manager was cleaned up; its context no longer exists.
    #[error("reliability manager closed")]
    Closed,

    /// The core answered with a response this bridge cannot decode.
    #[error("malformed {operation} response from core: {source}")]
    InvalidResponse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The queued-dispatch worker thread could not be started.
    #[error("failed to start sds event worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SdsError {
    pub(crate) fn native(operation: &'static str, status: NativeStatus) -> Self {
        SdsError::Native { operation, status }
    }

    /// Native status carried by this error, if any.
    pub fn status(&self) -> Option<&NativeStatus> {
        match self {
            SdsError::Construction(status) | SdsError::Native { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Whether retrying the same call can succeed.
    ///
    /// Native delegation failures are recoverable; lifecycle violations and
    /// construction failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SdsError::Native { .. })
    }
}

/// Failures decoding an inbound event payload.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The payload is not an object carrying a string `eventType`.
    #[error("invalid event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The discriminant is known but the variant fields do not decode.
    #[error("invalid {event_type} payload: {source}")]
    InvalidPayload {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

pub type Result<T, E = SdsError> = std::result::Result<T, E>;
