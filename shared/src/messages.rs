//! Wire envelope and reserved protocol events
//!
//! Every message between the supervisor and a worker is one [`Envelope`]:
//! correlated request/response pairs carry an `id`, fire-and-forget signals
//! do not. Payloads are schemaless JSON values owned by the application;
//! only the two reserved signal events below belong to the pool itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rotation request raised by a worker that exceeded its memory budget
pub const SIGNAL_OUT_OF_MEMORY: &str = "prefork.signal.out_of_memory";

/// Drain order sent by the supervisor to a worker
pub const SIGNAL_DISCONNECT: &str = "prefork.signal.disconnect";

/// Environment variables that carry worker settings across the spawn boundary
pub mod env_keys {
    pub const ENABLED: &str = "PREFORK_ENABLED";
    pub const WORKER_ID: &str = "PREFORK_WORKER_ID";
    pub const MEMORY_CHECK_INTERVAL_MS: &str = "PREFORK_MEMORY_CHECK_INTERVAL_MS";
    pub const MAX_ALLOWED_MEMORY: &str = "PREFORK_MAX_ALLOWED_MEMORY";
    pub const WORKING_DIR: &str = "PREFORK_WORKING_DIR";
}

/// One framed message on a worker channel
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Correlation id; present only for request/response pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Event name; reserved `prefork.signal.*` names are internal
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Remote handler failure, mutually exclusive with a payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Fire-and-forget signal without a payload
    pub fn signal(event: impl Into<String>) -> Self {
        Self {
            id: None,
            event: event.into(),
            payload: None,
            error: None,
        }
    }

    /// Fire-and-forget signal carrying a payload
    pub fn signal_with(event: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            event: event.into(),
            payload: Some(payload),
            error: None,
        }
    }

    /// Correlated request
    pub fn request(id: String, event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Some(id),
            event: event.into(),
            payload,
            error: None,
        }
    }

    /// Successful response to a correlated request
    pub fn response(id: String, event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Some(id),
            event: event.into(),
            payload,
            error: None,
        }
    }

    /// Failed response to a correlated request
    pub fn response_error(id: String, event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            event: event.into(),
            payload: None,
            error: Some(message.into()),
        }
    }

    /// True for fire-and-forget messages
    pub fn is_signal(&self) -> bool {
        self.id.is_none()
    }
}
