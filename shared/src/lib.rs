//! Shared protocol types for the prefork worker pool
//!
//! Contains only what both the supervisor and worker processes need:
//! the wire envelope and framing codec, the correlated request protocol,
//! process-role identity, and logging utilities.

pub mod codec;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod rpc;
pub mod types;

// Re-export the types both sides touch on every message
pub use errors::{RequestError, SharedError, SharedResult};
pub use messages::{Envelope, SIGNAL_DISCONNECT, SIGNAL_OUT_OF_MEMORY};
pub use rpc::{Endpoint, HandlerTable, REQUEST_TIMEOUT};
pub use types::{ProcessRole, WorkerId};
