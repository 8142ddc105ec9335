//! Shared error types for the messaging channel and request protocol

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

pub type SharedResult<T> = Result<T, SharedError>;

/// Failure modes of a correlated request, distinguishable by the caller
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("request '{event}' timed out after {timeout:?}")]
    Timeout { event: String, timeout: Duration },

    #[error("remote handler failed: {0}")]
    Remote(String),

    #[error("channel closed before a response arrived")]
    ChannelClosed,
}

impl RequestError {
    /// True when the failure was the local timeout rather than a remote report
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
    }
}
