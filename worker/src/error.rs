//! Worker-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{operation} may only be called from a worker process")]
    WrongRole { operation: &'static str },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shared component error: {0}")]
    Shared(#[from] SharedError),
}

impl WorkerError {
    pub fn config(message: impl Into<String>) -> Self {
        WorkerError::Configuration {
            message: message.into(),
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
