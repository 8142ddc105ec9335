//! Supervisor-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn worker process: {message}")]
    SpawnFailed { message: String },

    #[error("{operation} may only be called from the supervisor process")]
    WrongRole { operation: &'static str },

    #[error("supervisor event loop is already running")]
    AlreadyRunning,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shared component error: {0}")]
    Shared(#[from] SharedError),
}

impl SupervisorError {
    pub fn spawn(message: impl Into<String>) -> Self {
        SupervisorError::SpawnFailed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SupervisorError::Configuration {
            message: message.into(),
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
