//! Worker runtime - the in-child half of the pool
//!
//! A worker process links this crate and calls [`Runtime::bootstrap`] at
//! startup. When supervision is enabled the runtime wires the message
//! channel over stdin/stdout, starts the memory self-monitor, attaches
//! worker-side plugins and exposes the correlated request API; when it is
//! not, the application simply runs standalone.

pub mod config;
pub mod error;
pub mod memory;
pub mod plugin;
pub mod runtime;

// Re-export main types
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use memory::{MemoryMonitor, MemorySampler, SysinfoSampler};
pub use plugin::WorkerPlugin;
pub use runtime::Runtime;
