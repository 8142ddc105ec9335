//! Supervisor library - keeps a fixed-size pool of worker processes alive
//!
//! The supervisor forks the configured worker executable until the pool
//! reaches its target size, replaces workers that die, and rotates workers
//! that report themselves over their memory budget: a replacement is
//! provisioned first, then the old worker is drained through a serialized
//! disconnect queue so serving capacity never collapses. Drained slots are
//! kept for reuse instead of being rebuilt from scratch.

pub mod config;
pub mod error;
pub mod plugin;
pub mod services;
pub mod supervisor;
pub mod traits;
pub mod worker;

// Re-export commonly used types
pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use plugin::SupervisorPlugin;
pub use services::RealProcessSpawner;
pub use supervisor::{DisconnectAction, PoolHandle, PoolSnapshot, Supervisor};
pub use traits::{ChildProcess, ProcessSpawner, SpawnedWorker};
pub use worker::{WorkerRef, WorkerState};
