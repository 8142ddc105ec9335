//! Supervisor-side plugin extension point
//!
//! Plugins are opaque to the pool: they get the live runtime handle once
//! during startup and may register request handlers, iterate workers, or
//! spawn their own tasks with a retained clone of it.

use crate::supervisor::PoolHandle;

pub trait SupervisorPlugin: Send + Sync {
    /// Called once while the supervisor starts, before workers are forked
    fn attach(&self, pool: &PoolHandle);
}
