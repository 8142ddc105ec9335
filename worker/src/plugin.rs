//! Worker-side plugin extension point

use crate::runtime::Runtime;

pub trait WorkerPlugin: Send + Sync {
    /// Called once during bootstrap with the live runtime, before the
    /// application takes over
    fn attach(&self, runtime: &Runtime);
}
