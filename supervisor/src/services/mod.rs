//! Service implementations
//!
//! Production implementations of the traits the pool is built against.

pub mod spawner;

pub use spawner::RealProcessSpawner;
