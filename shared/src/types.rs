//! Process identity types used throughout the pool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Pool-wide worker slot identifier, assigned by the supervisor
pub type WorkerId = u64;

/// Global process role singleton - set once at startup
static PROCESS_ROLE: OnceLock<ProcessRole> = OnceLock::new();

/// Which side of the supervision boundary this process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessRole {
    /// The supervisor process (singleton)
    Supervisor,
    /// A worker process with its pool slot id
    Worker(WorkerId),
}

impl ProcessRole {
    /// Initialize the global role for the supervisor process
    pub fn init_supervisor() -> &'static ProcessRole {
        PROCESS_ROLE.get_or_init(|| ProcessRole::Supervisor)
    }

    /// Initialize the global role for a worker process with its slot id
    pub fn init_worker(id: WorkerId) -> &'static ProcessRole {
        PROCESS_ROLE.get_or_init(|| ProcessRole::Worker(id))
    }

    /// Get the global role (must be initialized first)
    pub fn current() -> &'static ProcessRole {
        PROCESS_ROLE
            .get()
            .expect("ProcessRole not initialized - call init_* first")
    }

    /// Get the global role if one was initialized
    pub fn get() -> Option<&'static ProcessRole> {
        PROCESS_ROLE.get()
    }

    /// Correlation id prefix for requests originated by this role.
    ///
    /// Supervisor-origin and worker-origin ids never collide on a channel,
    /// so uniqueness needs no coordination between the two ends.
    pub fn id_prefix(&self) -> String {
        match self {
            ProcessRole::Supervisor => "supervisor".to_string(),
            ProcessRole::Worker(id) => format!("worker-{id}"),
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Supervisor => write!(f, "supervisor"),
            ProcessRole::Worker(id) => write!(f, "worker_{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_prefixes_distinguish_roles() {
        assert_eq!(ProcessRole::Supervisor.id_prefix(), "supervisor");
        assert_eq!(ProcessRole::Worker(7).id_prefix(), "worker-7");
    }

    #[test]
    fn display_names() {
        assert_eq!(ProcessRole::Supervisor.to_string(), "supervisor");
        assert_eq!(ProcessRole::Worker(3).to_string(), "worker_3");
    }
}
