//! Memory self-monitoring inside the worker process
//!
//! Self-reporting by design: the worker samples its own resident set on a
//! fixed interval because the supervisor cannot cheaply inspect a child's
//! heap from outside. Crossing the budget sends the out-of-memory signal
//! exactly once and stops the monitor - rotation supersedes monitoring.

use std::time::Duration;

use sysinfo::{Pid, System};

use shared::{process_debug, process_warn, Endpoint, Envelope, ProcessRole, SIGNAL_OUT_OF_MEMORY};

/// Source of this process's resident set size
#[cfg_attr(test, mockall::automock)]
pub trait MemorySampler: Send + 'static {
    /// Current RSS in bytes, if the platform can report it
    fn rss_bytes(&mut self) -> Option<u64>;
}

/// Sampler backed by sysinfo, reading this process's own entry
pub struct SysinfoSampler {
    system: System,
    pid: Pid,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn rss_bytes(&mut self) -> Option<u64> {
        self.system.refresh_process(self.pid);
        self.system.process(self.pid).map(|process| process.memory())
    }
}

/// Periodic self-check against the configured memory budget
pub struct MemoryMonitor<M: MemorySampler> {
    role: ProcessRole,
    interval: Duration,
    max_allowed: u64,
    sampler: M,
    endpoint: Endpoint,
}

impl<M: MemorySampler> MemoryMonitor<M> {
    pub fn new(
        role: ProcessRole,
        interval: Duration,
        max_allowed: u64,
        sampler: M,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            role,
            interval,
            max_allowed,
            sampler,
            endpoint,
        }
    }

    /// Run until the budget is exceeded, then signal and stop
    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(self.interval).await;

            let Some(rss) = self.sampler.rss_bytes() else {
                continue;
            };
            if rss > self.max_allowed {
                process_warn!(
                    self.role,
                    "memory budget exceeded: {} / {} bytes, requesting rotation",
                    rss,
                    self.max_allowed
                );
                self.endpoint.send(Envelope::signal(SIGNAL_OUT_OF_MEMORY));
                break;
            }

            process_debug!(self.role, "memory check: {} / {} bytes", rss, self.max_allowed);
        }
    }
}
