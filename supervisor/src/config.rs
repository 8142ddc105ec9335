//! Pool configuration, immutable once the supervisor starts

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SupervisorError, SupervisorResult};
use crate::plugin::SupervisorPlugin;

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ALLOWED_MEMORY: u64 = 500 * 1024 * 1024;
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_DISCONNECT_HOLD: Duration = Duration::from_secs(1);

/// Everything the supervisor needs to run one pool
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Target number of live workers
    pub workers: usize,

    /// Environment entries injected into every worker process
    pub env: HashMap<String, String>,

    /// Interval between a worker's memory self-checks
    pub memory_check_interval: Duration,

    /// Memory budget per worker in bytes; exceeding it triggers rotation
    pub max_allowed_memory: u64,

    /// Max wait for a draining worker before it is force-killed
    pub disconnect_timeout: Duration,

    /// Grace period between provisioning a rotation replacement and
    /// queuing the old worker's drain
    pub disconnect_hold: Duration,

    /// Working directory for the supervisor and its workers
    pub working_dir: PathBuf,

    /// argv of the worker executable hosting the application
    pub app: Vec<String>,

    /// Supervisor-side plugins, attached once during startup
    pub plugins: Vec<Arc<dyn SupervisorPlugin>>,

    /// false = the application runs standalone and no pool is managed
    pub enabled: bool,
}

impl SupervisorConfig {
    pub fn new(app: Vec<String>) -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            env: HashMap::new(),
            memory_check_interval: DEFAULT_MEMORY_CHECK_INTERVAL,
            max_allowed_memory: DEFAULT_MAX_ALLOWED_MEMORY,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            disconnect_hold: DEFAULT_DISCONNECT_HOLD,
            working_dir: PathBuf::from("."),
            app,
            plugins: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_memory_check_interval(mut self, interval: Duration) -> Self {
        self.memory_check_interval = interval;
        self
    }

    pub fn with_max_allowed_memory(mut self, bytes: u64) -> Self {
        self.max_allowed_memory = bytes;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn with_disconnect_hold(mut self, hold: Duration) -> Self {
        self.disconnect_hold = hold;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn SupervisorPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Reject configurations the pool cannot start from. This is the one
    /// error class that stops the supervisor instead of being absorbed.
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.app.is_empty() {
            return Err(SupervisorError::config("worker command must not be empty"));
        }
        if self.workers == 0 {
            return Err(SupervisorError::config("worker count must be at least 1"));
        }
        if !self.working_dir.is_dir() {
            return Err(SupervisorError::config(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("workers", &self.workers)
            .field("env", &self.env)
            .field("memory_check_interval", &self.memory_check_interval)
            .field("max_allowed_memory", &self.max_allowed_memory)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("disconnect_hold", &self.disconnect_hold)
            .field("working_dir", &self.working_dir)
            .field("app", &self.app)
            .field("plugins", &self.plugins.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_conservative_deployment() {
        let config = SupervisorConfig::new(vec!["worker".into()]);
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_allowed_memory, 500 * 1024 * 1024);
        assert_eq!(config.memory_check_interval, Duration::from_secs(5));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(20));
        assert!(config.enabled);
    }

    #[test]
    fn empty_app_command_is_rejected() {
        let config = SupervisorConfig::new(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = SupervisorConfig::new(vec!["worker".into()]).with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_working_dir_is_rejected() {
        let config =
            SupervisorConfig::new(vec!["worker".into()]).with_working_dir("/no/such/directory");
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::new(vec!["worker".into()])
            .with_workers(4)
            .with_env_var("APP_MODE", "pool")
            .with_working_dir(dir.path());
        assert!(config.validate().is_ok());
        assert_eq!(config.env.get("APP_MODE").map(String::as_str), Some("pool"));
    }
}
