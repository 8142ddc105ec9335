//! Worker-side configuration, decoded from the environment
//!
//! The supervisor injects every setting as a `PREFORK_*` variable when it
//! forks the worker, so the hosted application needs no argument plumbing
//! of its own. A process started without `PREFORK_ENABLED` runs standalone.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::plugin::WorkerPlugin;
use shared::messages::env_keys;
use shared::WorkerId;

const DEFAULT_MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ALLOWED_MEMORY: u64 = 500 * 1024 * 1024;

#[derive(Clone)]
pub struct WorkerConfig {
    /// Whether this process runs under supervision at all
    pub enabled: bool,

    /// Pool slot id assigned by the supervisor
    pub worker_id: WorkerId,

    /// Interval between memory self-checks
    pub memory_check_interval: Duration,

    /// Memory budget in bytes; exceeding it requests rotation
    pub max_allowed_memory: u64,

    /// Directory to switch into before the application starts
    pub working_dir: Option<PathBuf>,

    /// Worker-side plugins, attached once during bootstrap
    pub plugins: Vec<Arc<dyn WorkerPlugin>>,
}

impl WorkerConfig {
    /// Decode the configuration from this process's environment
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_env_map(&std::env::vars().collect())
    }

    /// Decode the configuration from an explicit variable map
    pub fn from_env_map(vars: &HashMap<String, String>) -> WorkerResult<Self> {
        let enabled = vars
            .get(env_keys::ENABLED)
            .map(|value| value == "1")
            .unwrap_or(false);
        if !enabled {
            return Ok(Self::standalone());
        }

        let worker_id = vars
            .get(env_keys::WORKER_ID)
            .ok_or_else(|| WorkerError::config(format!("{} is not set", env_keys::WORKER_ID)))?
            .parse::<WorkerId>()
            .map_err(|e| WorkerError::config(format!("invalid {}: {e}", env_keys::WORKER_ID)))?;

        let memory_check_interval = match vars.get(env_keys::MEMORY_CHECK_INTERVAL_MS) {
            Some(raw) => Duration::from_millis(raw.parse::<u64>().map_err(|e| {
                WorkerError::config(format!("invalid {}: {e}", env_keys::MEMORY_CHECK_INTERVAL_MS))
            })?),
            None => DEFAULT_MEMORY_CHECK_INTERVAL,
        };

        let max_allowed_memory = match vars.get(env_keys::MAX_ALLOWED_MEMORY) {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                WorkerError::config(format!("invalid {}: {e}", env_keys::MAX_ALLOWED_MEMORY))
            })?,
            None => DEFAULT_MAX_ALLOWED_MEMORY,
        };

        let working_dir = vars.get(env_keys::WORKING_DIR).map(PathBuf::from);

        Ok(Self {
            enabled: true,
            worker_id,
            memory_check_interval,
            max_allowed_memory,
            working_dir,
            plugins: Vec::new(),
        })
    }

    /// Configuration for a process running without supervision
    pub fn standalone() -> Self {
        Self {
            enabled: false,
            worker_id: 0,
            memory_check_interval: DEFAULT_MEMORY_CHECK_INTERVAL,
            max_allowed_memory: DEFAULT_MAX_ALLOWED_MEMORY,
            working_dir: None,
            plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn WorkerPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("enabled", &self.enabled)
            .field("worker_id", &self.worker_id)
            .field("memory_check_interval", &self.memory_check_interval)
            .field("max_allowed_memory", &self.max_allowed_memory)
            .field("working_dir", &self.working_dir)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervised_env() -> HashMap<String, String> {
        HashMap::from([
            (env_keys::ENABLED.to_string(), "1".to_string()),
            (env_keys::WORKER_ID.to_string(), "3".to_string()),
            (env_keys::MEMORY_CHECK_INTERVAL_MS.to_string(), "250".to_string()),
            (env_keys::MAX_ALLOWED_MEMORY.to_string(), "1048576".to_string()),
        ])
    }

    #[test]
    fn missing_enabled_flag_means_standalone() {
        let config = WorkerConfig::from_env_map(&HashMap::new()).unwrap();
        assert!(!config.enabled);
    }

    #[test]
    fn supervised_settings_decode() {
        let config = WorkerConfig::from_env_map(&supervised_env()).unwrap();
        assert!(config.enabled);
        assert_eq!(config.worker_id, 3);
        assert_eq!(config.memory_check_interval, Duration::from_millis(250));
        assert_eq!(config.max_allowed_memory, 1024 * 1024);
    }

    #[test]
    fn working_dir_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = supervised_env();
        vars.insert(
            env_keys::WORKING_DIR.to_string(),
            dir.path().to_string_lossy().into_owned(),
        );
        let config = WorkerConfig::from_env_map(&vars).unwrap();
        assert_eq!(config.working_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn enabled_without_worker_id_fails_loudly() {
        let vars = HashMap::from([(env_keys::ENABLED.to_string(), "1".to_string())]);
        assert!(WorkerConfig::from_env_map(&vars).is_err());
    }

    #[test]
    fn garbage_numbers_fail_loudly() {
        let mut vars = supervised_env();
        vars.insert(env_keys::MAX_ALLOWED_MEMORY.to_string(), "lots".to_string());
        assert!(WorkerConfig::from_env_map(&vars).is_err());
    }
}
