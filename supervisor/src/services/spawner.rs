//! Real process spawner backed by tokio::process

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{ChildProcess, ProcessSpawner, SpawnedWorker};
use shared::messages::env_keys;
use shared::{process_debug, ProcessRole, WorkerId};

/// Spawns real worker processes with piped stdio for the message channel
pub struct RealProcessSpawner;

impl RealProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

/// tokio child behind the ChildProcess seam
struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

#[async_trait]
impl ProcessSpawner for RealProcessSpawner {
    async fn spawn(
        &self,
        worker_id: WorkerId,
        config: &SupervisorConfig,
    ) -> SupervisorResult<SpawnedWorker> {
        let mut cmd = Command::new(&config.app[0]);
        cmd.args(&config.app[1..])
            .envs(&config.env)
            .env(env_keys::ENABLED, "1")
            .env(env_keys::WORKER_ID, worker_id.to_string())
            .env(
                env_keys::MEMORY_CHECK_INTERVAL_MS,
                config.memory_check_interval.as_millis().to_string(),
            )
            .env(
                env_keys::MAX_ALLOWED_MEMORY,
                config.max_allowed_memory.to_string(),
            )
            .env(env_keys::WORKING_DIR, &config.working_dir)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // worker logs share the supervisor's stderr; stdout is the channel
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::spawn(format!("{}: {e}", config.app[0])))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::spawn("worker stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn("worker stdout was not piped"))?;
        let pid = child.id().unwrap_or(0);

        process_debug!(
            ProcessRole::Supervisor,
            "🏭 spawned worker {} (pid {})",
            worker_id,
            pid
        );

        Ok(SpawnedWorker {
            pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Box::new(TokioChild { child }),
        })
    }
}
