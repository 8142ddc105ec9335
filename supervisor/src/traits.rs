//! Trait definitions with mockall annotations for testing
//!
//! The spawn seam is the only place the pool touches the operating system,
//! so mocking it lets every lifecycle scenario run against in-memory pipes
//! and scripted children instead of real processes.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::SupervisorConfig;
use crate::error::SupervisorResult;
use shared::WorkerId;

/// Transport and process control for one freshly spawned worker
pub struct SpawnedWorker {
    pub pid: u32,
    /// Channel half carrying supervisor -> worker frames
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Channel half carrying worker -> supervisor frames
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Exit observation and forced-kill control
    pub process: Box<dyn ChildProcess>,
}

/// Minimal control surface over a worker OS process
#[mockall::automock]
#[async_trait]
pub trait ChildProcess: Send {
    /// Wait for the process to exit, returning its status code if known
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Begin forcibly terminating the process; completion is still
    /// observed through `wait`
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// Worker process creation - the seam between pool logic and the OS
#[mockall::automock]
#[async_trait]
pub trait ProcessSpawner: Send + Sync + 'static {
    /// Spawn the configured worker executable for pool slot `worker_id`,
    /// with the channel pipes wired and the worker settings injected into
    /// its environment
    async fn spawn(
        &self,
        worker_id: WorkerId,
        config: &SupervisorConfig,
    ) -> SupervisorResult<SpawnedWorker>;
}
