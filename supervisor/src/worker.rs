//! Worker handle - one pool slot from the supervisor's perspective
//!
//! A handle walks `Idle -> Starting -> Running -> Rotating -> Disconnecting
//! -> Exited` and may be reset back to `Idle` for reuse. The state enum is
//! the single source of truth for what the handle may do next; `rotated`
//! is the only extra flag, guarding the once-per-record rotation request.
//!
//! Forking wires three background tasks per worker: a writer draining the
//! endpoint onto the child's stdin, a pump feeding stdout frames into the
//! endpoint dispatcher (and intercepting the out-of-memory signal), and a
//! waiter that owns the child process and reports its exit exactly once.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::supervisor::PoolEvent;
use crate::traits::{ProcessSpawner, SpawnedWorker};
use shared::{
    codec, process_debug, process_warn, Endpoint, Envelope, HandlerTable, ProcessRole,
    RequestError, WorkerId, SIGNAL_DISCONNECT, SIGNAL_OUT_OF_MEMORY,
};

/// Lifecycle of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Reusable slot with no process behind it
    Idle,
    /// Fork in progress
    Starting,
    /// Process up, channel established
    Running,
    /// Over its memory budget; replacement provisioning, drain pending
    Rotating,
    /// Drain in progress, force-kill timer armed
    Disconnecting,
    /// Process gone, resources released
    Exited,
}

/// Everything tied to a live child process, released as one unit on exit
struct ProcessLink {
    pid: u32,
    endpoint: Endpoint,
    kill: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct WorkerHandle {
    id: WorkerId,
    state: WorkerState,
    rotated: bool,
    process: Option<ProcessLink>,
    disconnect_timer: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId, events: mpsc::UnboundedSender<PoolEvent>) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            rotated: false,
            process: None,
            disconnect_timer: None,
            events,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn rotated(&self) -> bool {
        self.rotated
    }

    /// Whether a process is live behind this slot
    pub fn started(&self) -> bool {
        self.process.is_some()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state == WorkerState::Disconnecting
    }

    /// Suitable for messaging: running with a live channel, no rotation
    /// pending
    pub fn is_healthy(&self) -> bool {
        self.state == WorkerState::Running && self.process.is_some() && !self.rotated
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|link| link.pid)
    }

    /// Fork the worker process and establish its channel.
    ///
    /// Idempotent: forking an already-started handle logs and returns.
    pub(crate) async fn fork<S: ProcessSpawner>(
        &mut self,
        spawner: &S,
        config: &SupervisorConfig,
        handlers: &HandlerTable,
    ) -> SupervisorResult<()> {
        if let Some(ProcessRole::Worker(_)) = ProcessRole::get() {
            return Err(SupervisorError::WrongRole { operation: "fork" });
        }
        if self.process.is_some() {
            process_warn!(
                ProcessRole::Supervisor,
                "worker {} already started, fork ignored",
                self.id
            );
            return Ok(());
        }

        self.state = WorkerState::Starting;
        let spawned = spawner.spawn(self.id, config).await?;
        let pid = spawned.pid;
        self.wire(spawned, handlers);
        self.state = WorkerState::Running;

        process_debug!(
            ProcessRole::Supervisor,
            "worker {} running (pid {})",
            self.id,
            pid
        );
        Ok(())
    }

    fn wire(&mut self, spawned: SpawnedWorker, handlers: &HandlerTable) {
        let SpawnedWorker {
            pid,
            mut stdin,
            mut stdout,
            mut process,
        } = spawned;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::new(ProcessRole::Supervisor, out_tx, handlers.clone());
        let (kill_tx, mut kill_rx) = watch::channel(false);
        let id = self.id;

        let writer = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(err) = codec::write_frame(&mut stdin, &envelope).await {
                    process_warn!(
                        ProcessRole::Supervisor,
                        "worker {} channel write failed: {}",
                        id,
                        err
                    );
                    break;
                }
            }
        });

        let pump_endpoint = endpoint.clone();
        let pump_events = self.events.clone();
        let pump = tokio::spawn(async move {
            loop {
                match codec::read_frame(&mut stdout).await {
                    Ok(Some(envelope)) => {
                        if envelope.event == SIGNAL_OUT_OF_MEMORY {
                            let _ = pump_events.send(PoolEvent::RotationRequested(id));
                        }
                        pump_endpoint.dispatch(envelope).await;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        process_warn!(
                            ProcessRole::Supervisor,
                            "worker {} channel read failed: {}",
                            id,
                            err
                        );
                        break;
                    }
                }
            }
            pump_endpoint.fail_pending();
        });

        let wait_events = self.events.clone();
        let waiter = tokio::spawn(async move {
            let exited = {
                let mut wait = process.wait();
                tokio::select! {
                    status = &mut wait => {
                        if let Ok(Some(code)) = status {
                            process_debug!(
                                ProcessRole::Supervisor,
                                "worker {} exited with status {}",
                                id,
                                code
                            );
                        }
                        true
                    }
                    _ = kill_rx.wait_for(|killed| *killed) => false,
                }
            };
            if !exited {
                let _ = process.start_kill();
                let _ = process.wait().await;
                process_debug!(ProcessRole::Supervisor, "worker {} force-killed", id);
            }
            let _ = wait_events.send(PoolEvent::Exited(id));
        });

        self.process = Some(ProcessLink {
            pid,
            endpoint,
            kill: kill_tx,
            tasks: vec![writer, pump, waiter],
        });
    }

    /// Mark the record rotated; true only the first time
    pub(crate) fn begin_rotation(&mut self) -> bool {
        if self.rotated {
            return false;
        }
        self.rotated = true;
        if self.state == WorkerState::Running {
            self.state = WorkerState::Rotating;
        }
        true
    }

    /// Ask the child to drain and arm the force-kill timer.
    ///
    /// Idempotent: a handle already disconnecting (or without a process)
    /// is left alone. Completion always arrives as the exit event - either
    /// the child obeys, or the timer kills it.
    pub(crate) fn disconnect(&mut self, timeout: Duration) {
        if matches!(self.state, WorkerState::Disconnecting | WorkerState::Exited) {
            return;
        }
        let Some(link) = self.process.as_ref() else {
            return;
        };

        self.state = WorkerState::Disconnecting;
        process_debug!(ProcessRole::Supervisor, "worker {} disconnecting", self.id);
        link.endpoint.send(Envelope::signal(SIGNAL_DISCONNECT));

        let kill = link.kill.clone();
        self.disconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = kill.send(true);
        }));
    }

    /// Force-kill regardless of drain state
    pub(crate) fn force_kill(&self) {
        if let Some(link) = &self.process {
            let _ = link.kill.send(true);
        }
    }

    /// Release everything tied to the dead process. Call only after the
    /// exit event was observed.
    pub(crate) fn finalize(&mut self) {
        if let Some(timer) = self.disconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = self.process.take() {
            link.endpoint.fail_pending();
            for task in link.tasks {
                task.abort();
            }
        }
        self.state = WorkerState::Exited;
    }

    /// Reset a finalized handle so the slot can be forked again
    pub(crate) fn reset_for_reuse(&mut self) {
        debug_assert!(self.process.is_none());
        self.state = WorkerState::Idle;
        self.rotated = false;
        self.disconnect_timer = None;
    }

    /// Messaging view of this worker, if a process is live
    pub(crate) fn worker_ref(&self) -> Option<WorkerRef> {
        self.process.as_ref().map(|link| WorkerRef {
            id: self.id,
            pid: link.pid,
            endpoint: link.endpoint.clone(),
        })
    }
}

/// Cheap messaging view of a live worker, safe to retain across awaits.
/// Sends on a rotated-away worker degrade to logged no-ops.
#[derive(Clone)]
pub struct WorkerRef {
    id: WorkerId,
    pid: u32,
    endpoint: Endpoint,
}

impl WorkerRef {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Fire-and-forget send to this worker
    pub fn send(&self, envelope: Envelope) {
        self.endpoint.send(envelope);
    }

    /// Correlated request to this worker
    pub async fn request(
        &self,
        event: &str,
        payload: Option<Value>,
    ) -> Result<Option<Value>, RequestError> {
        self.endpoint.request(event, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::io::{duplex, split};
    use tokio::sync::Mutex;

    struct StubChild {
        exit_rx: mpsc::Receiver<i32>,
        exit_tx: mpsc::Sender<i32>,
    }

    #[async_trait]
    impl crate::traits::ChildProcess for StubChild {
        async fn wait(&mut self) -> std::io::Result<Option<i32>> {
            Ok(self.exit_rx.recv().await)
        }

        fn start_kill(&mut self) -> std::io::Result<()> {
            let _ = self.exit_tx.try_send(137);
            Ok(())
        }
    }

    /// Spawner that records how many processes it created
    struct StubSpawner {
        spawn_count: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ProcessSpawner for StubSpawner {
        async fn spawn(
            &self,
            _worker_id: WorkerId,
            _config: &SupervisorConfig,
        ) -> SupervisorResult<SpawnedWorker> {
            let mut count = self.spawn_count.lock().await;
            *count += 1;

            let (sup_side, _wrk_side) = duplex(4096);
            let (sup_read, sup_write) = split(sup_side);
            let (exit_tx, exit_rx) = mpsc::channel(4);
            Ok(SpawnedWorker {
                pid: 4000 + *count,
                stdin: Box::new(sup_write),
                stdout: Box::new(sup_read),
                process: Box::new(StubChild { exit_rx, exit_tx }),
            })
        }
    }

    fn handle() -> (WorkerHandle, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WorkerHandle::new(1, tx), rx)
    }

    #[test]
    fn new_handle_is_an_idle_slot() {
        let (handle, _rx) = handle();
        assert_eq!(handle.state(), WorkerState::Idle);
        assert!(!handle.started());
        assert!(!handle.is_healthy());
    }

    #[tokio::test]
    async fn fork_is_idempotent() {
        let spawn_count = Arc::new(Mutex::new(0));
        let spawner = StubSpawner {
            spawn_count: spawn_count.clone(),
        };
        let config = SupervisorConfig::new(vec!["worker".into()]);
        let handlers = HandlerTable::new();
        let (mut handle, _rx) = handle();

        handle.fork(&spawner, &config, &handlers).await.unwrap();
        assert_eq!(handle.state(), WorkerState::Running);
        assert!(handle.is_healthy());

        handle.fork(&spawner, &config, &handlers).await.unwrap();
        assert_eq!(*spawn_count.lock().await, 1);
    }

    #[test]
    fn rotation_is_requested_at_most_once() {
        let (mut handle, _rx) = handle();
        assert!(handle.begin_rotation());
        assert!(!handle.begin_rotation());
        assert!(handle.rotated());
    }

    #[test]
    fn rotated_handle_is_not_healthy() {
        let (mut handle, _rx) = handle();
        handle.begin_rotation();
        assert!(!handle.is_healthy());
    }

    #[test]
    fn disconnect_without_a_process_is_a_no_op() {
        let (mut handle, _rx) = handle();
        handle.disconnect(Duration::from_secs(1));
        assert_eq!(handle.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn finalize_then_reset_yields_a_clean_slot() {
        let spawner = StubSpawner {
            spawn_count: Arc::new(Mutex::new(0)),
        };
        let config = SupervisorConfig::new(vec!["worker".into()]);
        let (mut handle, _rx) = handle();
        handle
            .fork(&spawner, &config, &HandlerTable::new())
            .await
            .unwrap();
        handle.begin_rotation();

        handle.finalize();
        assert_eq!(handle.state(), WorkerState::Exited);
        assert!(!handle.started());

        handle.reset_for_reuse();
        assert_eq!(handle.state(), WorkerState::Idle);
        assert!(!handle.rotated());
    }
}
