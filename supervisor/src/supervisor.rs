//! Supervisor - owns the worker pool
//!
//! Pool sizing, replacement-on-exit, rotation through a serialized drain
//! queue, reusable slots, plugin activation and signal-driven shutdown.
//! All pool state lives behind one mutex and is mutated only by the event
//! loop reacting to [`PoolEvent`]s, so sequencing does the synchronization;
//! worker tasks and timers talk to the loop exclusively through the event
//! channel.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::ProcessSpawner;
use crate::worker::{WorkerHandle, WorkerRef, WorkerState};
use shared::{
    logging, process_debug, process_info, process_warn, HandlerTable, ProcessRole, WorkerId,
};

/// Extra slack past the per-worker kill timeout before the supervisor
/// stops waiting for stragglers on shutdown
const SHUTDOWN_EXIT_MARGIN: Duration = Duration::from_secs(1);

/// Pool lifecycle notifications consumed by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolEvent {
    /// A worker process is gone
    Exited(WorkerId),
    /// A worker reported it exceeded its memory budget
    RotationRequested(WorkerId),
    /// A rotated worker's hold delay elapsed; queue its drain
    DrainReady(WorkerId),
}

/// A deferred disconnect. The queue carries actions rather than records so
/// any disconnect-shaped work serializes through the same bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Gracefully drain the given worker
    Drain(WorkerId),
}

struct PoolState {
    /// Workers counting toward the capacity target
    active: Vec<WorkerHandle>,
    /// Drained slots available for re-forking
    idle: Vec<WorkerHandle>,
    disconnect_queue: VecDeque<DisconnectAction>,
    /// Worker currently draining; at most one at a time
    draining: Option<WorkerId>,
    shutting_down: bool,
}

/// Point-in-time view of the pool, for plugins and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub active: Vec<(WorkerId, WorkerState)>,
    pub idle: usize,
    pub queued_disconnects: usize,
    pub draining: Option<WorkerId>,
    pub shutting_down: bool,
}

pub struct Supervisor<S: ProcessSpawner> {
    config: Arc<SupervisorConfig>,
    spawner: Arc<S>,
    state: Arc<Mutex<PoolState>>,
    handlers: HandlerTable,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<PoolEvent>>>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
    next_worker_id: Arc<AtomicU64>,
}

impl<S: ProcessSpawner> Clone for Supervisor<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            spawner: self.spawner.clone(),
            state: self.state.clone(),
            handlers: self.handlers.clone(),
            events_tx: self.events_tx.clone(),
            events_rx: self.events_rx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            next_worker_id: self.next_worker_id.clone(),
        }
    }
}

impl<S: ProcessSpawner> Supervisor<S> {
    pub fn new(config: SupervisorConfig, spawner: S) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            config: Arc::new(config),
            spawner: Arc::new(spawner),
            state: Arc::new(Mutex::new(PoolState {
                active: Vec::new(),
                idle: Vec::new(),
                disconnect_queue: VecDeque::new(),
                draining: None,
                shutting_down: false,
            })),
            handlers: HandlerTable::new(),
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
            shutdown_tx,
            shutdown_rx: Arc::new(Mutex::new(Some(shutdown_rx))),
            next_worker_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Sender that begins shutdown when signalled, for wiring to SIGTERM
    pub fn shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Runtime API handle surfaced to plugins and the hosting application
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            state: self.state.clone(),
            handlers: self.handlers.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Validate configuration, attach plugins and fork the initial pool
    pub async fn start(&self) -> SupervisorResult<()> {
        if let Some(ProcessRole::Worker(_)) = ProcessRole::get() {
            return Err(SupervisorError::WrongRole { operation: "start" });
        }
        self.config.validate()?;

        if !self.config.enabled {
            process_info!(
                ProcessRole::Supervisor,
                "supervision disabled, pool not started"
            );
            return Ok(());
        }

        let pool = self.handle();
        for plugin in &self.config.plugins {
            plugin.attach(&pool);
        }

        let mut state = self.state.lock().await;
        self.start_workers(&mut state).await;
        logging::log_success(
            &ProcessRole::Supervisor,
            &format!("supervisor started with {} workers", state.active.len()),
        );
        Ok(())
    }

    /// Drive the pool until shutdown completes.
    ///
    /// Returns once every worker is gone after a shutdown signal, or when
    /// the shutdown deadline (`disconnect_timeout` + margin) expires with
    /// stragglers, which are then force-killed.
    pub async fn run(&self) -> SupervisorResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or(SupervisorError::AlreadyRunning)?;
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .await
            .take()
            .ok_or(SupervisorError::AlreadyRunning)?;

        let exit_deadline = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(exit_deadline);
        let mut deadline_armed = false;

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    self.on_event(event).await;
                }
                Some(()) = shutdown_rx.recv(), if !deadline_armed => {
                    self.begin_shutdown().await;
                    exit_deadline.as_mut().reset(
                        tokio::time::Instant::now()
                            + self.config.disconnect_timeout
                            + SHUTDOWN_EXIT_MARGIN,
                    );
                    deadline_armed = true;
                }
                () = exit_deadline.as_mut(), if deadline_armed => {
                    process_warn!(
                        ProcessRole::Supervisor,
                        "shutdown deadline reached with workers still alive, force-killing"
                    );
                    self.force_kill_all().await;
                    break;
                }
            }

            let state = self.state.lock().await;
            if state.shutting_down && state.active.is_empty() {
                break;
            }
        }

        logging::log_shutdown(&ProcessRole::Supervisor, "pool drained");
        Ok(())
    }

    /// Register a handler answering requests from any worker; the response
    /// goes back on the channel the request arrived on
    pub fn request_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.handlers.register(event, handler);
    }

    /// Apply `f` to every healthy worker and collect the results
    pub async fn map<R>(&self, f: impl FnMut(&WorkerRef) -> R) -> Vec<R> {
        self.handle().map(f).await
    }

    /// Apply `f` to every healthy worker
    pub async fn for_each(&self, f: impl FnMut(&WorkerRef)) {
        self.handle().for_each(f).await;
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        self.handle().snapshot().await
    }

    async fn on_event(&self, event: PoolEvent) {
        match event {
            PoolEvent::Exited(id) => self.on_worker_exit(id).await,
            PoolEvent::RotationRequested(id) => self.on_rotation_requested(id).await,
            PoolEvent::DrainReady(id) => self.on_drain_ready(id).await,
        }
    }

    async fn on_worker_exit(&self, id: WorkerId) {
        let mut state = self.state.lock().await;
        process_debug!(
            ProcessRole::Supervisor,
            "worker {} exit observed (active {}, queued {})",
            id,
            state.active.len(),
            state.disconnect_queue.len()
        );

        if let Some(position) = state.active.iter().position(|w| w.id() == id) {
            let mut handle = state.active.remove(position);
            let was_rotated = handle.rotated();
            let drained = handle.is_disconnecting();
            handle.finalize();

            // Graceful drains leave a reusable slot; crashes leave nothing
            if drained && !state.shutting_down {
                handle.reset_for_reuse();
                state.idle.push(handle);
            }

            // A rotated worker's replacement was provisioned when the
            // rotation was requested; anything else gets refilled now
            if !state.shutting_down && !was_rotated {
                self.start_workers(&mut state).await;
            }
        }

        if state.draining == Some(id) {
            state.draining = None;
            self.advance_disconnects(&mut state);
        }
    }

    async fn on_rotation_requested(&self, id: WorkerId) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        let Some(handle) = state.active.iter_mut().find(|w| w.id() == id) else {
            return;
        };
        if !handle.begin_rotation() {
            process_debug!(
                ProcessRole::Supervisor,
                "worker {} rotation already requested, ignoring",
                id
            );
            return;
        }

        process_info!(
            ProcessRole::Supervisor,
            "♻️ worker {} over memory budget, rotating",
            id
        );

        // The rotated worker no longer counts toward capacity, so this
        // forks its replacement before the drain begins; the pool runs one
        // over target until the old worker exits
        self.start_workers(&mut state).await;

        let events = self.events_tx.clone();
        let hold = self.config.disconnect_hold;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            let _ = events.send(PoolEvent::DrainReady(id));
        });
    }

    async fn on_drain_ready(&self, id: WorkerId) {
        let mut state = self.state.lock().await;
        self.plan_disconnect(&mut state, DisconnectAction::Drain(id));
    }

    /// Fork workers until the pool reaches its target, reusing idle slots.
    ///
    /// Rotated workers are already being replaced, so they no longer count
    /// toward capacity - that is what lets the pool exceed its target by
    /// the workers currently draining and land back on it once they exit.
    async fn start_workers(&self, state: &mut PoolState) {
        let capacity = |state: &PoolState| {
            state
                .active
                .iter()
                .filter(|worker| !worker.rotated())
                .count()
        };
        while capacity(state) < self.config.workers && !state.shutting_down {
            if !self.acquire_and_fork(state).await {
                break;
            }
        }
    }

    /// Fork one worker into the active pool, preferring an idle slot over
    /// building a new record
    async fn acquire_and_fork(&self, state: &mut PoolState) -> bool {
        let mut handle = match state.idle.pop() {
            Some(handle) => {
                process_debug!(
                    ProcessRole::Supervisor,
                    "reusing idle slot for worker {}",
                    handle.id()
                );
                handle
            }
            None => WorkerHandle::new(
                self.next_worker_id.fetch_add(1, Ordering::Relaxed),
                self.events_tx.clone(),
            ),
        };

        match handle
            .fork(self.spawner.as_ref(), &self.config, &self.handlers)
            .await
        {
            Ok(()) => {
                state.active.push(handle);
                true
            }
            Err(err) => {
                // Bail out of the fill loop; the next exit event retries
                logging::log_error(&ProcessRole::Supervisor, "worker fork", &err);
                false
            }
        }
    }

    fn plan_disconnect(&self, state: &mut PoolState, action: DisconnectAction) {
        if state.shutting_down {
            // Shutdown already fanned out a drain to every worker
            return;
        }
        state.disconnect_queue.push_back(action);
        process_debug!(
            ProcessRole::Supervisor,
            "drain queued ({} pending)",
            state.disconnect_queue.len()
        );
        if state.draining.is_none() {
            self.advance_disconnects(state);
        }
    }

    /// Begin the next queued disconnect, skipping actions whose target
    /// already left the pool. The queue advances again only when the
    /// draining worker's exit is observed.
    fn advance_disconnects(&self, state: &mut PoolState) {
        while let Some(action) = state.disconnect_queue.pop_front() {
            match action {
                DisconnectAction::Drain(id) => {
                    let timeout = self.config.disconnect_timeout;
                    if let Some(handle) = state.active.iter_mut().find(|w| w.id() == id) {
                        if handle.started() && !handle.is_disconnecting() {
                            handle.disconnect(timeout);
                            state.draining = Some(id);
                            return;
                        }
                    }
                }
            }
        }
        state.draining = None;
    }

    async fn begin_shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        logging::log_shutdown(&ProcessRole::Supervisor, "termination signal received");

        // Pending queued drains are subsumed by the fan-out below
        state.disconnect_queue.clear();
        state.draining = None;

        let timeout = self.config.disconnect_timeout;
        for handle in state.active.iter_mut() {
            handle.disconnect(timeout);
        }
    }

    async fn force_kill_all(&self) {
        let state = self.state.lock().await;
        for handle in state.active.iter() {
            handle.force_kill();
        }
    }
}

/// Runtime API surfaced to the hosted application and plugins.
///
/// Cheap to clone and independent of the spawner implementation, so
/// plugins can retain it and use it from their own tasks.
#[derive(Clone)]
pub struct PoolHandle {
    state: Arc<Mutex<PoolState>>,
    handlers: HandlerTable,
    shutdown_tx: mpsc::Sender<()>,
}

impl PoolHandle {
    /// Apply `f` to every healthy worker (running, live channel, not
    /// rotating) and collect the results
    pub async fn map<R>(&self, mut f: impl FnMut(&WorkerRef) -> R) -> Vec<R> {
        let state = self.state.lock().await;
        state
            .active
            .iter()
            .filter(|worker| worker.is_healthy())
            .filter_map(|worker| worker.worker_ref())
            .map(|worker_ref| f(&worker_ref))
            .collect()
    }

    /// Apply `f` to every healthy worker
    pub async fn for_each(&self, mut f: impl FnMut(&WorkerRef)) {
        self.map(|worker_ref| f(worker_ref)).await;
    }

    /// Register a handler answering requests from any worker
    pub fn request_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.handlers.register(event, handler);
    }

    /// Ask the supervisor to begin shutdown
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock().await;
        PoolSnapshot {
            active: state
                .active
                .iter()
                .map(|worker| (worker.id(), worker.state()))
                .collect(),
            idle: state.idle.len(),
            queued_disconnects: state.disconnect_queue.len(),
            draining: state.draining,
            shutting_down: state.shutting_down,
        }
    }
}
