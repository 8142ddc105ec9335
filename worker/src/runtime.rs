//! In-worker runtime: channel wiring, drain handling, request API
//!
//! The runtime owns the worker's end of the message channel. It subscribes
//! to the supervisor's disconnect signal and exposes [`Runtime::disconnected`]
//! so the hosted application knows when to stop taking work; losing the
//! channel entirely (supervisor died) drains the application the same way.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::memory::{MemoryMonitor, SysinfoSampler};
use shared::{
    codec, process_info, process_warn, Endpoint, Envelope, HandlerTable, ProcessRole,
    RequestError, SIGNAL_DISCONNECT,
};

#[derive(Clone)]
pub struct Runtime {
    config: WorkerConfig,
    endpoint: Endpoint,
    disconnected: watch::Receiver<bool>,
}

impl Runtime {
    /// Bring up the runtime for a supervised worker process.
    ///
    /// Returns `None` when supervision is disabled so the application can
    /// run standalone. Must not be called from the supervisor process.
    pub async fn bootstrap(config: WorkerConfig) -> WorkerResult<Option<Runtime>> {
        if !config.enabled {
            return Ok(None);
        }
        if let Some(ProcessRole::Supervisor) = ProcessRole::get() {
            return Err(WorkerError::WrongRole {
                operation: "bootstrap",
            });
        }

        if let Some(dir) = &config.working_dir {
            std::env::set_current_dir(dir)?;
        }

        let runtime = Runtime::attach(config, tokio::io::stdin(), tokio::io::stdout());

        let monitor = MemoryMonitor::new(
            ProcessRole::Worker(runtime.config.worker_id),
            runtime.config.memory_check_interval,
            runtime.config.max_allowed_memory,
            SysinfoSampler::new(),
            runtime.endpoint.clone(),
        );
        tokio::spawn(monitor.run());

        for plugin in runtime.config.plugins.clone() {
            plugin.attach(&runtime);
        }

        Ok(Some(runtime))
    }

    /// Wire the runtime onto an arbitrary duplex transport.
    ///
    /// [`bootstrap`] uses the process stdio; tests drive in-memory pipes.
    ///
    /// [`bootstrap`]: Runtime::bootstrap
    pub fn attach<R, W>(config: WorkerConfig, reader: R, writer: W) -> Runtime
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let role = ProcessRole::Worker(config.worker_id);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::new(role, out_tx, HandlerTable::new());

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(envelope) = out_rx.recv().await {
                if let Err(err) = codec::write_frame(&mut writer, &envelope).await {
                    process_warn!(role, "channel write failed: {}", err);
                    break;
                }
            }
        });

        let (drain_tx, drain_rx) = watch::channel(false);
        let drain_tx = Arc::new(drain_tx);

        let pump_endpoint = endpoint.clone();
        let pump_drain = drain_tx.clone();
        tokio::spawn(async move {
            let mut reader = reader;
            loop {
                match codec::read_frame(&mut reader).await {
                    Ok(Some(envelope)) => pump_endpoint.dispatch(envelope).await,
                    Ok(None) => break,
                    Err(err) => {
                        process_warn!(role, "channel read failed: {}", err);
                        break;
                    }
                }
            }
            // Supervisor gone: fail requests and drain the application
            pump_endpoint.fail_pending();
            let _ = pump_drain.send(true);
        });

        let mut drain_signal = endpoint.wait_signal(SIGNAL_DISCONNECT);
        tokio::spawn(async move {
            if drain_signal.recv().await.is_some() {
                process_info!(role, "drain requested by supervisor");
                let _ = drain_tx.send(true);
            }
        });

        Runtime {
            config,
            endpoint,
            disconnected: drain_rx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn worker_id(&self) -> shared::WorkerId {
        self.config.worker_id
    }

    /// Fire-and-forget send to the supervisor
    pub fn send(&self, envelope: Envelope) {
        self.endpoint.send(envelope);
    }

    /// Correlated request to the supervisor
    pub async fn request(
        &self,
        event: &str,
        payload: Option<Value>,
    ) -> Result<Option<Value>, RequestError> {
        self.endpoint.request(event, payload).await
    }

    /// Register a handler answering requests from the supervisor
    pub fn request_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.endpoint.request_handler(event, handler);
    }

    /// Subscribe to a fire-and-forget signal event
    pub fn wait_signal(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Option<Value>> {
        self.endpoint.wait_signal(event)
    }

    /// Resolves when the supervisor orders a drain or the channel closes.
    /// The application should stop taking work and return from main.
    pub async fn disconnected(&self) {
        let mut rx = self.disconnected.clone();
        let _ = rx.wait_for(|draining| *draining).await;
    }
}
