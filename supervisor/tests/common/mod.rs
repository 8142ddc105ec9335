//! Shared fixtures for pool lifecycle tests
//!
//! Every worker is an in-memory duplex pipe plus a scripted child process,
//! so the whole supervisor runs without forking anything. Each spawn lands
//! a [`FakeWorker`] puppet on a channel for the test to drive: it can speak
//! the wire protocol, report itself out of memory, exit with a code, or
//! play dead and ignore even the force kill.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use shared::{codec, Envelope, WorkerId, SIGNAL_OUT_OF_MEMORY};
use supervisor::{
    ChildProcess, ProcessSpawner, SpawnedWorker, Supervisor, SupervisorConfig, SupervisorResult,
};

pub const HOLD: Duration = Duration::from_millis(100);
pub const KILL_TIMEOUT: Duration = Duration::from_millis(500);

/// Supervisor-visible child whose exit the test scripts
pub struct FakeChild {
    exit_rx: mpsc::Receiver<i32>,
    exit_tx: mpsc::Sender<i32>,
    ignore_kill: bool,
}

#[async_trait]
impl ChildProcess for FakeChild {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.exit_rx.recv().await)
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        if !self.ignore_kill {
            let _ = self.exit_tx.try_send(137);
        }
        Ok(())
    }
}

/// Test-side puppet for one spawned worker process
pub struct FakeWorker {
    pub worker_id: WorkerId,
    pub pid: u32,
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    exit_tx: mpsc::Sender<i32>,
}

impl FakeWorker {
    /// Next frame the supervisor sent to this worker
    pub async fn recv(&mut self) -> Option<Envelope> {
        codec::read_frame(&mut self.reader)
            .await
            .expect("worker-side read")
    }

    /// Assert the supervisor stays silent toward this worker for `window`
    pub async fn expect_no_frame(&mut self, window: Duration) {
        tokio::select! {
            frame = codec::read_frame(&mut self.reader) => {
                panic!("unexpected frame within {window:?}: {frame:?}");
            }
            _ = tokio::time::sleep(window) => {}
        }
    }

    /// Send a frame to the supervisor as this worker
    pub async fn send(&mut self, envelope: &Envelope) {
        codec::write_frame(&mut self.writer, envelope)
            .await
            .expect("worker-side write");
    }

    /// Report this worker's memory as over budget
    pub async fn report_oom(&mut self) {
        self.send(&Envelope::signal(SIGNAL_OUT_OF_MEMORY)).await;
    }

    /// Simulate the process exiting with `code`
    pub async fn exit(self, code: i32) {
        let _ = self.exit_tx.send(code).await;
    }
}

/// ProcessSpawner handing out fake workers instead of real processes
#[derive(Clone)]
pub struct FakeSpawner {
    spawned_tx: mpsc::UnboundedSender<FakeWorker>,
    next_pid: Arc<AtomicU32>,
    zombie: Arc<AtomicBool>,
}

impl FakeSpawner {
    /// Workers spawned from now on ignore even the force kill
    pub fn make_zombies(&self) {
        self.zombie.store(true, Ordering::SeqCst);
    }
}

pub fn fake_spawner() -> (FakeSpawner, mpsc::UnboundedReceiver<FakeWorker>) {
    let (spawned_tx, spawned_rx) = mpsc::unbounded_channel();
    (
        FakeSpawner {
            spawned_tx,
            next_pid: Arc::new(AtomicU32::new(10_000)),
            zombie: Arc::new(AtomicBool::new(false)),
        },
        spawned_rx,
    )
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(
        &self,
        worker_id: WorkerId,
        _config: &SupervisorConfig,
    ) -> SupervisorResult<SpawnedWorker> {
        let (supervisor_side, worker_side) = duplex(64 * 1024);
        let (sup_read, sup_write) = split(supervisor_side);
        let (wrk_read, wrk_write) = split(worker_side);
        let (exit_tx, exit_rx) = mpsc::channel(4);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let child = FakeChild {
            exit_rx,
            exit_tx: exit_tx.clone(),
            ignore_kill: self.zombie.load(Ordering::SeqCst),
        };
        let _ = self.spawned_tx.send(FakeWorker {
            worker_id,
            pid,
            reader: wrk_read,
            writer: wrk_write,
            exit_tx,
        });

        Ok(SpawnedWorker {
            pid,
            stdin: Box::new(sup_write),
            stdout: Box::new(sup_read),
            process: Box::new(child),
        })
    }
}

/// Two workers, short timers, a working directory that exists
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig::new(vec!["fake-worker".into()])
        .with_workers(2)
        .with_disconnect_hold(HOLD)
        .with_disconnect_timeout(KILL_TIMEOUT)
        .with_working_dir(std::env::temp_dir())
}

/// Running pool plus the stream of fake workers it spawned
pub struct TestPool {
    pub supervisor: Supervisor<FakeSpawner>,
    pub spawner: FakeSpawner,
    spawned: mpsc::UnboundedReceiver<FakeWorker>,
    pub run_task: JoinHandle<SupervisorResult<()>>,
}

impl TestPool {
    pub async fn start(config: SupervisorConfig) -> TestPool {
        Self::start_inner(config, false).await
    }

    /// Pool whose workers never exit, not even when killed
    pub async fn start_with_zombies(config: SupervisorConfig) -> TestPool {
        Self::start_inner(config, true).await
    }

    async fn start_inner(config: SupervisorConfig, zombies: bool) -> TestPool {
        let (spawner, spawned) = fake_spawner();
        if zombies {
            spawner.make_zombies();
        }
        let supervisor = Supervisor::new(config, spawner.clone());
        supervisor.start().await.expect("supervisor start");
        let run_task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.run().await })
        };
        TestPool {
            supervisor,
            spawner,
            spawned,
            run_task,
        }
    }

    /// Next fake worker the supervisor spawned
    pub async fn next_worker(&mut self) -> FakeWorker {
        self.spawned.recv().await.expect("expected a spawned worker")
    }

    /// Assert no further spawn happens within `window`
    pub async fn expect_no_spawn(&mut self, window: Duration) {
        tokio::select! {
            worker = self.spawned.recv() => {
                panic!(
                    "unexpected spawn of worker {:?} within {window:?}",
                    worker.map(|w| w.worker_id)
                );
            }
            _ = tokio::time::sleep(window) => {}
        }
    }

    /// Let queued events settle under the paused clock
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
