//! Supervisor binary entry point

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;

use shared::{logging, ProcessRole};
use supervisor::{RealProcessSpawner, Supervisor, SupervisorConfig, SupervisorError, SupervisorResult};

/// Keeps a fixed-size pool of worker processes alive behind one logical
/// service and rotates workers that exceed their memory budget
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Self-healing, memory-bounded worker process pool")]
struct Args {
    /// Number of workers to keep alive
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Memory budget per worker in MiB before rotation
    #[arg(long, default_value = "500")]
    max_memory_mib: u64,

    /// Interval between worker memory self-checks, in milliseconds
    #[arg(long, default_value = "5000")]
    memory_check_interval_ms: u64,

    /// Max wait for a draining worker before it is force-killed, in milliseconds
    #[arg(long, default_value = "20000")]
    disconnect_timeout_ms: u64,

    /// Grace period before a replaced worker's drain is queued, in milliseconds
    #[arg(long, default_value = "1000")]
    disconnect_hold_ms: u64,

    /// Working directory for the supervisor and its workers
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// KEY=VALUE environment entries injected into every worker
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Run the application unsupervised instead of behind the pool
    #[arg(long)]
    standalone: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Worker command and its arguments
    #[arg(required = true, trailing_var_arg = true)]
    app: Vec<String>,
}

fn parse_env_pairs(pairs: &[String]) -> SupervisorResult<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| SupervisorError::config(format!("invalid env entry '{pair}', expected KEY=VALUE")))?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

#[tokio::main]
async fn main() -> SupervisorResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    ProcessRole::init_supervisor();
    logging::init_tracing(Some(&args.log_level));

    let working_dir = match args.cwd.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let config = SupervisorConfig::new(args.app.clone())
        .with_workers(args.workers)
        .with_env(parse_env_pairs(&args.env)?)
        .with_memory_check_interval(Duration::from_millis(args.memory_check_interval_ms))
        .with_max_allowed_memory(args.max_memory_mib * 1024 * 1024)
        .with_disconnect_timeout(Duration::from_millis(args.disconnect_timeout_ms))
        .with_disconnect_hold(Duration::from_millis(args.disconnect_hold_ms))
        .with_working_dir(working_dir)
        .with_enabled(!args.standalone);

    if !config.enabled {
        // Standalone mode: hand the terminal to the app and mirror its exit
        logging::log_startup(&ProcessRole::Supervisor, "application without supervision");
        let status = tokio::process::Command::new(&args.app[0])
            .args(&args.app[1..])
            .current_dir(&config.working_dir)
            .status()
            .await?;
        std::process::exit(status.code().unwrap_or(0));
    }

    std::env::set_current_dir(&config.working_dir)?;

    let supervisor = Supervisor::new(config, RealProcessSpawner::new());
    supervisor.start().await?;
    logging::log_startup(
        &ProcessRole::Supervisor,
        &format!("worker pool ({} workers)", args.workers),
    );

    // SIGTERM and Ctrl-C both begin the drain; the run loop guarantees
    // process exit within disconnect_timeout plus a small margin
    let shutdown = supervisor.shutdown_sender();
    tokio::spawn(async move {
        wait_for_termination().await;
        let _ = shutdown.send(()).await;
    });

    supervisor.run().await?;
    logging::log_success(&ProcessRole::Supervisor, "supervisor stopped gracefully");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = signal::ctrl_c().await;
}
