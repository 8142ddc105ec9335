//! Reference worker binary
//!
//! Hosts a minimal application on top of the runtime: answers `ping`
//! requests and drains when the supervisor asks. It is the default app
//! target for the supervisor binary and doubles as an end-to-end fixture.

use clap::Parser;
use serde_json::json;

use shared::{logging, process_info, ProcessRole};
use worker::{Runtime, WorkerConfig, WorkerResult};

/// Reference pool worker hosting a minimal application
#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Pool worker hosting a minimal ping application")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> WorkerResult<()> {
    let args = Args::parse();

    let config = WorkerConfig::from_env()?;
    ProcessRole::init_worker(config.worker_id);
    logging::init_tracing(Some(&args.log_level));

    let Some(runtime) = Runtime::bootstrap(config).await? else {
        process_info!(
            ProcessRole::current(),
            "supervision disabled, nothing to host"
        );
        return Ok(());
    };

    runtime.request_handler("ping", |_| async move { Ok(Some(json!("pong"))) });

    logging::log_startup(ProcessRole::current(), "worker application");
    runtime.disconnected().await;
    logging::log_shutdown(ProcessRole::current(), "drain complete");
    Ok(())
}
