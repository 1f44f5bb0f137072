//! Worker process: repeatedly claims, executes, and finalizes jobs from the
//! main queue.

use clap::Parser;
use tracing::info;

use gpu_control_plane::blob::LocalBlobStore;
use gpu_control_plane::executor::SimulatedAgentExecutor;
use gpu_control_plane::now_ms;
use gpu_sched_core::worker::{run_once, WorkerConfig};
use gpu_sched_core::SchedulerConfig;
use gpu_sched_redis::RedisStore;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "GPU_SCHED_REDIS_URL")]
    redis_url: Option<String>,
    #[arg(long)]
    worker_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpu_control_plane::init_tracing();
    let args = Args::parse();
    let cfg = SchedulerConfig::from_env()?;

    let redis_url = args.redis_url.unwrap_or(cfg.redis_url.clone());
    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let store = RedisStore::connect(&redis_url).await?;
    store.ensure_groups().await?;
    let blobs = LocalBlobStore::new();
    let executor = SimulatedAgentExecutor::default();

    let worker_cfg = WorkerConfig {
        worker_id: worker_id.clone(),
        lease_ttl_ms: cfg.lease_ttl_ms,
        renew_every_ms: cfg.renew_every_ms,
        delay_on_no_credits_ms: cfg.delay_on_no_credits_ms,
        stream_block_ms: cfg.stream_block_ms,
    };

    info!(%worker_id, "worker starting");
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            result = run_once(&store, &blobs, &executor, &worker_cfg, now_ms) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "worker iteration failed, retrying");
                }
            }
        }
    }
    Ok(())
}
