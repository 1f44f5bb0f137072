//! Delayed scheduler process: re-injects deferred jobs onto the main queue
//! once their `run_at_ms` has passed.

use clap::Parser;
use tracing::info;

use gpu_control_plane::now_ms;
use gpu_sched_core::delayed::{run_once, DelayedSchedulerConfig};
use gpu_sched_core::SchedulerConfig;
use gpu_sched_redis::RedisStore;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "GPU_SCHED_REDIS_URL")]
    redis_url: Option<String>,
    #[arg(long)]
    consumer_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpu_control_plane::init_tracing();
    let args = Args::parse();
    let cfg = SchedulerConfig::from_env()?;

    let redis_url = args.redis_url.unwrap_or(cfg.redis_url.clone());
    let consumer_id = args.consumer_id.unwrap_or_else(|| "delay-1".to_string());

    let store = RedisStore::connect(&redis_url).await?;
    store.ensure_groups().await?;

    let sched_cfg = DelayedSchedulerConfig {
        consumer_id,
        batch_size: cfg.delayed_batch_size,
        block_ms: cfg.stream_block_ms,
    };

    info!("delayed scheduler starting");
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = run_once(&store, &sched_cfg, now_ms) => {
                match result {
                    Ok(n) if n > 0 => info!(reinjected = n, "re-injected due jobs"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "delayed scheduler iteration failed"),
                }
            }
        }
    }
    Ok(())
}
