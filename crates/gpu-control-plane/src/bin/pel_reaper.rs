//! PEL reaper process: reclaims main-stream entries whose consumer has gone
//! idle, repairs the orphaned job, and redelivers.

use clap::Parser;
use tracing::info;

use gpu_control_plane::now_ms;
use gpu_sched_core::reaper::{run_once, ReaperConfig};
use gpu_sched_core::SchedulerConfig;
use gpu_sched_redis::RedisStore;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "GPU_SCHED_REDIS_URL")]
    redis_url: Option<String>,
    #[arg(long)]
    consumer_id: Option<String>,
    /// Sweep interval; the reaper itself has no blocking read, so the
    /// process sleeps between XAUTOCLAIM sweeps.
    #[arg(long, default_value_t = 2_000)]
    sweep_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpu_control_plane::init_tracing();
    let args = Args::parse();
    let cfg = SchedulerConfig::from_env()?;

    let redis_url = args.redis_url.unwrap_or(cfg.redis_url.clone());
    let consumer_id = args.consumer_id.unwrap_or_else(|| "reaper-1".to_string());

    let store = RedisStore::connect(&redis_url).await?;
    store.ensure_groups().await?;

    let reaper_cfg = ReaperConfig {
        consumer_id,
        min_idle_ms: cfg.reaper_min_idle_ms,
        batch_size: cfg.reaper_batch_size,
        refund_full_cost: true,
    };

    info!("PEL reaper starting");
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(args.sweep_interval_ms));
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                match run_once(&store, &reaper_cfg, now_ms).await {
                    Ok(n) if n > 0 => info!(redelivered = n, "redelivered orphaned entries"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "reaper sweep failed"),
                }
            }
        }
    }
    Ok(())
}
