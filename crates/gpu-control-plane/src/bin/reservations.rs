//! Operator CLI over the reservations index: lists every live lease and flags
//! ones whose expiry has already passed (a sweep the reaper hasn't reached
//! yet). Read-only; this is visibility tooling, not part of the ingress
//! surface.

use clap::Parser;

use gpu_control_plane::now_ms;
use gpu_sched_core::store::Store;
use gpu_sched_core::SchedulerConfig;
use gpu_sched_redis::RedisStore;

#[derive(Parser)]
struct Args {
    #[arg(long, env = "GPU_SCHED_REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gpu_control_plane::init_tracing();
    let args = Args::parse();
    let cfg = SchedulerConfig::from_env()?;
    let redis_url = args.redis_url.unwrap_or(cfg.redis_url.clone());

    let store = RedisStore::connect(&redis_url).await?;
    let mut reservations = store.list_reservations().await?;
    reservations.sort_by_key(|r| r.expiry_ms);

    let now = now_ms();
    println!("{:<40} {:>15} {:>10}", "job_id", "expiry_ms", "status");
    for r in &reservations {
        let status = if r.expiry_ms < now { "STALE" } else { "live" };
        println!("{:<40} {:>15} {:>10}", r.job_id, r.expiry_ms, status);
    }
    println!("{} reservation(s), {} stale", reservations.len(), reservations.iter().filter(|r| r.expiry_ms < now).count());

    Ok(())
}
