//! PEL reaper: reclaims main-stream entries whose consumer has gone idle past
//! `reaper_min_idle_ms`, repairs the orphaned job via `recover_expired_lease`,
//! then redelivers. Safe under races because CLAIM is idempotent on
//! non-queued jobs and `recover_expired_lease` is a no-op unless the job is
//! genuinely `RUNNING` with an expired lease.

use tracing::{info, warn};

use crate::model::RecoverOutcome;
use crate::store::Store;

pub struct ReaperConfig {
    pub consumer_id: String,
    pub min_idle_ms: i64,
    pub batch_size: i64,
    /// GPU-seconds refunded to the tenant when a lease is recovered. The
    /// recovery policy refunds the job's own cost, so callers look it up
    /// and pass it here.
    pub refund_full_cost: bool,
}

/// Run one reaper sweep. Returns the number of entries redelivered.
pub async fn run_once(
    store: &dyn Store,
    cfg: &ReaperConfig,
    now_ms: impl Fn() -> i64,
) -> anyhow::Result<usize> {
    let claimed = store
        .reclaim_pending_main(&cfg.consumer_id, cfg.min_idle_ms, cfg.batch_size)
        .await?;

    let mut redelivered = 0;
    for msg in claimed {
        let refund = if cfg.refund_full_cost {
            match store.get_job(&msg.tenant_id, &msg.job_id).await? {
                Some(job) => job.cost_gpu_seconds,
                None => 0.0,
            }
        } else {
            0.0
        };

        match store
            .recover_expired_lease(&msg.tenant_id, &msg.job_id, now_ms(), refund)
            .await?
        {
            RecoverOutcome::Recovered => {
                info!(job_id = %msg.job_id, refund, "recovered orphaned lease, redelivering");
            }
            RecoverOutcome::NotExpired => {
                // Owner renewed between the idle-time check and our claim; leave it alone.
                warn!(job_id = %msg.job_id, "lease renewed just before reaper claim, skipping recovery");
            }
            RecoverOutcome::NotRunning => {
                // Already finalized by its owner; redelivering is harmless, CLAIM drops it.
            }
        }

        store.enqueue_main(&msg.tenant_id, &msg.job_id).await?;
        store.ack_main(&msg.stream_id).await?;
        redelivered += 1;
    }
    Ok(redelivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_refunds_full_cost() {
        let cfg = ReaperConfig {
            consumer_id: "reaper-1".into(),
            min_idle_ms: 30_000,
            batch_size: 20,
            refund_full_cost: true,
        };
        assert!(cfg.refund_full_cost);
    }
}
