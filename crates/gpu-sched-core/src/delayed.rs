//! Delayed scheduler: consumes the delayed stream under its own consumer
//! group and re-injects jobs onto the main stream once their `run_at_ms` has
//! passed. Horizontally scalable by adding consumers to the same group; FIFO
//! across delayed jobs is not guaranteed, only each job's own deadline.

use tracing::debug;

use crate::store::Store;

pub struct DelayedSchedulerConfig {
    pub consumer_id: String,
    pub batch_size: i64,
    pub block_ms: i64,
}

/// Run one batch iteration. Returns the number of jobs re-injected.
pub async fn run_once(
    store: &dyn Store,
    cfg: &DelayedSchedulerConfig,
    now_ms: impl Fn() -> i64,
) -> anyhow::Result<usize> {
    let batch = store
        .read_delayed_batch(&cfg.consumer_id, cfg.batch_size, cfg.block_ms)
        .await?;

    let mut reinjected = 0;
    for msg in batch {
        if msg.run_at_ms <= now_ms() {
            store.enqueue_main(&msg.tenant_id, &msg.job_id).await?;
            store.ack_delayed(&msg.stream_id).await?;
            reinjected += 1;
        } else {
            debug!(job_id = %msg.job_id, run_at_ms = msg.run_at_ms, "not yet due, leaving pending");
        }
    }
    Ok(reinjected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips() {
        let cfg = DelayedSchedulerConfig {
            consumer_id: "delay-1".into(),
            batch_size: 10,
            block_ms: 2_000,
        };
        assert_eq!(cfg.batch_size, 10);
    }
}
