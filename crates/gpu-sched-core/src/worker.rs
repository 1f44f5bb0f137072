//! Worker loop: block-read from the main queue's consumer group, claim,
//! execute the agent under a renewed lease, finalize, acknowledge. Ordering
//! within a single job is CLAIM before any RENEW before FINALIZE before ack —
//! the ack always follows a successful FINALIZE (or the credit-denial
//! diversion), never precedes it, so a crash between execution and ack always
//! leaves the message pending for the reaper to find.

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::model::{ClaimOutcome, FinalState};
use crate::store::{AgentExecutor, BlobStore, Store};

pub struct WorkerConfig {
    pub worker_id: String,
    pub lease_ttl_ms: i64,
    pub renew_every_ms: i64,
    pub delay_on_no_credits_ms: i64,
    pub stream_block_ms: i64,
}

/// Run one iteration of the worker loop: read at most one message, and if
/// present, drive it through claim/execute/finalize. Returns `true` if a
/// message was processed (so callers can decide whether to loop immediately
/// or let the next block-read provide the pacing).
pub async fn run_once(
    store: &dyn Store,
    blobs: &dyn BlobStore,
    executor: &dyn AgentExecutor,
    cfg: &WorkerConfig,
    now_ms: impl Fn() -> i64,
) -> anyhow::Result<bool> {
    let msg = match store.read_main(&cfg.worker_id, cfg.stream_block_ms).await? {
        Some(m) => m,
        None => return Ok(false),
    };

    let job = match store.get_job(&msg.tenant_id, &msg.job_id).await? {
        Some(j) => j,
        None => {
            store.ack_main(&msg.stream_id).await?;
            return Ok(true);
        }
    };

    let claim = store
        .claim(
            &msg.tenant_id,
            &msg.job_id,
            &cfg.worker_id,
            job.cost_gpu_seconds,
            now_ms(),
            cfg.lease_ttl_ms,
        )
        .await?;

    match claim {
        ClaimOutcome::Ok { .. } => {}
        ClaimOutcome::InsufficientCredits { .. } => {
            store
                .enqueue_delayed(
                    &msg.tenant_id,
                    &msg.job_id,
                    now_ms() + cfg.delay_on_no_credits_ms,
                )
                .await?;
            store.ack_main(&msg.stream_id).await?;
            return Ok(true);
        }
        ClaimOutcome::JobNotQueued { observed_state } => {
            warn!(job_id = %msg.job_id, ?observed_state, "dropping redelivery of a job no longer queued");
            store.ack_main(&msg.stream_id).await?;
            return Ok(true);
        }
        ClaimOutcome::JobNotFound => {
            store.ack_main(&msg.stream_id).await?;
            return Ok(true);
        }
    }

    let pointer = store.get_agent_pointer(&msg.tenant_id, &job.agent_id).await?;
    let loaded_state = match &pointer {
        Some(p) => blobs.load_state(p).await.map(Some),
        None => Ok(None),
    };

    // A blob-store read failure never silently becomes a blank state; it fails
    // the job the same way an agent-execution error does.
    let exec_result = match loaded_state {
        Ok(state) => {
            // Race execution against a renewal ticker so a long-running agent
            // turn keeps extending its lease instead of racing the reaper.
            let exec_future =
                executor.execute(&job.agent_id, &job.prompt, state.unwrap_or(JsonValue::Null));
            tokio::pin!(exec_future);
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
                cfg.renew_every_ms.max(1) as u64,
            ));
            ticker.tick().await; // first tick fires immediately; consume it

            loop {
                tokio::select! {
                    result = &mut exec_future => break result,
                    _ = ticker.tick() => {
                        let _ = store
                            .renew(
                                &msg.tenant_id,
                                &msg.job_id,
                                &cfg.worker_id,
                                now_ms(),
                                cfg.lease_ttl_ms,
                            )
                            .await;
                    }
                }
            }
        }
        Err(e) => Err(e),
    };

    match exec_result {
        Ok(new_state) => match blobs.save_state(&new_state).await {
            Ok(new_pointer) => {
                store
                    .put_agent_pointer(&msg.tenant_id, &job.agent_id, &new_pointer)
                    .await?;
                store
                    .finalize(
                        &msg.tenant_id,
                        &msg.job_id,
                        &cfg.worker_id,
                        now_ms(),
                        FinalState::Completed,
                        &new_state.to_string(),
                    )
                    .await?;
                info!(job_id = %msg.job_id, "job completed");
            }
            Err(e) => {
                store
                    .finalize(
                        &msg.tenant_id,
                        &msg.job_id,
                        &cfg.worker_id,
                        now_ms(),
                        FinalState::Failed,
                        &e.to_string(),
                    )
                    .await?;
                warn!(job_id = %msg.job_id, error = %e, "job failed to persist state");
            }
        },
        Err(e) => {
            store
                .finalize(
                    &msg.tenant_id,
                    &msg.job_id,
                    &cfg.worker_id,
                    now_ms(),
                    FinalState::Failed,
                    &e.to_string(),
                )
                .await?;
            warn!(job_id = %msg.job_id, error = %e, "job failed");
        }
    }

    store.ack_main(&msg.stream_id).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_keeps_a_safe_renewal_ratio() {
        let cfg = WorkerConfig {
            worker_id: "w1".into(),
            lease_ttl_ms: 30_000,
            renew_every_ms: 10_000,
            delay_on_no_credits_ms: 5_000,
            stream_block_ms: 2_000,
        };
        assert!(cfg.renew_every_ms * 3 <= cfg.lease_ttl_ms);
    }
}
