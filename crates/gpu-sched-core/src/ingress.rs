//! Job submission. The durability ordering here is load-bearing: the job
//! record must exist before the stream append, and the idempotency mapping is
//! written last, so a crash between any two steps never leaves the system
//! "remembering" a submission that was never actually enqueued.

use uuid::Uuid;

use crate::error::SchedulerError;
use crate::model::{Job, JobState, SubmitOutcome, SubmitRequest};
use crate::store::Store;

pub async fn submit(
    store: &dyn Store,
    req: SubmitRequest,
    now_ms: i64,
    idempotency_ttl_s: i64,
) -> Result<SubmitOutcome, SchedulerError> {
    validate_cost(req.cost_gpu_seconds)?;

    if let Some(key) = &req.idempotency_key {
        if let Some(existing_job_id) = store
            .get_idempotent_job(&req.tenant_id, key)
            .await
            .map_err(SchedulerError::Store)?
        {
            return Ok(SubmitOutcome {
                job_id: existing_job_id,
                status: "QUEUED",
            });
        }
    }

    let job_id = Uuid::new_v4().to_string();
    let job = Job {
        tenant_id: req.tenant_id.clone(),
        job_id: job_id.clone(),
        agent_id: req.agent_id,
        state: JobState::Queued,
        prompt: req.prompt,
        cost_gpu_seconds: req.cost_gpu_seconds,
        worker_id: None,
        start_ms: None,
        created_ms: now_ms,
        updated_ms: now_ms,
        payload: None,
    };

    store.put_job_record(&job).await.map_err(SchedulerError::Store)?;
    store
        .enqueue_main(&req.tenant_id, &job_id)
        .await
        .map_err(SchedulerError::Store)?;

    if let Some(key) = &req.idempotency_key {
        store
            .put_idempotency(&req.tenant_id, key, &job_id, idempotency_ttl_s)
            .await
            .map_err(SchedulerError::Store)?;
    }

    Ok(SubmitOutcome {
        job_id,
        status: "QUEUED",
    })
}

// Full end-to-end coverage of submit() (idempotent retries, durability
// ordering) lives in gpu-sched-testing against InMemoryStore, since exercising
// it meaningfully needs a real Store rather than a hand-rolled stub.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_cost_are_both_rejected() {
        assert!(matches!(
            validate_cost(0.0),
            Err(SchedulerError::InvalidCost(_))
        ));
        assert!(matches!(
            validate_cost(-3.0),
            Err(SchedulerError::InvalidCost(_))
        ));
        assert!(validate_cost(0.01).is_ok());
    }
}

fn validate_cost(cost_gpu_seconds: f64) -> Result<(), SchedulerError> {
    if cost_gpu_seconds <= 0.0 {
        return Err(SchedulerError::InvalidCost(cost_gpu_seconds));
    }
    Ok(())
}
