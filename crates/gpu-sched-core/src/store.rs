//! Policy-light storage interface. `Store` exposes exactly the primitives the
//! orchestration algorithms in [`crate::ingress`], [`crate::worker`],
//! [`crate::delayed`], and [`crate::reaper`] need; it carries no scheduling
//! policy of its own. [`BlobStore`] and [`AgentExecutor`] are the two external
//! collaborators named in the external interfaces: heavy agent-state storage
//! and the actual GPU execution, both modeled as narrow async traits so the
//! orchestration code stays backend-agnostic.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::model::{
    ClaimOutcome, DelayedMessage, FinalState, FinalizeOutcome, Job, MainMessage, RecoverOutcome,
    RenewOutcome, Reservation,
};

/// The storage contract the scheduler core depends on. A conforming
/// implementation must make every method whose name is uppercase-prefixed in
/// the design (CLAIM/RENEW/FINALIZE/RECOVER_EXPIRED_LEASE) atomic across the
/// keys it touches — callers rely on that indivisibility for every invariant
/// in the testable-properties list.
#[async_trait]
pub trait Store: Send + Sync {
    /// Ensure the consumer groups on both streams exist. Idempotent; safe to
    /// call on every process startup.
    async fn ensure_groups(&self) -> anyhow::Result<()>;

    // --- ingress primitives -------------------------------------------------

    async fn get_idempotent_job(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn put_job_record(&self, job: &Job) -> anyhow::Result<()>;

    async fn enqueue_main(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<()>;

    async fn put_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
        job_id: &str,
        ttl_s: i64,
    ) -> anyhow::Result<()>;

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<Option<Job>>;

    // --- atomic operations (the correctness spine) --------------------------

    #[allow(clippy::too_many_arguments)]
    async fn claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        cost_gpu_seconds: f64,
        now_ms: i64,
        lease_ttl_ms: i64,
    ) -> anyhow::Result<ClaimOutcome>;

    async fn renew(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        now_ms: i64,
        extend_ms: i64,
    ) -> anyhow::Result<RenewOutcome>;

    async fn finalize(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        now_ms: i64,
        final_state: FinalState,
        payload: &str,
    ) -> anyhow::Result<FinalizeOutcome>;

    async fn recover_expired_lease(
        &self,
        tenant_id: &str,
        job_id: &str,
        now_ms: i64,
        refund: f64,
    ) -> anyhow::Result<RecoverOutcome>;

    // --- agent pointer -------------------------------------------------------

    async fn get_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn put_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
        pointer: &str,
    ) -> anyhow::Result<()>;

    // --- main queue consumption ----------------------------------------------

    async fn read_main(
        &self,
        worker_id: &str,
        block_ms: i64,
    ) -> anyhow::Result<Option<MainMessage>>;

    async fn ack_main(&self, stream_id: &str) -> anyhow::Result<()>;

    async fn reclaim_pending_main(
        &self,
        consumer_id: &str,
        min_idle_ms: i64,
        count: i64,
    ) -> anyhow::Result<Vec<MainMessage>>;

    // --- delayed queue --------------------------------------------------------

    async fn enqueue_delayed(
        &self,
        tenant_id: &str,
        job_id: &str,
        run_at_ms: i64,
    ) -> anyhow::Result<()>;

    async fn read_delayed_batch(
        &self,
        consumer_id: &str,
        count: i64,
        block_ms: i64,
    ) -> anyhow::Result<Vec<DelayedMessage>>;

    async fn ack_delayed(&self, stream_id: &str) -> anyhow::Result<()>;

    // --- operator visibility ---------------------------------------------------

    async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>>;
}

/// Heavy agent state storage, external to the control plane. Empty state is
/// represented as `JsonValue::Null` for a pointer that has never been written.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn load_state(&self, pointer: &str) -> anyhow::Result<JsonValue>;
    async fn save_state(&self, state: &JsonValue) -> anyhow::Result<String>;
}

/// Executes a single agent turn. Modeled as an opaque async call; a real
/// deployment routes this to a GPU runner the control plane does not own.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        agent_id: &str,
        prompt: &str,
        state: JsonValue,
    ) -> anyhow::Result<JsonValue>;
}
