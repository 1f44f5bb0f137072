//! A deterministic, single-mutex, in-process [`Store`] for fast unit tests of
//! the correctness spine without a live Redis. Every operation takes the same
//! lock, so it carries exactly the atomicity contract the Lua scripts give the
//! real backend — nothing here races against itself the way a naive
//! read-then-write implementation would.
//!
//! Two simplifications relative to `gpu-sched-redis`, both harmless for tests:
//! reads never actually block (an empty queue returns `None` immediately
//! regardless of the requested block time), and idempotency keys never
//! expire (ttl is accepted but not enforced).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use gpu_sched_core::model::{
    ClaimOutcome, DelayedMessage, FinalState, FinalizeOutcome, Job, JobState, MainMessage,
    Quota, RecoverOutcome, RenewOutcome, Reservation,
};
use gpu_sched_core::store::Store;

#[derive(Clone)]
struct MainEntry {
    tenant_id: String,
    job_id: String,
}

#[derive(Clone)]
struct DelayedEntry {
    tenant_id: String,
    job_id: String,
    run_at_ms: i64,
}

#[derive(Default)]
struct State {
    jobs: HashMap<(String, String), Job>,
    quotas: HashMap<String, Quota>,
    idem: HashMap<(String, String), String>,
    agent_pointers: HashMap<(String, String), String>,
    reservations: HashMap<String, i64>,
    main_queue: VecDeque<MainEntry>,
    main_pending: HashMap<String, (MainEntry, Instant)>,
    delayed_queue: VecDeque<DelayedEntry>,
    delayed_pending: HashMap<String, (DelayedEntry, Instant)>,
    next_id: u64,
}

impl State {
    fn fresh_stream_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-0", self.next_id)
    }
}

/// An in-process `Store` for tests. Construct with [`InMemoryStore::new`], seed
/// tenant quotas with [`InMemoryStore::set_quota`], then exercise it through
/// `gpu_sched_core::ingress`/`worker`/`delayed`/`reaper` exactly like a real
/// backend.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quota(&self, tenant_id: impl Into<String>, quota: Quota) {
        self.state.lock().await.quotas.insert(tenant_id.into(), quota);
    }

    pub async fn get_quota(&self, tenant_id: &str) -> Option<Quota> {
        self.state.lock().await.quotas.get(tenant_id).copied()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ensure_groups(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_idempotent_job(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> anyhow::Result<Option<String>> {
        let st = self.state.lock().await;
        Ok(st.idem.get(&(tenant_id.to_string(), idempotency_key.to_string())).cloned())
    }

    async fn put_job_record(&self, job: &Job) -> anyhow::Result<()> {
        let mut st = self.state.lock().await;
        st.jobs.insert((job.tenant_id.clone(), job.job_id.clone()), job.clone());
        Ok(())
    }

    async fn enqueue_main(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<()> {
        let mut st = self.state.lock().await;
        st.main_queue.push_back(MainEntry {
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    async fn put_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
        job_id: &str,
        _ttl_s: i64,
    ) -> anyhow::Result<()> {
        let mut st = self.state.lock().await;
        st.idem.insert(
            (tenant_id.to_string(), idempotency_key.to_string()),
            job_id.to_string(),
        );
        Ok(())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<Option<Job>> {
        let st = self.state.lock().await;
        Ok(st.jobs.get(&(tenant_id.to_string(), job_id.to_string())).cloned())
    }

    async fn claim(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        cost_gpu_seconds: f64,
        now_ms: i64,
        lease_ttl_ms: i64,
    ) -> anyhow::Result<ClaimOutcome> {
        let mut st = self.state.lock().await;
        let key = (tenant_id.to_string(), job_id.to_string());

        let Some(job) = st.jobs.get(&key).cloned() else {
            return Ok(ClaimOutcome::JobNotFound);
        };
        if job.state != JobState::Queued {
            return Ok(ClaimOutcome::JobNotQueued {
                observed_state: job.state,
            });
        }

        let quota = st.quotas.entry(tenant_id.to_string()).or_insert(Quota {
            credits: 0.0,
            rate_per_sec: 0.0,
            burst: 0.0,
            last_ms: now_ms,
        });
        let refilled = quota.refilled(now_ms);

        if refilled.credits < cost_gpu_seconds {
            *quota = refilled;
            return Ok(ClaimOutcome::InsufficientCredits {
                credits_remaining: refilled.credits,
            });
        }

        let debited = Quota {
            credits: refilled.credits - cost_gpu_seconds,
            last_ms: now_ms,
            ..refilled
        };
        *quota = debited;

        let mut job = job;
        job.state = JobState::Running;
        job.worker_id = Some(worker_id.to_string());
        job.start_ms = Some(now_ms);
        job.updated_ms = now_ms;
        let expiry = now_ms + lease_ttl_ms;
        st.jobs.insert(key, job);
        st.reservations.insert(job_id.to_string(), expiry);

        Ok(ClaimOutcome::Ok {
            credits_remaining: debited.credits,
            lease_expires_ms: expiry,
        })
    }

    async fn renew(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        now_ms: i64,
        extend_ms: i64,
    ) -> anyhow::Result<RenewOutcome> {
        let mut st = self.state.lock().await;
        let key = (tenant_id.to_string(), job_id.to_string());
        let Some(job) = st.jobs.get_mut(&key) else {
            return Ok(RenewOutcome::NotRunning);
        };
        if job.state != JobState::Running {
            return Ok(RenewOutcome::NotRunning);
        }
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(RenewOutcome::NotOwner);
        }
        job.updated_ms = now_ms;
        st.reservations.insert(job_id.to_string(), now_ms + extend_ms);
        Ok(RenewOutcome::Ok)
    }

    async fn finalize(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        now_ms: i64,
        final_state: FinalState,
        payload: &str,
    ) -> anyhow::Result<FinalizeOutcome> {
        let mut st = self.state.lock().await;
        let key = (tenant_id.to_string(), job_id.to_string());
        let Some(job) = st.jobs.get_mut(&key) else {
            return Ok(FinalizeOutcome::NotRunning);
        };
        if job.state != JobState::Running {
            return Ok(FinalizeOutcome::NotRunning);
        }
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(FinalizeOutcome::NotOwner);
        }
        job.state = final_state.as_job_state();
        job.updated_ms = now_ms;
        job.payload = Some(payload.to_string());
        st.reservations.remove(job_id);
        Ok(FinalizeOutcome::Ok)
    }

    async fn recover_expired_lease(
        &self,
        tenant_id: &str,
        job_id: &str,
        now_ms: i64,
        refund: f64,
    ) -> anyhow::Result<RecoverOutcome> {
        let mut st = self.state.lock().await;
        let key = (tenant_id.to_string(), job_id.to_string());
        let Some(job) = st.jobs.get(&key).cloned() else {
            return Ok(RecoverOutcome::NotRunning);
        };
        if job.state != JobState::Running {
            return Ok(RecoverOutcome::NotRunning);
        }
        if let Some(expiry) = st.reservations.get(job_id) {
            if *expiry >= now_ms {
                return Ok(RecoverOutcome::NotExpired);
            }
        }

        if refund > 0.0 {
            if let Some(quota) = st.quotas.get_mut(tenant_id) {
                quota.credits = (quota.credits + refund).min(quota.burst);
                quota.last_ms = now_ms;
            }
        }

        let mut job = job;
        job.state = JobState::Queued;
        job.worker_id = None;
        job.start_ms = None;
        job.updated_ms = now_ms;
        st.jobs.insert(key, job);
        st.reservations.remove(job_id);
        Ok(RecoverOutcome::Recovered)
    }

    async fn get_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let st = self.state.lock().await;
        Ok(st.agent_pointers.get(&(tenant_id.to_string(), agent_id.to_string())).cloned())
    }

    async fn put_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
        pointer: &str,
    ) -> anyhow::Result<()> {
        let mut st = self.state.lock().await;
        st.agent_pointers.insert(
            (tenant_id.to_string(), agent_id.to_string()),
            pointer.to_string(),
        );
        Ok(())
    }

    async fn read_main(
        &self,
        _worker_id: &str,
        _block_ms: i64,
    ) -> anyhow::Result<Option<MainMessage>> {
        let mut st = self.state.lock().await;
        let Some(entry) = st.main_queue.pop_front() else {
            return Ok(None);
        };
        let stream_id = st.fresh_stream_id();
        let msg = MainMessage {
            stream_id: stream_id.clone(),
            tenant_id: entry.tenant_id.clone(),
            job_id: entry.job_id.clone(),
        };
        st.main_pending.insert(stream_id, (entry, Instant::now()));
        Ok(Some(msg))
    }

    async fn ack_main(&self, stream_id: &str) -> anyhow::Result<()> {
        self.state.lock().await.main_pending.remove(stream_id);
        Ok(())
    }

    async fn reclaim_pending_main(
        &self,
        _consumer_id: &str,
        min_idle_ms: i64,
        count: i64,
    ) -> anyhow::Result<Vec<MainMessage>> {
        let mut st = self.state.lock().await;
        let threshold = Duration::from_millis(min_idle_ms.max(0) as u64);
        let now = Instant::now();
        let stale: Vec<String> = st
            .main_pending
            .iter()
            .filter(|(_, (_, delivered_at))| now.duration_since(*delivered_at) >= threshold)
            .map(|(id, _)| id.clone())
            .take(count.max(0) as usize)
            .collect();

        let mut out = Vec::new();
        for id in stale {
            if let Some((entry, _)) = st.main_pending.remove(&id) {
                out.push(MainMessage {
                    stream_id: id,
                    tenant_id: entry.tenant_id,
                    job_id: entry.job_id,
                });
            }
        }
        Ok(out)
    }

    async fn enqueue_delayed(
        &self,
        tenant_id: &str,
        job_id: &str,
        run_at_ms: i64,
    ) -> anyhow::Result<()> {
        let mut st = self.state.lock().await;
        st.delayed_queue.push_back(DelayedEntry {
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            run_at_ms,
        });
        Ok(())
    }

    async fn read_delayed_batch(
        &self,
        _consumer_id: &str,
        count: i64,
        _block_ms: i64,
    ) -> anyhow::Result<Vec<DelayedMessage>> {
        let mut st = self.state.lock().await;
        let mut out = Vec::new();
        for _ in 0..count.max(0) {
            let Some(entry) = st.delayed_queue.pop_front() else {
                break;
            };
            let stream_id = st.fresh_stream_id();
            out.push(DelayedMessage {
                stream_id: stream_id.clone(),
                tenant_id: entry.tenant_id.clone(),
                job_id: entry.job_id.clone(),
                run_at_ms: entry.run_at_ms,
            });
            st.delayed_pending.insert(stream_id, (entry, Instant::now()));
        }
        Ok(out)
    }

    async fn ack_delayed(&self, stream_id: &str) -> anyhow::Result<()> {
        self.state.lock().await.delayed_pending.remove(stream_id);
        Ok(())
    }

    async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>> {
        let st = self.state.lock().await;
        Ok(st
            .reservations
            .iter()
            .map(|(job_id, expiry_ms)| Reservation {
                job_id: job_id.clone(),
                expiry_ms: *expiry_ms,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_sched_core::ingress::submit;
    use gpu_sched_core::model::SubmitRequest;

    fn quota(credits: f64, rate: f64, burst: f64, last_ms: i64) -> Quota {
        Quota {
            credits,
            rate_per_sec: rate,
            burst,
            last_ms,
        }
    }

    async fn submit_job(
        store: &InMemoryStore,
        tenant: &str,
        cost: f64,
        idem: Option<&str>,
        now_ms: i64,
    ) -> String {
        let outcome = submit(
            store,
            SubmitRequest {
                tenant_id: tenant.into(),
                agent_id: "agent-1".into(),
                prompt: "hello".into(),
                cost_gpu_seconds: cost,
                idempotency_key: idem.map(String::from),
            },
            now_ms,
            86_400,
        )
        .await
        .unwrap();
        outcome.job_id
    }

    // --- S1: happy path ------------------------------------------------------

    #[tokio::test]
    async fn s1_happy_path_debits_credits_and_clears_the_lease_on_finalize() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 1.0, 10.0, 0)).await;

        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;

        let claim = store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();
        assert!(matches!(claim, ClaimOutcome::Ok { credits_remaining, .. } if credits_remaining == 5.0));
        assert_eq!(store.list_reservations().await.unwrap().len(), 1);

        let outcome = store
            .finalize("acme", &job_id, "w1", 1_000, FinalState::Completed, "done")
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Ok);
        assert!(store.list_reservations().await.unwrap().is_empty());

        let job = store.get_job("acme", &job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    // --- S2: idempotent retry --------------------------------------------------

    #[tokio::test]
    async fn s2_duplicate_submission_with_same_idempotency_key_returns_the_same_job() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 1.0, 10.0, 0)).await;

        let first = submit_job(&store, "acme", 5.0, Some("abc"), 0).await;
        let second = submit_job(&store, "acme", 5.0, Some("abc"), 100).await;

        assert_eq!(first, second);
        assert_eq!(store.job_count().await, 1);
    }

    // --- S3: insufficient credits ----------------------------------------------

    #[tokio::test]
    async fn s3_claim_denies_when_credits_are_short_but_still_persists_the_refill() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(2.0, 1.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;

        let claim = store.claim("acme", &job_id, "w1", 5.0, 1_000, 30_000).await.unwrap();
        assert!(matches!(claim, ClaimOutcome::InsufficientCredits { .. }));

        let job = store.get_job("acme", &job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);

        // last_ms advanced even though the claim was denied.
        let quota_after = store.get_quota("acme").await.unwrap();
        assert_eq!(quota_after.last_ms, 1_000);
        assert_eq!(quota_after.credits, 3.0); // 2.0 + 1.0/s * 1s
    }

    // --- S4: worker crash / reaper recovery -------------------------------------

    #[tokio::test]
    async fn s4_expired_lease_is_recovered_back_to_queued_and_refunds_the_cost() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;

        store.claim("acme", &job_id, "dead-worker", 5.0, 0, 30_000).await.unwrap();
        assert_eq!(store.get_quota("acme").await.unwrap().credits, 5.0);

        // Lease expired at t=30_000; reaper runs at t=60_000.
        let recovered = store
            .recover_expired_lease("acme", &job_id, 60_000, 5.0)
            .await
            .unwrap();
        assert_eq!(recovered, RecoverOutcome::Recovered);

        let job = store.get_job("acme", &job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.worker_id.is_none());
        assert_eq!(store.get_quota("acme").await.unwrap().credits, 10.0);

        // A fresh worker can now claim it.
        let claim = store.claim("acme", &job_id, "w2", 5.0, 60_100, 30_000).await.unwrap();
        assert!(matches!(claim, ClaimOutcome::Ok { .. }));
    }

    #[tokio::test]
    async fn recover_expired_lease_is_a_no_op_while_the_lease_is_still_live() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();

        let outcome = store.recover_expired_lease("acme", &job_id, 10_000, 5.0).await.unwrap();
        assert_eq!(outcome, RecoverOutcome::NotExpired);
    }

    // --- S5: double finalize race ------------------------------------------------

    #[tokio::test]
    async fn s5_only_one_finalize_wins_the_other_sees_not_running() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();

        let first = store
            .finalize("acme", &job_id, "w1", 500, FinalState::Completed, "ok")
            .await
            .unwrap();
        let second = store
            .finalize("acme", &job_id, "w1", 600, FinalState::Failed, "too late")
            .await
            .unwrap();

        assert_eq!(first, FinalizeOutcome::Ok);
        assert_eq!(second, FinalizeOutcome::NotRunning);

        let job = store.get_job("acme", &job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn finalize_by_a_non_owner_is_rejected() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();

        let outcome = store
            .finalize("acme", &job_id, "impostor", 500, FinalState::Completed, "ok")
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::NotOwner);
    }

    // --- general claim guards -----------------------------------------------------

    #[tokio::test]
    async fn claim_on_an_already_running_job_is_rejected() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();

        let second = store.claim("acme", &job_id, "w2", 5.0, 10, 30_000).await.unwrap();
        assert!(matches!(
            second,
            ClaimOutcome::JobNotQueued {
                observed_state: JobState::Running
            }
        ));
    }

    #[tokio::test]
    async fn claim_on_an_unknown_job_reports_not_found() {
        let store = InMemoryStore::new();
        let outcome = store.claim("acme", "ghost", "w1", 1.0, 0, 30_000).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::JobNotFound);
    }

    // --- renew ----------------------------------------------------------------------

    #[tokio::test]
    async fn renew_extends_the_reservation_without_touching_credits() {
        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.claim("acme", &job_id, "w1", 5.0, 0, 30_000).await.unwrap();
        let credits_before = store.get_quota("acme").await.unwrap().credits;

        let outcome = store.renew("acme", &job_id, "w1", 25_000, 30_000).await.unwrap();
        assert_eq!(outcome, RenewOutcome::Ok);

        let reservations = store.list_reservations().await.unwrap();
        assert_eq!(reservations[0].expiry_ms, 55_000);
        assert_eq!(store.get_quota("acme").await.unwrap().credits, credits_before);
    }

    // --- delayed queue / reaper plumbing ---------------------------------------------

    #[tokio::test]
    async fn delayed_message_not_yet_due_stays_pending_when_not_acked() {
        use gpu_sched_core::delayed::{run_once, DelayedSchedulerConfig};

        let store = InMemoryStore::new();
        store.enqueue_delayed("acme", "job-1", 5_000).await.unwrap();

        let cfg = DelayedSchedulerConfig {
            consumer_id: "delay-1".into(),
            batch_size: 10,
            block_ms: 0,
        };
        let reinjected = run_once(&store, &cfg, || 1_000).await.unwrap();
        assert_eq!(reinjected, 0);
        assert!(store.state.lock().await.main_queue.is_empty());
    }

    #[tokio::test]
    async fn delayed_message_past_due_is_reinjected_onto_the_main_queue() {
        use gpu_sched_core::delayed::{run_once, DelayedSchedulerConfig};

        let store = InMemoryStore::new();
        store.enqueue_delayed("acme", "job-1", 5_000).await.unwrap();

        let cfg = DelayedSchedulerConfig {
            consumer_id: "delay-1".into(),
            batch_size: 10,
            block_ms: 0,
        };
        let reinjected = run_once(&store, &cfg, || 6_000).await.unwrap();
        assert_eq!(reinjected, 1);

        let msg = store.read_main("w1", 0).await.unwrap().unwrap();
        assert_eq!(msg.job_id, "job-1");
    }

    #[tokio::test]
    async fn reaper_leaves_freshly_delivered_messages_alone() {
        use gpu_sched_core::reaper::{run_once, ReaperConfig};

        let store = InMemoryStore::new();
        store.set_quota("acme", quota(10.0, 0.0, 10.0, 0)).await;
        let job_id = submit_job(&store, "acme", 5.0, None, 0).await;
        store.read_main("w1", 0).await.unwrap();

        let cfg = ReaperConfig {
            consumer_id: "reaper-1".into(),
            min_idle_ms: 30_000,
            batch_size: 20,
            refund_full_cost: true,
        };
        let redelivered = run_once(&store, &cfg, || 0).await.unwrap();
        assert_eq!(redelivered, 0);
        let _ = job_id;
    }
}
