//! Redis-backed [`Store`]. Streams give us consumer-group delivery and PEL
//! reclamation for free; sorted sets give us the reservations index and the
//! delayed queue's due-time ordering; Lua scripts give us the atomicity the
//! correctness spine depends on.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamAutoclaimReply, StreamId, StreamReadReply};
use redis::{AsyncCommands, RedisResult, Script, Value};

use gpu_sched_core::model::{
    ClaimOutcome, DelayedMessage, FinalState, FinalizeOutcome, Job, JobState, MainMessage,
    RecoverOutcome, RenewOutcome, Reservation,
};
use gpu_sched_core::schema::{
    agent_pointer_key, delayed_queue_key, idempotency_key, job_key, quota_key, queue_key,
    reservations_key,
};
use gpu_sched_core::store::Store;

const MAIN_GROUP: &str = "gpu-workers";
const DELAYED_GROUP: &str = "delay-scheduler";

pub struct RedisStore {
    conn: ConnectionManager,
    claim_script: Script,
    renew_script: Script,
    finalize_script: Script,
    recover_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            claim_script: Script::new(include_str!("lua/claim.lua")),
            renew_script: Script::new(include_str!("lua/renew.lua")),
            finalize_script: Script::new(include_str!("lua/finalize.lua")),
            recover_script: Script::new(include_str!("lua/recover_expired_lease.lua")),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn job_from_hash(tenant_id: &str, job_id: &str, fields: Vec<(String, String)>) -> Option<Job> {
    if fields.is_empty() {
        return None;
    }
    let get = |k: &str| fields.iter().find(|(f, _)| f == k).map(|(_, v)| v.clone());

    Some(Job {
        tenant_id: tenant_id.to_string(),
        job_id: job_id.to_string(),
        agent_id: get("agent_id").unwrap_or_default(),
        state: get("state").and_then(|s| JobState::parse(&s)).unwrap_or(JobState::Queued),
        prompt: get("prompt").unwrap_or_default(),
        cost_gpu_seconds: get("cost_gpu_seconds").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        worker_id: get("worker_id"),
        start_ms: get("start_ms").and_then(|v| v.parse().ok()),
        created_ms: get("created_ms").and_then(|v| v.parse().ok()).unwrap_or(0),
        updated_ms: get("updated_ms").and_then(|v| v.parse().ok()).unwrap_or(0),
        payload: get("payload"),
    })
}

/// Reads a field out of a stream entry's map, decoding the `BulkString` the
/// way every value in a Redis stream entry actually arrives.
fn field(map: &HashMap<String, Value>, name: &str) -> String {
    match map.get(name) {
        Some(Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).to_string(),
        _ => String::new(),
    }
}

fn main_message_from_entry(entry: &StreamId) -> MainMessage {
    MainMessage {
        stream_id: entry.id.clone(),
        tenant_id: field(&entry.map, "tenant_id"),
        job_id: field(&entry.map, "job_id"),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ensure_groups(&self) -> anyhow::Result<()> {
        let mut conn = self.conn();
        for (stream, group) in [(queue_key(), MAIN_GROUP), (delayed_queue_key(), DELAYED_GROUP)] {
            let res: RedisResult<()> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            if let Err(e) = res {
                if !e.to_string().contains("BUSYGROUP") {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn get_idempotent_job(
        &self,
        tenant_id: &str,
        idempotency_key_: &str,
    ) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn();
        let v: Option<String> = conn.get(idempotency_key(tenant_id, idempotency_key_)).await?;
        Ok(v)
    }

    async fn put_job_record(&self, job: &Job) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let key = job_key(&job.tenant_id, &job.job_id);
        let mut fields: Vec<(&str, String)> = vec![
            ("tenant_id", job.tenant_id.clone()),
            ("job_id", job.job_id.clone()),
            ("agent_id", job.agent_id.clone()),
            ("state", job.state.as_str().to_string()),
            ("prompt", job.prompt.clone()),
            ("cost_gpu_seconds", job.cost_gpu_seconds.to_string()),
            ("created_ms", job.created_ms.to_string()),
            ("updated_ms", job.updated_ms.to_string()),
        ];
        if let Some(w) = &job.worker_id {
            fields.push(("worker_id", w.clone()));
        }
        if let Some(s) = job.start_ms {
            fields.push(("start_ms", s.to_string()));
        }
        if let Some(p) = &job.payload {
            fields.push(("payload", p.clone()));
        }
        let _: () = conn.hset_multiple(key, &fields).await?;
        Ok(())
    }

    async fn enqueue_main(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("XADD")
            .arg(queue_key())
            .arg("*")
            .arg("tenant_id")
            .arg(tenant_id)
            .arg("job_id")
            .arg(job_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_idempotency(
        &self,
        tenant_id: &str,
        idempotency_key_: &str,
        job_id: &str,
        ttl_s: i64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(idempotency_key(tenant_id, idempotency_key_), job_id, ttl_s as u64)
            .await?;
        Ok(())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> anyhow::Result<Option<Job>> {
        let mut conn = self.conn();
        let fields: Vec<(String, String)> = conn.hgetall(job_key(tenant_id, job_id)).await?;
        Ok(job_from_hash(tenant_id, job_id, fields))
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
        let mut conn = self.conn();
        let (ok, code, credits, expiry, observed_state): (i64, String, f64, i64, String) = self
            .claim_script
            .key(quota_key(tenant_id))
            .key(job_key(tenant_id, job_id))
            .key(reservations_key())
            .arg(job_id)
            .arg(cost_gpu_seconds)
            .arg(now_ms)
            .arg(lease_ttl_ms)
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;

        Ok(match (ok, code.as_str()) {
            (1, "OK") => ClaimOutcome::Ok {
                credits_remaining: credits,
                lease_expires_ms: expiry,
            },
            (0, "JOB_NOT_FOUND") => ClaimOutcome::JobNotFound,
            (0, "INSUFFICIENT_CREDITS") => ClaimOutcome::InsufficientCredits {
                credits_remaining: credits,
            },
            _ => ClaimOutcome::JobNotQueued {
                observed_state: JobState::parse(&observed_state).unwrap_or(JobState::Queued),
            },
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
        let mut conn = self.conn();
        let code: String = self
            .renew_script
            .key(job_key(tenant_id, job_id))
            .key(reservations_key())
            .arg(job_id)
            .arg(now_ms)
            .arg(extend_ms)
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(match code.as_str() {
            "OK" => RenewOutcome::Ok,
            "NOT_OWNER" => RenewOutcome::NotOwner,
            _ => RenewOutcome::NotRunning,
        })
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
        let mut conn = self.conn();
        let code: String = self
            .finalize_script
            .key(job_key(tenant_id, job_id))
            .key(reservations_key())
            .arg(job_id)
            .arg(now_ms)
            .arg(worker_id)
            .arg(final_state.as_job_state().as_str())
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(match code.as_str() {
            "OK" => FinalizeOutcome::Ok,
            "NOT_OWNER" => FinalizeOutcome::NotOwner,
            _ => FinalizeOutcome::NotRunning,
        })
    }

    async fn recover_expired_lease(
        &self,
        tenant_id: &str,
        job_id: &str,
        now_ms: i64,
        refund: f64,
    ) -> anyhow::Result<RecoverOutcome> {
        let mut conn = self.conn();
        let code: String = self
            .recover_script
            .key(job_key(tenant_id, job_id))
            .key(reservations_key())
            .key(quota_key(tenant_id))
            .arg(job_id)
            .arg(now_ms)
            .arg(refund)
            .invoke_async(&mut conn)
            .await?;
        Ok(match code.as_str() {
            "RECOVERED" => RecoverOutcome::Recovered,
            "NOT_EXPIRED" => RecoverOutcome::NotExpired,
            _ => RecoverOutcome::NotRunning,
        })
    }

    async fn get_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn();
        let v: Option<String> = conn.get(agent_pointer_key(tenant_id, agent_id)).await?;
        Ok(v)
    }

    async fn put_agent_pointer(
        &self,
        tenant_id: &str,
        agent_id: &str,
        pointer: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: () = conn.set(agent_pointer_key(tenant_id, agent_id), pointer).await?;
        Ok(())
    }

    async fn read_main(
        &self,
        worker_id: &str,
        block_ms: i64,
    ) -> anyhow::Result<Option<MainMessage>> {
        let mut conn = self.conn();
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(MAIN_GROUP)
            .arg(worker_id)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(queue_key())
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .keys
            .iter()
            .flat_map(|k| k.ids.iter())
            .next()
            .map(main_message_from_entry))
    }

    async fn ack_main(&self, stream_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.xack(queue_key(), MAIN_GROUP, &[stream_id]).await?;
        Ok(())
    }

    async fn reclaim_pending_main(
        &self,
        consumer_id: &str,
        min_idle_ms: i64,
        count: i64,
    ) -> anyhow::Result<Vec<MainMessage>> {
        let mut conn = self.conn();
        let reply: StreamAutoclaimReply = redis::cmd("XAUTOCLAIM")
            .arg(queue_key())
            .arg(MAIN_GROUP)
            .arg(consumer_id)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(reply.claimed.iter().map(main_message_from_entry).collect())
    }

    async fn enqueue_delayed(
        &self,
        tenant_id: &str,
        job_id: &str,
        run_at_ms: i64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("XADD")
            .arg(delayed_queue_key())
            .arg("*")
            .arg("tenant_id")
            .arg(tenant_id)
            .arg("job_id")
            .arg(job_id)
            .arg("run_at_ms")
            .arg(run_at_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_delayed_batch(
        &self,
        consumer_id: &str,
        count: i64,
        block_ms: i64,
    ) -> anyhow::Result<Vec<DelayedMessage>> {
        let mut conn = self.conn();
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(DELAYED_GROUP)
            .arg(consumer_id)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(delayed_queue_key())
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .keys
            .iter()
            .flat_map(|k| k.ids.iter())
            .map(|entry| DelayedMessage {
                stream_id: entry.id.clone(),
                tenant_id: field(&entry.map, "tenant_id"),
                job_id: field(&entry.map, "job_id"),
                run_at_ms: field(&entry.map, "run_at_ms").parse().unwrap_or(0),
            })
            .collect())
    }

    async fn ack_delayed(&self, stream_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn
            .xack(delayed_queue_key(), DELAYED_GROUP, &[stream_id])
            .await?;
        Ok(())
    }

    async fn list_reservations(&self) -> anyhow::Result<Vec<Reservation>> {
        let mut conn = self.conn();
        let entries: Vec<(String, i64)> = conn
            .zrange_withscores(reservations_key(), 0, -1)
            .await?;
        Ok(entries
            .into_iter()
            .map(|(job_id, expiry_ms)| Reservation { job_id, expiry_ms })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_in_a_stream_entry_decodes_as_empty() {
        let map = HashMap::new();
        assert_eq!(field(&map, "tenant_id"), "");
    }

    #[test]
    fn bulk_string_field_decodes_to_its_utf8_text() {
        let mut map = HashMap::new();
        map.insert("tenant_id".to_string(), Value::BulkString(b"acme".to_vec()));
        assert_eq!(field(&map, "tenant_id"), "acme");
    }
}
