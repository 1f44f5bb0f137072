//! Record shapes for the correctness spine: jobs, quotas, and the outcomes
//! returned by the atomic operations in [`crate::store`].

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job. Monotonic along `Queued -> Running -> {Completed, Failed}`,
/// with the single repair exception of `Running -> Queued` when a lease has expired
/// and the reaper has run [`crate::store::Store::recover_expired_lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "RUNNING" => Some(JobState::Running),
            "COMPLETED" => Some(JobState::Completed),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A durable job record, keyed by `(tenant_id, job_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub tenant_id: String,
    pub job_id: String,
    pub agent_id: String,
    pub state: JobState,
    pub prompt: String,
    pub cost_gpu_seconds: f64,
    pub worker_id: Option<String>,
    pub start_ms: Option<i64>,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub payload: Option<String>,
}

/// A tenant's token-bucket quota, lazily refilled on access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quota {
    pub credits: f64,
    pub rate_per_sec: f64,
    pub burst: f64,
    pub last_ms: i64,
}

impl Quota {
    /// Refill by elapsed time, capped at `burst`. Does not persist anything;
    /// callers (atomic ops) are responsible for writing the result back.
    pub fn refilled(&self, now_ms: i64) -> Quota {
        let dt_secs = ((now_ms - self.last_ms).max(0) as f64) / 1000.0;
        let credits = (self.credits + self.rate_per_sec * dt_secs).min(self.burst);
        Quota {
            credits,
            last_ms: now_ms,
            ..*self
        }
    }
}

/// Parameters for a new submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub tenant_id: String,
    pub agent_id: String,
    pub prompt: String,
    pub cost_gpu_seconds: f64,
    pub idempotency_key: Option<String>,
}

/// Result of [`crate::ingress::submit`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub status: &'static str,
}

/// Outcome of the CLAIM atomic operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Ok { credits_remaining: f64, lease_expires_ms: i64 },
    JobNotQueued { observed_state: JobState },
    InsufficientCredits { credits_remaining: f64 },
    JobNotFound,
}

/// Outcome of the RENEW atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Ok,
    NotRunning,
    NotOwner,
}

/// Terminal state a worker finalizes a job into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinalState {
    Completed,
    Failed,
}

impl FinalState {
    pub fn as_job_state(&self) -> JobState {
        match self {
            FinalState::Completed => JobState::Completed,
            FinalState::Failed => JobState::Failed,
        }
    }
}

/// Outcome of the FINALIZE atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Ok,
    NotRunning,
    NotOwner,
}

/// Outcome of the RECOVER_EXPIRED_LEASE repair operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverOutcome {
    Recovered,
    NotExpired,
    NotRunning,
}

/// A message delivered from the main queue's consumer group.
#[derive(Debug, Clone)]
pub struct MainMessage {
    pub stream_id: String,
    pub tenant_id: String,
    pub job_id: String,
}

/// A message delivered from the delayed queue's consumer group.
#[derive(Debug, Clone)]
pub struct DelayedMessage {
    pub stream_id: String,
    pub tenant_id: String,
    pub job_id: String,
    pub run_at_ms: i64,
}

/// A live lease entry from the reservations index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub job_id: String,
    pub expiry_ms: i64,
}

#[cfg(test)]
mod quota_tests {
    use super::*;

    #[test]
    fn refill_never_exceeds_burst_across_randomized_elapsed_times() {
        for _ in 0..500 {
            let burst = 1.0 + fastrand::f64() * 100.0;
            let rate = fastrand::f64() * 50.0;
            let starting_credits = fastrand::f64() * burst;
            let elapsed_ms = fastrand::i64(0..=3_600_000);

            let quota = Quota {
                credits: starting_credits,
                rate_per_sec: rate,
                burst,
                last_ms: 0,
            };
            let refilled = quota.refilled(elapsed_ms);

            assert!(refilled.credits <= burst + 1e-9);
            assert!(refilled.credits >= starting_credits - 1e-9);
            assert_eq!(refilled.last_ms, elapsed_ms);
        }
    }

    #[test]
    fn refill_is_a_no_op_when_no_time_has_elapsed() {
        let quota = Quota {
            credits: 3.0,
            rate_per_sec: 1.0,
            burst: 10.0,
            last_ms: 1_000,
        };
        let refilled = quota.refilled(1_000);
        assert_eq!(refilled.credits, 3.0);
    }

    #[test]
    fn negative_elapsed_time_does_not_drain_credits() {
        // Clock skew between callers should never be able to charge a tenant
        // for time that hasn't passed.
        let quota = Quota {
            credits: 3.0,
            rate_per_sec: 1.0,
            burst: 10.0,
            last_ms: 1_000,
        };
        let refilled = quota.refilled(500);
        assert_eq!(refilled.credits, 3.0);
    }
}
