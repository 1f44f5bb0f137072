//! Scheduler-wide configuration, with the defaults from the external interface
//! contract and an `from_env` constructor for the binaries.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub redis_url: String,
    pub http_addr: String,
    pub lease_ttl_ms: i64,
    pub renew_every_ms: i64,
    pub delay_on_no_credits_ms: i64,
    pub reaper_min_idle_ms: i64,
    pub idempotency_ttl_s: i64,
    pub stream_block_ms: i64,
    pub reaper_batch_size: i64,
    pub delayed_batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            lease_ttl_ms: 30_000,
            renew_every_ms: 10_000,
            delay_on_no_credits_ms: 5_000,
            reaper_min_idle_ms: 30_000,
            idempotency_ttl_s: 86_400,
            stream_block_ms: 2_000,
            reaper_batch_size: 20,
            delayed_batch_size: 10,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from the process environment, falling back to
    /// `.env` (if present) and then built-in defaults. Mirrors the
    /// `dotenvy` + `env::var` + `anyhow::Context` pattern used elsewhere in
    /// this crate family's service binaries.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let redis_url = env_or("GPU_SCHED_REDIS_URL", defaults.redis_url)?;
        let http_addr = env_or("GPU_SCHED_HTTP_ADDR", defaults.http_addr)?;
        let lease_ttl_ms = env_or_parse("GPU_SCHED_LEASE_TTL_MS", defaults.lease_ttl_ms)?;
        let renew_every_ms = env_or_parse("GPU_SCHED_RENEW_EVERY_MS", defaults.renew_every_ms)?;
        let delay_on_no_credits_ms = env_or_parse(
            "GPU_SCHED_DELAY_ON_NO_CREDITS_MS",
            defaults.delay_on_no_credits_ms,
        )?;
        let reaper_min_idle_ms =
            env_or_parse("GPU_SCHED_REAPER_MIN_IDLE_MS", defaults.reaper_min_idle_ms)?;
        let idempotency_ttl_s =
            env_or_parse("GPU_SCHED_IDEMPOTENCY_TTL_S", defaults.idempotency_ttl_s)?;
        let stream_block_ms = env_or_parse("GPU_SCHED_STREAM_BLOCK_MS", defaults.stream_block_ms)?;
        let reaper_batch_size =
            env_or_parse("GPU_SCHED_REAPER_BATCH_SIZE", defaults.reaper_batch_size)?;
        let delayed_batch_size =
            env_or_parse("GPU_SCHED_DELAYED_BATCH_SIZE", defaults.delayed_batch_size)?;

        let cfg = Self {
            redis_url,
            http_addr,
            lease_ttl_ms,
            renew_every_ms,
            delay_on_no_credits_ms,
            reaper_min_idle_ms,
            idempotency_ttl_s,
            stream_block_ms,
            reaper_batch_size,
            delayed_batch_size,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.renew_every_ms * 2 < self.lease_ttl_ms,
            "renew_every_ms ({}) must be less than half of lease_ttl_ms ({})",
            self.renew_every_ms,
            self.lease_ttl_ms
        );
        anyhow::ensure!(
            self.reaper_min_idle_ms >= self.lease_ttl_ms,
            "reaper_min_idle_ms ({}) must be at least lease_ttl_ms ({})",
            self.reaper_min_idle_ms,
            self.lease_ttl_ms
        );
        Ok(())
    }
}

fn env_or(name: &str, default: String) -> Result<String> {
    match std::env::var(name) {
        Ok(v) => Ok(v),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("reading {name}")),
    }
}

fn env_or_parse(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(v) => v.parse::<i64>().with_context(|| format!("parsing {name}={v}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("reading {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_external_interface_contract() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.lease_ttl_ms, 30_000);
        assert_eq!(cfg.renew_every_ms, 10_000);
        assert_eq!(cfg.delay_on_no_credits_ms, 5_000);
        assert_eq!(cfg.reaper_min_idle_ms, 30_000);
        assert_eq!(cfg.idempotency_ttl_s, 86_400);
        assert_eq!(cfg.stream_block_ms, 2_000);
    }

    #[test]
    fn defaults_pass_validation() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_renew_cadence_too_close_to_lease_ttl() {
        let mut cfg = SchedulerConfig::default();
        cfg.renew_every_ms = cfg.lease_ttl_ms;
        assert!(cfg.validate().is_err());
    }
}
