//! Shared wiring for the control plane binaries: tracing setup and the two
//! external-collaborator implementations (blob storage, agent execution) used
//! to make the binaries actually runnable. Neither is part of the correctness
//! spine; swap them for real implementations in a production deployment.

pub mod blob;
pub mod executor;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` `fmt` layer driven by `RUST_LOG`, matching
/// the logging convention used across this crate family's binaries.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("GPU_SCHED_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
