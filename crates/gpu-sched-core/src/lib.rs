//! Backend-agnostic domain model and orchestration algorithms for the control
//! plane of a multi-tenant GPU job scheduler.
//!
//! The correctness spine is three atomic operations — CLAIM, RENEW, FINALIZE —
//! plus a fourth, RECOVER_EXPIRED_LEASE, that repairs a job orphaned by a
//! crashed worker. Everything in this crate is generic over the [`store::Store`]
//! trait; concrete storage (Redis) and a deterministic in-memory double for
//! tests live in sibling crates.

pub mod config;
pub mod delayed;
pub mod error;
pub mod ingress;
pub mod model;
pub mod reaper;
pub mod schema;
pub mod store;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::{Categorizable, SafeErrorCategory, SchedulerError};
pub use store::{AgentExecutor, BlobStore, Store};
