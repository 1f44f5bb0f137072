//! Typed errors for the scheduler core, plus a sanitization boundary so the
//! HTTP ingress layer can map internal failures to response codes without
//! leaking implementation detail to callers.

use std::borrow::Cow;
use thiserror::Error;

/// A coarse, externally-safe bucket for an error. Never carries internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeErrorCategory {
    Validation,
    NotFound,
    Transient,
    Internal,
}

impl std::fmt::Display for SafeErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SafeErrorCategory::Validation => "validation",
            SafeErrorCategory::NotFound => "not_found",
            SafeErrorCategory::Transient => "transient",
            SafeErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Implemented by errors that know how to describe themselves safely to a caller
/// outside the trust boundary, without exposing store internals or stack detail.
pub trait Categorizable {
    fn category(&self) -> SafeErrorCategory;
    fn safe_message(&self) -> Cow<'static, str>;
}

/// Errors the core surfaces. Correctness-path outcomes (insufficient credits, lost
/// a claim race, not the lease owner) are *not* represented here — those are typed
/// return values from the `Store` atomic operations, not exceptions, because they
/// drive control flow rather than signal something unexpected.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cost_gpu_seconds must be positive, got {0}")]
    InvalidCost(f64),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

impl Categorizable for SchedulerError {
    fn category(&self) -> SafeErrorCategory {
        match self {
            SchedulerError::InvalidCost(_) => SafeErrorCategory::Validation,
            SchedulerError::JobNotFound(_) => SafeErrorCategory::NotFound,
            SchedulerError::Store(_) => SafeErrorCategory::Transient,
            SchedulerError::MalformedRecord(_) => SafeErrorCategory::Internal,
        }
    }

    fn safe_message(&self) -> Cow<'static, str> {
        match self {
            SchedulerError::InvalidCost(_) => Cow::Borrowed("cost_gpu_seconds must be positive"),
            SchedulerError::JobNotFound(_) => Cow::Borrowed("job not found"),
            SchedulerError::Store(_) => Cow::Borrowed("temporarily unavailable, retry"),
            SchedulerError::MalformedRecord(_) => Cow::Borrowed("internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cost_categorizes_as_validation() {
        let err = SchedulerError::InvalidCost(-1.0);
        assert_eq!(err.category(), SafeErrorCategory::Validation);
        assert_eq!(err.safe_message(), "cost_gpu_seconds must be positive");
    }

    #[test]
    fn store_errors_never_leak_their_cause_in_the_safe_message() {
        let err = SchedulerError::Store(anyhow::anyhow!("connection reset by db-primary-7"));
        assert_eq!(err.category(), SafeErrorCategory::Transient);
        assert!(!err.safe_message().contains("db-primary-7"));
    }
}
