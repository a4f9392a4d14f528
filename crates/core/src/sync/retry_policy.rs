//! Failure classification and backoff for save attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::save_model::{SaveError, SaveErrorKind};

/// What the orchestrator does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Superseded attempt; drop it without notice.
    Discard,
    /// Hand over to the conflict resolver, never retry.
    RouteToConflict,
    /// The user must correct input; never retry.
    RejectInvalid,
    /// Retry with backoff while attempts remain.
    Retry,
    /// Log; fatal for manual saves, silent for automatic ones.
    FailUnexpected,
}

/// Classify by explicit error category.
pub fn classify_save_error(err: &SaveError) -> RetryDecision {
    match err.kind() {
        SaveErrorKind::Cancelled => RetryDecision::Discard,
        SaveErrorKind::Conflict => RetryDecision::RouteToConflict,
        SaveErrorKind::Validation => RetryDecision::RejectInvalid,
        SaveErrorKind::Transient => RetryDecision::Retry,
        SaveErrorKind::Unknown => RetryDecision::FailUnexpected,
    }
}

/// Map an HTTP status from the record store into the error taxonomy.
pub fn classify_http_status(status: u16) -> SaveErrorKind {
    match status {
        409 | 412 => SaveErrorKind::Conflict,
        400 | 422 => SaveErrorKind::Validation,
        408 | 423 | 425 | 429 => SaveErrorKind::Transient,
        500..=599 => SaveErrorKind::Transient,
        _ => SaveErrorKind::Unknown,
    }
}

/// Exponential backoff before retry number `retry` (zero-based), capped at `max`.
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    const MAX_EXPONENT: u32 = 8;

    let factor = 1_u32 << retry.min(MAX_EXPONENT);
    base.saturating_mul(factor).min(max)
}
