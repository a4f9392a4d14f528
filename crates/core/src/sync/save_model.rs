//! Save orchestration domain models: sources, phases, conflicts and the
//! persistence error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::records::RecordVersion;

/// Which write path issued a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveSource {
    Auto,
    Manual,
}

impl fmt::Display for SaveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveSource::Auto => write!(f, "auto"),
            SaveSource::Manual => write!(f, "manual"),
        }
    }
}

/// Per-source lifecycle: Idle → Debouncing → InFlight → one of the terminal
/// phases. `RetryScheduled` records how many retries have been used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AttemptPhase {
    #[default]
    Idle,
    Debouncing,
    InFlight,
    Applied,
    Suppressed,
    RetryScheduled {
        attempt: u32,
    },
    ConflictRaised,
    FatalRaised,
}

impl AttemptPhase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AttemptPhase::InFlight | AttemptPhase::RetryScheduled { .. }
        )
    }
}

/// Store-reported version mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictState {
    pub server_version: RecordVersion,
    pub client_version: Option<RecordVersion>,
    pub correlation_id: String,
}

/// Field-level detail attached to a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Category tag of a [`SaveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveErrorKind {
    Cancelled,
    Conflict,
    Validation,
    Transient,
    Unknown,
}

/// Errors a persistence client reports for a save or fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SaveError {
    /// The attempt was superseded before it completed.
    #[error("Save cancelled")]
    Cancelled,

    /// The stored version differs from the one the client expected.
    #[error("Version conflict (correlation id {})", .0.correlation_id)]
    Conflict(ConflictState),

    /// The payload was rejected by the local pre-check or the store.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field_errors: Vec<FieldError>,
    },

    /// Timeouts, connectivity failures, throttling, store-side hiccups.
    #[error("Transient failure: {message}")]
    Transient { status: Option<u16>, message: String },

    #[error("Unexpected failure: {0}")]
    Unknown(String),
}

impl SaveError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field_errors: Vec::new(),
        }
    }

    pub fn validation_fields(message: impl Into<String>, field_errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            field_errors,
        }
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }

    pub fn kind(&self) -> SaveErrorKind {
        match self {
            Self::Cancelled => SaveErrorKind::Cancelled,
            Self::Conflict(_) => SaveErrorKind::Conflict,
            Self::Validation { .. } => SaveErrorKind::Validation,
            Self::Transient { .. } => SaveErrorKind::Transient,
            Self::Unknown(_) => SaveErrorKind::Unknown,
        }
    }

    /// HTTP-like status class for transient errors, when known.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            _ => None,
        }
    }

    /// One human-readable line for the editor's error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation {
                message,
                field_errors,
            } if !field_errors.is_empty() => {
                let details: Vec<String> = field_errors.iter().map(|e| e.to_string()).collect();
                format!("{}: {}", message, details.join(", "))
            }
            Self::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
