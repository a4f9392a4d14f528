//! Error types for the record sync crate.

use thiserror::Error;

use carechart_core::sync::{classify_http_status, ConflictState, FieldError, SaveError, SaveErrorKind};

/// Result type alias for records API client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the HTTP records API client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the records service
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        field_errors: Vec<FieldError>,
    },

    /// Version mismatch reported with a parseable conflict body
    #[error("Version conflict (correlation id {})", .0.correlation_id)]
    Conflict(ConflictState),

    /// Invalid request (missing configuration, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (malformed token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            field_errors: Vec::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

impl From<ClientError> for SaveError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Conflict(conflict) => SaveError::Conflict(conflict),
            ClientError::Api {
                status,
                message,
                field_errors,
            } => match classify_http_status(status) {
                SaveErrorKind::Validation => SaveError::validation_fields(message, field_errors),
                SaveErrorKind::Transient => SaveError::transient(Some(status), message),
                // A conflict status without a readable body carries no versions to resolve against.
                _ => SaveError::unknown(format!("API error ({}): {}", status, message)),
            },
            ClientError::Http(err) if is_transient_transport_error(&err) => {
                SaveError::transient(err.status().map(|s| s.as_u16()), err.to_string())
            }
            ClientError::Http(err) => match err.status().map(|s| s.as_u16()) {
                Some(status) if classify_http_status(status) == SaveErrorKind::Transient => {
                    SaveError::transient(Some(status), err.to_string())
                }
                _ => SaveError::unknown(err.to_string()),
            },
            ClientError::InvalidRequest(message) => SaveError::validation(message),
            other @ (ClientError::Json(_) | ClientError::Auth(_)) => {
                SaveError::unknown(other.to_string())
            }
        }
    }
}

/// Terminal outcome of a manual save that neither applied nor conflicted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SaveFailure {
    /// The record needs corrections before it can be saved.
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: Vec<FieldError>,
    },

    /// Retries ran out, or the store failed in an unclassified way.
    #[error("{message}")]
    Unexpected { message: String },
}

impl SaveFailure {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { field_errors, .. } => field_errors,
            Self::Unexpected { .. } => &[],
        }
    }
}

impl From<SaveError> for SaveFailure {
    fn from(err: SaveError) -> Self {
        match err {
            SaveError::Validation {
                message,
                field_errors,
            } => Self::Validation {
                message,
                field_errors,
            },
            other => Self::unexpected(other.user_message()),
        }
    }
}

/// Errors from resolving a pending conflict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("No conflict of that kind is pending")]
    NoConflict,

    #[error("Overwriting the stored record requires elevated authorization")]
    NotAuthorized,

    #[error("The record has never been saved, there is nothing to reload")]
    NotPersisted,

    #[error("Reloading the record failed: {0}")]
    Reload(SaveError),

    #[error(transparent)]
    Save(#[from] SaveFailure),
}
