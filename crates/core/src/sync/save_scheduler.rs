//! Default timing constants for record saves.

/// Quiet period after the last edit before an automatic save fires.
pub const AUTOSAVE_DEBOUNCE_MS: u64 = 800;

/// Retries allowed for a transient failure before it is treated as unexpected.
pub const SAVE_MAX_RETRIES: u32 = 3;

/// Backoff before the first retry; doubles on every further retry.
pub const SAVE_BASE_BACKOFF_MS: u64 = 500;

/// Upper bound on a single backoff wait.
pub const SAVE_MAX_BACKOFF_MS: u64 = 8_000;

/// Request timeout enforced by the HTTP persistence client.
pub const SAVE_REQUEST_TIMEOUT_SECS: u64 = 30;
