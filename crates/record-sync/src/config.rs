//! Save timing configuration, overridable through environment variables.

use log::warn;
use std::str::FromStr;
use std::time::Duration;

use carechart_core::sync::{
    backoff_delay, AUTOSAVE_DEBOUNCE_MS, SAVE_BASE_BACKOFF_MS, SAVE_MAX_BACKOFF_MS,
    SAVE_MAX_RETRIES, SAVE_REQUEST_TIMEOUT_SECS,
};

use crate::error::{ClientError, Result};

pub const AUTOSAVE_DEBOUNCE_ENV: &str = "CARECHART_AUTOSAVE_DEBOUNCE_MS";
pub const SAVE_MAX_RETRIES_ENV: &str = "CARECHART_SAVE_MAX_RETRIES";
pub const SAVE_BACKOFF_ENV: &str = "CARECHART_SAVE_BACKOFF_MS";
pub const SAVE_TIMEOUT_ENV: &str = "CARECHART_SAVE_TIMEOUT_SECS";
pub const RECORDS_API_URL_ENV: &str = "CARECHART_RECORDS_API_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveConfig {
    /// Quiet period after the last edit before the automatic path saves.
    pub debounce: Duration,
    /// Retries per attempt for transient failures.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(AUTOSAVE_DEBOUNCE_MS),
            max_retries: SAVE_MAX_RETRIES,
            base_backoff: Duration::from_millis(SAVE_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(SAVE_MAX_BACKOFF_MS),
            request_timeout: Duration::from_secs(SAVE_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl SaveConfig {
    /// Defaults overridden by whichever `CARECHART_*` variables are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            debounce: Duration::from_millis(parse_or(
                &lookup,
                AUTOSAVE_DEBOUNCE_ENV,
                AUTOSAVE_DEBOUNCE_MS,
            )),
            max_retries: parse_or(&lookup, SAVE_MAX_RETRIES_ENV, SAVE_MAX_RETRIES),
            base_backoff: Duration::from_millis(parse_or(
                &lookup,
                SAVE_BACKOFF_ENV,
                SAVE_BASE_BACKOFF_MS,
            )),
            max_backoff: defaults.max_backoff,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                SAVE_TIMEOUT_ENV,
                SAVE_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    /// Wait before retry number `retry` (zero-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        backoff_delay(retry, self.base_backoff, self.max_backoff)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    "[RecordSave] Ignoring {}={:?}, using default {}",
                    name, raw, default
                );
                default
            }
        },
    }
}

/// Base URL of the records API, from `CARECHART_RECORDS_API_URL`.
pub fn records_api_base_url() -> Result<String> {
    std::env::var(RECORDS_API_URL_ENV)
        .ok()
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ClientError::invalid_request(format!("{} is not set", RECORDS_API_URL_ENV)))
}
