//! Records API client for persisting patient records over HTTP.
//!
//! New records are created with `POST /api/v1/records`, existing ones are
//! replaced with `PUT /api/v1/records/{id}` carrying the version the editor
//! last saw. A `409` response with a conflict body becomes
//! [`SaveError::Conflict`].

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use carechart_core::records::{
    PersistenceClient, RecordId, RecordPayload, RecordVersion, SaveSignal, SavedRecord,
};
use carechart_core::sync::{ConflictState, FieldError, SaveError};

use crate::config::{records_api_base_url, SaveConfig};
use crate::error::{ClientError, Result};

const MAX_LOG_BODY_CHARS: usize = 512;
const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRecordRequest<'a> {
    record: &'a RecordPayload,
    expected_version: Option<RecordVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictResponse {
    server_version: RecordVersion,
    #[serde(default)]
    client_version: Option<RecordVersion>,
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorResponse {
    code: String,
    message: String,
    #[serde(default)]
    field_errors: Vec<FieldError>,
}

/// Client for the Carechart records API.
#[derive(Debug, Clone)]
pub struct RecordApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RecordApiClient {
    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[RecordApi] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[RecordApi] Response error ({}): {}", status, preview);
    }

    /// Create a new records API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the records API (e.g., "https://records.clinic.example")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Client for `CARECHART_RECORDS_API_URL` with the configured request timeout.
    pub fn from_env(config: &SaveConfig) -> Result<Self> {
        Self::new(&records_api_base_url()?, config.request_timeout)
    }

    /// Authenticate every request with a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ClientError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn record_url(&self, id: &str) -> String {
        format!(
            "{}/api/v1/records/{}",
            self.base_url,
            urlencoding::encode(id)
        )
    }

    /// Parse a JSON response body, turning error statuses into [`ClientError`].
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let correlation_id = response
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Self::log_response(status, &body);

        if status == StatusCode::CONFLICT {
            if let Ok(conflict) = serde_json::from_str::<ConflictResponse>(&body) {
                return Err(ClientError::Conflict(ConflictState {
                    server_version: conflict.server_version,
                    client_version: conflict.client_version,
                    correlation_id: conflict
                        .correlation_id
                        .or(correlation_id)
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                }));
            }
        }

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message: format!("{}: {}", error.code, error.message),
                    field_errors: error.field_errors,
                });
            }
            return Err(ClientError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                "[RecordApi] Failed to deserialize response. Body: {}, Error: {}",
                body, e
            );
            ClientError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Create or replace a record.
    ///
    /// POST /api/v1/records (new) or PUT /api/v1/records/{id}
    pub async fn save_record(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
    ) -> Result<SavedRecord> {
        let body = SaveRecordRequest {
            record: payload,
            expected_version,
        };

        let request = match &payload.id {
            Some(id) => self.client.put(self.record_url(id)),
            None => self
                .client
                .post(format!("{}/api/v1/records", self.base_url)),
        };
        debug!(
            "[RecordApi] Saving record {} (expected version {:?})",
            payload.id.as_deref().unwrap_or("<new>"),
            expected_version
        );

        let response = request
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the stored representation of a record.
    ///
    /// GET /api/v1/records/{id}
    pub async fn fetch_record(&self, id: &str) -> Result<SavedRecord> {
        let response = self
            .client
            .get(self.record_url(id))
            .headers(self.headers()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[async_trait]
impl PersistenceClient for RecordApiClient {
    async fn save(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
        signal: &SaveSignal,
    ) -> std::result::Result<SavedRecord, SaveError> {
        if signal.is_cancelled() {
            return Err(SaveError::Cancelled);
        }
        let result = self
            .save_record(payload, expected_version)
            .await
            .map_err(SaveError::from);
        if signal.is_cancelled() {
            debug!("[RecordApi] Save response arrived after cancellation");
            return Err(SaveError::Cancelled);
        }
        result
    }

    async fn fetch(&self, id: &RecordId) -> std::result::Result<SavedRecord, SaveError> {
        self.fetch_record(id).await.map_err(SaveError::from)
    }
}
