use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::record_model::{RecordId, RecordPayload, RecordVersion, SavedRecord};
use crate::sync::SaveError;

/// Cooperative cancellation flag handed to the persistence client with every
/// save. The orchestrator also drops the request future when it cancels.
#[derive(Debug, Clone, Default)]
pub struct SaveSignal {
    cancelled: Arc<AtomicBool>,
}

impl SaveSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Authoritative record store with optimistic concurrency control.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Writes the payload. `expected_version` is the version marker the client
    /// last observed (`None` for a record that was never persisted); the store
    /// answers with `SaveError::Conflict` when its own marker differs.
    async fn save(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
        signal: &SaveSignal,
    ) -> Result<SavedRecord, SaveError>;

    async fn fetch(&self, id: &RecordId) -> Result<SavedRecord, SaveError>;
}
