use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use carechart_core::records::{
    PersistenceClient, RecordId, RecordPayload, RecordVersion, SaveSignal, SavedRecord,
};
use carechart_core::sync::{ConflictState, SaveError};

/// One observed `save` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveCall {
    pub payload: RecordPayload,
    pub expected_version: Option<RecordVersion>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<RecordId, SavedRecord>,
    last_version: Option<RecordVersion>,
    scripted_failures: VecDeque<SaveError>,
    calls: Vec<SaveCall>,
}

impl StoreState {
    /// Wall clock, bumped so every write gets a strictly newer marker.
    fn next_version(&mut self) -> RecordVersion {
        let now = Utc::now();
        let version = match self.last_version {
            Some(last) if now <= last => last + ChronoDuration::milliseconds(1),
            _ => now,
        };
        self.last_version = Some(version);
        version
    }
}

/// In-process record store with optimistic concurrency control.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<StoreState>,
    latency: Option<Duration>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every save and fetch by `latency` (tokio time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a record directly, bypassing version checks.
    pub fn seed(&self, mut payload: RecordPayload) -> SavedRecord {
        let mut state = self.state();
        let id = payload
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        payload.id = Some(id.clone());
        let saved = SavedRecord {
            id: id.clone(),
            version: state.next_version(),
            payload,
        };
        state.records.insert(id, saved.clone());
        saved
    }

    /// Mutates a stored record as another editor would, bumping its version.
    pub fn write_external<F>(&self, id: &str, mutate: F) -> Option<SavedRecord>
    where
        F: FnOnce(&mut RecordPayload),
    {
        let mut state = self.state();
        let version = state.next_version();
        let saved = state.records.get_mut(id)?;
        mutate(&mut saved.payload);
        saved.version = version;
        debug!("[RecordStore] External write to {} (version {})", id, version);
        Some(saved.clone())
    }

    /// The next save fails with `err` instead of touching the store.
    pub fn fail_next_save(&self, err: SaveError) {
        self.state().scripted_failures.push_back(err);
    }

    pub fn get(&self, id: &str) -> Option<SavedRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn save_calls(&self) -> Vec<SaveCall> {
        self.state().calls.clone()
    }

    pub fn save_count(&self) -> usize {
        self.state().calls.len()
    }

    fn save_impl(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
    ) -> Result<SavedRecord, SaveError> {
        let mut state = self.state();
        state.calls.push(SaveCall {
            payload: payload.clone(),
            expected_version,
        });
        if let Some(err) = state.scripted_failures.pop_front() {
            debug!("[RecordStore] Scripted failure: {}", err);
            return Err(err);
        }

        let id = match &payload.id {
            Some(id) => {
                let current = state
                    .records
                    .get(id)
                    .map(|saved| saved.version)
                    .ok_or_else(|| SaveError::unknown(format!("Record {} does not exist", id)))?;
                if expected_version != Some(current) {
                    let conflict = ConflictState {
                        server_version: current,
                        client_version: expected_version,
                        correlation_id: Uuid::new_v4().to_string(),
                    };
                    debug!(
                        "[RecordStore] Conflict on {}: server={} client={:?} correlation={}",
                        id, current, expected_version, conflict.correlation_id
                    );
                    return Err(SaveError::Conflict(conflict));
                }
                id.clone()
            }
            None => {
                if expected_version.is_some() {
                    return Err(SaveError::validation(
                        "A new record cannot carry a version marker",
                    ));
                }
                Uuid::new_v4().to_string()
            }
        };

        let mut stored_payload = payload.clone();
        stored_payload.id = Some(id.clone());
        let saved = SavedRecord {
            id: id.clone(),
            version: state.next_version(),
            payload: stored_payload,
        };
        state.records.insert(id, saved.clone());
        debug!("[RecordStore] Saved {} (version {})", saved.id, saved.version);
        Ok(saved)
    }
}

#[async_trait]
impl PersistenceClient for MemoryRecordStore {
    async fn save(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
        signal: &SaveSignal,
    ) -> Result<SavedRecord, SaveError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if signal.is_cancelled() {
            return Err(SaveError::Cancelled);
        }
        self.save_impl(payload, expected_version)
    }

    async fn fetch(&self, id: &RecordId) -> Result<SavedRecord, SaveError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.get(id)
            .ok_or_else(|| SaveError::unknown(format!("Record {} does not exist", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn payload(id: Option<&str>, last_name: &str) -> RecordPayload {
        let mut fields = BTreeMap::new();
        fields.insert("last_name".to_string(), json!(last_name));
        RecordPayload {
            id: id.map(str::to_string),
            fields,
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_version() {
        let store = MemoryRecordStore::new();
        let saved = store
            .save(&payload(None, "Babić"), None, &SaveSignal::new())
            .await
            .expect("create");

        assert_eq!(saved.payload.id.as_deref(), Some(saved.id.as_str()));
        assert_eq!(store.get(&saved.id), Some(saved.clone()));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = MemoryRecordStore::new();
        let seeded = store.seed(payload(Some("rec-1"), "Babić"));
        let external = store
            .write_external("rec-1", |p| {
                p.fields.insert("last_name".to_string(), json!("Babić-Horvat"));
            })
            .expect("external write");

        let err = store
            .save(
                &payload(Some("rec-1"), "Babic"),
                Some(seeded.version),
                &SaveSignal::new(),
            )
            .await
            .unwrap_err();

        let SaveError::Conflict(conflict) = err else {
            panic!("expected conflict, got {:?}", err);
        };
        assert_eq!(conflict.server_version, external.version);
        assert_eq!(conflict.client_version, Some(seeded.version));
        assert!(external.version > seeded.version);
    }

    #[tokio::test]
    async fn matching_version_updates_and_bumps_marker() {
        let store = MemoryRecordStore::new();
        let seeded = store.seed(payload(Some("rec-1"), "Babić"));
        let saved = store
            .save(
                &payload(Some("rec-1"), "Babić"),
                Some(seeded.version),
                &SaveSignal::new(),
            )
            .await
            .expect("update");
        assert!(saved.version > seeded.version);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_is_returned_once() {
        let store = MemoryRecordStore::new();
        store.fail_next_save(SaveError::transient(Some(503), "maintenance"));

        let first = store.save(&payload(None, "A"), None, &SaveSignal::new()).await;
        let second = store.save(&payload(None, "A"), None, &SaveSignal::new()).await;
        assert!(matches!(first, Err(SaveError::Transient { status: Some(503), .. })));
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn cancelled_signal_short_circuits() {
        let store = MemoryRecordStore::new();
        let signal = SaveSignal::new();
        signal.cancel();
        let result = store.save(&payload(None, "A"), None, &signal).await;
        assert_eq!(result, Err(SaveError::Cancelled));
        assert_eq!(store.save_count(), 0);
    }
}
