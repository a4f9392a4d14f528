use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use carechart_core::records::{
    EditableRecord, PersistenceClient, RecordEdit, RecordId, RecordPayload, RecordSchema,
    RecordVersion, SaveSignal, SavedRecord, ToothCondition, ToothStatus, DENTAL_CHART_FIELD,
};
use carechart_core::sync::{normalize_payload, AttemptPhase, SaveError, SaveErrorKind};
use carechart_storage_memory::MemoryRecordStore;
use serde_json::json;

use super::*;
use crate::conflict::{AuthorizationLevel, ManualResolution, ResolutionOutcome};
use crate::error::{ResolveError, SaveFailure};
use crate::events::{SaveEvent, SaveEventSink};

const SETTLE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Dispatch {
    at: Instant,
    payload: RecordPayload,
}

/// Wraps the memory store. Writes run detached, so a dropped request still
/// reaches the store the way a request already on the wire would.
struct ScriptedClient {
    store: Arc<MemoryRecordStore>,
    delays: Mutex<VecDeque<Duration>>,
    dispatched: Mutex<Vec<Dispatch>>,
}

impl ScriptedClient {
    fn new(store: Arc<MemoryRecordStore>) -> Self {
        Self {
            store,
            delays: Mutex::new(VecDeque::new()),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    fn with_delays(self, delays: &[u64]) -> Self {
        *self.delays.lock().unwrap() = delays.iter().map(|ms| Duration::from_millis(*ms)).collect();
        self
    }

    fn dispatched(&self) -> Vec<Dispatch> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceClient for ScriptedClient {
    async fn save(
        &self,
        payload: &RecordPayload,
        expected_version: Option<RecordVersion>,
        _signal: &SaveSignal,
    ) -> Result<SavedRecord, SaveError> {
        self.dispatched.lock().unwrap().push(Dispatch {
            at: Instant::now(),
            payload: payload.clone(),
        });
        let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
        let store = Arc::clone(&self.store);
        let payload = payload.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            store
                .save(&payload, expected_version, &SaveSignal::new())
                .await
        })
        .await
        .unwrap_or_else(|err| Err(SaveError::unknown(err.to_string())))
    }

    async fn fetch(&self, id: &RecordId) -> Result<SavedRecord, SaveError> {
        self.store.fetch(id).await
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SaveEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<SaveEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SaveEventSink for RecordingSink {
    fn emit(&self, event: SaveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn schema() -> Arc<RecordSchema> {
    Arc::new(RecordSchema::patient_chart())
}

fn seed_chart(store: &MemoryRecordStore) -> SavedRecord {
    let mut record = EditableRecord::new();
    record.apply_edit(RecordEdit::set("first_name", "Ivana"));
    record.apply_edit(RecordEdit::set("last_name", "Horvat"));
    record.apply_edit(RecordEdit::set("phone", "555-0100"));
    store.seed(normalize_payload(&RecordSchema::patient_chart(), &record))
}

fn editor(client: Arc<dyn PersistenceClient>, saved: Option<&SavedRecord>) -> SaveOrchestrator {
    let builder = SaveOrchestrator::builder(schema(), client);
    match saved {
        Some(saved) => builder.hydrate_from(saved).expect("hydrate").build(),
        None => builder.build(),
    }
}

fn name_new_patient(orchestrator: &SaveOrchestrator) {
    orchestrator.on_field_change(RecordEdit::set("first_name", "Luka"));
    orchestrator.on_field_change(RecordEdit::set("last_name", "Babić"));
}

#[tokio::test(start_paused = true)]
async fn burst_of_edits_saves_once_after_quiet_period() {
    let store = Arc::new(MemoryRecordStore::new());
    let orchestrator = editor(store.clone(), None);
    let status_rx = orchestrator.subscribe();

    orchestrator.on_field_change(RecordEdit::set("first_name", "Luka"));
    sleep(Duration::from_millis(300)).await;
    orchestrator.on_field_change(RecordEdit::set("last_name", "Babić"));
    sleep(Duration::from_millis(300)).await;
    orchestrator.on_field_change(RecordEdit::set("phone", "555-0101"));
    assert_eq!(status_rx.borrow().auto_phase, AttemptPhase::Debouncing);
    assert!(status_rx.borrow().has_unsaved_changes);

    sleep(orchestrator.config().debounce - Duration::from_millis(1)).await;
    assert_eq!(store.save_count(), 0);

    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 1);
    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::Applied);
    assert!(!status.has_unsaved_changes);
    let id = status.record_id.clone().expect("identity assigned");
    assert_eq!(
        store.get(&id).expect("stored").payload.get("phone"),
        Some(&json!("555-0101"))
    );
    assert_eq!(*status_rx.borrow(), status);
}

#[tokio::test(start_paused = true)]
async fn first_save_announces_record_identity_once() {
    let store = Arc::new(MemoryRecordStore::new());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = SaveOrchestrator::builder(schema(), store.clone())
        .event_sink(sink.clone())
        .build();

    name_new_patient(&orchestrator);
    sleep(SETTLE).await;
    orchestrator.on_field_change(RecordEdit::set("phone", "555-0101"));
    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 2);

    let events = sink.events();
    let identified: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            SaveEvent::RecordIdentified { record_id } => Some(record_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(identified.len(), 1);
    assert_eq!(Some(&identified[0]), orchestrator.status().record_id.as_ref());

    let calls = store.save_calls();
    assert_eq!(calls[0].expected_version, None);
    assert_eq!(calls[1].payload.id.as_ref(), Some(&identified[0]));
    assert!(calls[1].expected_version.is_some());
}

#[tokio::test(start_paused = true)]
async fn edit_reverted_within_window_is_suppressed() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::set("phone", "555-0199"));
    sleep(Duration::from_millis(200)).await;
    orchestrator.on_field_change(RecordEdit::set("phone", " 555-0100 "));
    sleep(SETTLE).await;

    assert_eq!(store.save_count(), 0);
    assert_eq!(orchestrator.status().auto_phase, AttemptPhase::Suppressed);
}

#[tokio::test(start_paused = true)]
async fn toggling_back_to_last_auto_saved_state_is_suppressed() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::set("has_allergies", true));
    orchestrator.on_field_change(RecordEdit::set("allergy_details", "penicillin"));
    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 1);

    orchestrator.on_field_change(RecordEdit::set("has_allergies", false));
    orchestrator.on_field_change(RecordEdit::set("has_allergies", true));
    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn chart_edit_reverted_after_manual_save_is_auto_saved() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::SetTooth {
        tooth: 11,
        status: ToothStatus::new(ToothCondition::Crown),
    });
    let outcome = orchestrator.on_explicit_save().await.expect("manual save");
    assert!(matches!(outcome, ManualSaveOutcome::Saved(_)));
    assert_eq!(store.save_count(), 1);

    orchestrator.on_field_change(RecordEdit::ClearTooth { tooth: 11 });
    assert!(orchestrator.has_unsaved_changes());
    sleep(SETTLE).await;

    assert_eq!(store.save_count(), 2);
    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::Applied);
    assert!(!status.has_unsaved_changes);
    let stored = store.get(&saved.id).expect("stored");
    assert_eq!(
        stored.payload.get(DENTAL_CHART_FIELD),
        saved.payload.get(DENTAL_CHART_FIELD)
    );
}

#[tokio::test(start_paused = true)]
async fn manual_save_cancels_in_flight_automatic_save() {
    let store = Arc::new(MemoryRecordStore::new().with_latency(Duration::from_secs(1)));
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::set("phone", "555-0111"));
    sleep(orchestrator.config().debounce + Duration::from_millis(100)).await;
    assert_eq!(orchestrator.status().auto_phase, AttemptPhase::InFlight);

    orchestrator.on_field_change(RecordEdit::set("email", "ivana@example.com"));
    let outcome = orchestrator.on_explicit_save().await.expect("manual save");
    let ManualSaveOutcome::Saved(stored) = outcome else {
        panic!("expected saved outcome, got {:?}", outcome);
    };

    sleep(SETTLE).await;
    // The automatic request never reached the store.
    assert_eq!(store.save_count(), 1);
    assert_eq!(stored.payload.get("email"), Some(&json!("ivana@example.com")));
    let status = orchestrator.status();
    assert_eq!(status.manual_phase, AttemptPhase::Applied);
    assert_eq!(status.auto_phase, AttemptPhase::Idle);
    assert_eq!(status.version, Some(stored.version));
    assert!(!status.has_unsaved_changes);
}

#[tokio::test(start_paused = true)]
async fn slow_superseded_response_never_lands() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let client = Arc::new(ScriptedClient::new(store.clone()).with_delays(&[2_000, 0]));
    let orchestrator = editor(client.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::set("last_name", "Horvat-Kos"));
    sleep(Duration::from_millis(1_000)).await;
    orchestrator.on_field_change(RecordEdit::set("last_name", "Kos"));
    sleep(SETTLE).await;

    assert_eq!(client.dispatched().len(), 2);
    let stored = store.get(&saved.id).expect("stored");
    assert_eq!(stored.payload.get("last_name"), Some(&json!("Kos")));

    // The first write reached the store late and was rejected there; its
    // response belonged to a superseded attempt.
    let status = orchestrator.status();
    assert_eq!(status.version, Some(stored.version));
    assert!(status.auto_conflict.is_none());
    assert_eq!(status.auto_phase, AttemptPhase::Applied);
}

#[tokio::test(start_paused = true)]
async fn manual_retries_are_bounded_with_growing_backoff() {
    let store = Arc::new(MemoryRecordStore::new());
    let client = Arc::new(ScriptedClient::new(store.clone()));
    let orchestrator = editor(client.clone(), None);
    name_new_patient(&orchestrator);
    for _ in 0..6 {
        store.fail_next_save(SaveError::transient(Some(503), "maintenance"));
    }

    let failure = orchestrator.on_explicit_save().await.unwrap_err();
    assert!(matches!(failure, SaveFailure::Unexpected { .. }));
    assert!(failure.to_string().contains("after 4 attempts"));

    let dispatched = client.dispatched();
    assert_eq!(dispatched.len(), 4);
    let gaps: Vec<Duration> = dispatched.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert!(gaps[0] >= orchestrator.config().base_backoff);
    assert!(gaps.windows(2).all(|pair| pair[0] < pair[1]));
    // Retries resend the original payload.
    assert!(dispatched.iter().all(|d| d.payload == dispatched[0].payload));

    let status = orchestrator.status();
    assert_eq!(status.manual_phase, AttemptPhase::FatalRaised);
    assert!(status.has_unsaved_changes);
}

#[tokio::test(start_paused = true)]
async fn manual_retry_keeps_submitted_payload_while_user_types() {
    let store = Arc::new(MemoryRecordStore::new());
    let client = Arc::new(ScriptedClient::new(store.clone()));
    let orchestrator = editor(client.clone(), None);
    name_new_patient(&orchestrator);
    store.fail_next_save(SaveError::transient(None, "connection reset"));

    let save = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.on_explicit_save().await }
    });
    sleep(Duration::from_millis(100)).await;
    orchestrator.on_field_change(RecordEdit::set("phone", "555-0123"));

    let outcome = save.await.expect("join").expect("manual save");
    assert!(matches!(outcome, ManualSaveOutcome::Saved(_)));
    let dispatched = client.dispatched();
    assert_eq!(dispatched[0].payload, dispatched[1].payload);
    assert_eq!(dispatched[1].payload.get("phone"), Some(&serde_json::Value::Null));

    // The edit made meanwhile is picked up by the automatic path afterwards.
    sleep(SETTLE).await;
    assert_eq!(client.dispatched().len(), 3);
    assert!(!orchestrator.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn automatic_failures_stay_silent_and_leave_record_dirty() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let client = Arc::new(ScriptedClient::new(store.clone()));
    let orchestrator = editor(client.clone(), Some(&saved));
    for _ in 0..4 {
        store.fail_next_save(SaveError::transient(Some(502), "bad gateway"));
    }

    orchestrator.on_field_change(RecordEdit::set("notes", "prefers mornings"));
    sleep(SETTLE).await;

    assert_eq!(client.dispatched().len(), 4);
    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::FatalRaised);
    assert!(status.has_unsaved_changes);
    assert!(status.last_auto_error.is_some());
    assert!(status.manual_conflict.is_none());

    let outcome = orchestrator.on_explicit_save().await.expect("manual save");
    assert!(matches!(outcome, ManualSaveOutcome::Saved(_)));
    assert!(!orchestrator.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn transient_automatic_failure_recovers_on_retry() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));
    store.fail_next_save(SaveError::transient(Some(429), "slow down"));

    orchestrator.on_field_change(RecordEdit::set("email", "ivana@example.com"));
    sleep(SETTLE).await;

    assert_eq!(store.save_count(), 2);
    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::Applied);
    assert!(status.last_auto_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_validation_failure_skips_the_store() {
    let store = Arc::new(MemoryRecordStore::new());
    let orchestrator = editor(store.clone(), None);
    orchestrator.on_field_change(RecordEdit::set("first_name", "Luka"));
    orchestrator.on_field_change(RecordEdit::set("birth_date", "31.02.1990"));

    let failure = orchestrator.on_explicit_save().await.unwrap_err();
    let fields: Vec<&str> = failure
        .field_errors()
        .iter()
        .map(|e| e.field.as_str())
        .collect();
    assert!(fields.contains(&"last_name"));
    assert_eq!(store.save_count(), 0);
    assert_eq!(orchestrator.status().manual_phase, AttemptPhase::FatalRaised);
}

#[tokio::test(start_paused = true)]
async fn automatic_validation_failure_reaches_event_sink() {
    let store = Arc::new(MemoryRecordStore::new());
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = SaveOrchestrator::builder(schema(), store.clone())
        .event_sink(sink.clone())
        .build();

    orchestrator.on_field_change(RecordEdit::set("first_name", "Luka"));
    sleep(SETTLE).await;

    assert_eq!(store.save_count(), 0);
    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::FatalRaised);
    assert!(status.last_auto_error.is_some());
    assert!(sink.events().iter().any(|event| matches!(
        event,
        SaveEvent::SaveFailed {
            source: SaveSource::Auto,
            kind: SaveErrorKind::Validation,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn automatic_conflict_is_a_dismissible_notice() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));
    store
        .write_external(&saved.id, |p| {
            p.fields.insert("last_name".to_string(), json!("Horvat-Kos"));
        })
        .expect("external write");

    orchestrator.on_field_change(RecordEdit::set("phone", "555-0199"));
    sleep(SETTLE).await;

    let status = orchestrator.status();
    assert_eq!(status.auto_phase, AttemptPhase::ConflictRaised);
    assert!(status.manual_conflict.is_none());
    let notice = status.auto_conflict.expect("notice");
    assert_eq!(notice.conflict.client_version, Some(saved.version));
    assert!(notice.conflicting_fields.contains_key("phone"));
    assert_eq!(
        orchestrator.working_record().field("phone"),
        Some(&json!("555-0199"))
    );

    let resolver = orchestrator.conflict_resolver();
    assert!(matches!(resolver.pending().as_slice(), [PendingConflict::Auto(_)]));
    assert!(resolver.dismiss_auto_notice());
    assert!(!resolver.dismiss_auto_notice());
    assert!(resolver.pending().is_empty());
    assert!(orchestrator.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn reload_after_automatic_conflict_keeps_later_edits() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));
    store
        .write_external(&saved.id, |p| {
            p.fields.insert("last_name".to_string(), json!("Horvat-Kos"));
        })
        .expect("external write");

    orchestrator.on_field_change(RecordEdit::set("last_name", "Horvath"));
    sleep(SETTLE).await;
    assert!(orchestrator.status().auto_conflict.is_some());

    // Later edits wait while the notice is open.
    orchestrator.on_field_change(RecordEdit::set("email", "ivana@example.com"));
    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 1);

    let resolver = orchestrator.conflict_resolver();
    resolver
        .reload_after_auto_conflict()
        .await
        .expect("reload");
    let working = orchestrator.working_record();
    assert_eq!(working.field("last_name"), Some(&json!("Horvat-Kos")));
    assert_eq!(working.field("email"), Some(&json!("ivana@example.com")));

    sleep(SETTLE).await;
    let stored = store.get(&saved.id).expect("stored");
    assert_eq!(stored.payload.get("email"), Some(&json!("ivana@example.com")));
    assert_eq!(stored.payload.get("last_name"), Some(&json!("Horvat-Kos")));
    assert!(!orchestrator.has_unsaved_changes());
    assert_eq!(
        resolver.reload_after_auto_conflict().await,
        Err(ResolveError::NoConflict)
    );
}

async fn manual_conflict_fixture() -> (Arc<MemoryRecordStore>, SavedRecord, SaveOrchestrator) {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));
    store
        .write_external(&saved.id, |p| {
            p.fields.insert("phone".to_string(), json!("555-0777"));
        })
        .expect("external write");
    orchestrator.on_field_change(RecordEdit::set("last_name", "Horvat-Kos"));
    (store, saved, orchestrator)
}

#[tokio::test(start_paused = true)]
async fn manual_conflict_blocks_without_touching_local_edits() {
    let (store, saved, orchestrator) = manual_conflict_fixture().await;

    let outcome = orchestrator.on_explicit_save().await.expect("manual save");
    let ManualSaveOutcome::Conflict(pending) = outcome else {
        panic!("expected conflict, got {:?}", outcome);
    };
    assert_eq!(pending.conflict.client_version, Some(saved.version));
    assert_eq!(
        Some(pending.conflict.server_version),
        store.get(&saved.id).map(|r| r.version)
    );
    assert_eq!(
        orchestrator.working_record().field("last_name"),
        Some(&json!("Horvat-Kos"))
    );
    assert_eq!(orchestrator.status().manual_phase, AttemptPhase::ConflictRaised);

    // Another save attempt returns the open conflict instead of hitting the store.
    let again = orchestrator.on_explicit_save().await.expect("manual save");
    assert_eq!(again, ManualSaveOutcome::Conflict(pending));
    orchestrator.on_field_change(RecordEdit::set("notes", "call back"));
    sleep(SETTLE).await;
    assert_eq!(store.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_reload_discards_local_edits() {
    let (store, saved, orchestrator) = manual_conflict_fixture().await;
    orchestrator.on_explicit_save().await.expect("manual save");

    let resolver = orchestrator.conflict_resolver();
    let outcome = resolver
        .resolve_manual_conflict(ManualResolution::Reload, AuthorizationLevel::Standard)
        .await
        .expect("reload");
    let ResolutionOutcome::Reloaded(stored) = outcome else {
        panic!("expected reload, got {:?}", outcome);
    };

    assert_eq!(Some(stored.clone()), store.get(&saved.id));
    let working = orchestrator.working_record();
    assert_eq!(working.field("last_name"), Some(&json!("Horvat")));
    assert_eq!(working.field("phone"), Some(&json!("555-0777")));
    assert!(!orchestrator.has_unsaved_changes());
    assert!(resolver.pending().is_empty());
    assert_eq!(orchestrator.status().version, Some(stored.version));
}

#[tokio::test(start_paused = true)]
async fn force_overwrite_requires_elevated_authorization() {
    let (store, saved, orchestrator) = manual_conflict_fixture().await;
    orchestrator.on_explicit_save().await.expect("manual save");
    let resolver = orchestrator.conflict_resolver();

    let refused = resolver
        .resolve_manual_conflict(ManualResolution::ForceOverwrite, AuthorizationLevel::Standard)
        .await;
    assert_eq!(refused, Err(ResolveError::NotAuthorized));
    assert!(matches!(resolver.pending().as_slice(), [PendingConflict::Manual(_)]));

    let outcome = resolver
        .resolve_manual_conflict(ManualResolution::ForceOverwrite, AuthorizationLevel::Elevated)
        .await
        .expect("overwrite");
    let ResolutionOutcome::Overwritten(stored) = outcome else {
        panic!("expected overwrite, got {:?}", outcome);
    };
    assert_eq!(stored.payload.get("last_name"), Some(&json!("Horvat-Kos")));
    assert_eq!(store.get(&saved.id), Some(stored));
    assert!(resolver.pending().is_empty());
    assert!(!orchestrator.has_unsaved_changes());

    assert_eq!(
        resolver
            .resolve_manual_conflict(ManualResolution::Reload, AuthorizationLevel::Elevated)
            .await,
        Err(ResolveError::NoConflict)
    );
}

#[tokio::test(start_paused = true)]
async fn ended_session_ignores_edits_and_pending_timers() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));

    orchestrator.on_field_change(RecordEdit::set("phone", "555-0199"));
    orchestrator.end_session();
    assert!(!orchestrator.on_field_change(RecordEdit::set("phone", "555-0200")));
    sleep(SETTLE).await;

    assert_eq!(store.save_count(), 0);
    assert!(orchestrator.status().session_ended);
    assert!(orchestrator.on_explicit_save().await.is_err());
}

#[tokio::test]
async fn stale_successful_response_leaves_state_untouched() {
    let store = Arc::new(MemoryRecordStore::new());
    let saved = seed_chart(&store);
    let orchestrator = editor(store.clone(), Some(&saved));
    let schema = schema();

    let mut sent = orchestrator.working_record();
    sent.apply_edit(RecordEdit::set("phone", "555-0177"));
    let payload = normalize_payload(&schema, &sent);
    let late = store
        .save(&payload, Some(saved.version), &SaveSignal::new())
        .await
        .expect("store accepts the write");

    let mut state = orchestrator.lock();
    let stale = state.next_sequence();
    state.next_sequence();
    let working = state.working.clone();
    let synced = state.synced.clone();
    let last_saved = state.last_saved.clone();
    let events = state.pending_events.len();

    let dispatch = AutoDispatch {
        attempt: SaveAttempt {
            sequence: stale,
            source: SaveSource::Auto,
            payload: payload.clone(),
            expected_version: Some(saved.version),
        },
        record: sent.clone(),
        conflicting_fields: BTreeMap::new(),
    };
    let retry = orchestrator.settle_auto(
        &mut state,
        &dispatch,
        Ok(late.clone()),
        0,
        &SaveSignal::new(),
    );
    assert!(retry.is_none());

    let step = orchestrator.settle_manual(
        &mut state,
        stale,
        &payload,
        &sent,
        Ok(late),
        0,
        &SaveSignal::new(),
    );
    assert!(matches!(
        step,
        ManualStep::Done(Ok(ManualSaveOutcome::Superseded))
    ));

    assert_eq!(state.working, working);
    assert_eq!(state.synced, synced);
    assert_eq!(state.working.version, Some(saved.version));
    assert_eq!(state.last_saved, last_saved);
    assert_eq!(state.pending_events.len(), events);
}
