//! Save orchestration for one open patient record.
//!
//! Two write paths share a single global sequence counter: the automatic path
//! saves after a quiet period following edits, the manual path saves on an
//! explicit request and always takes precedence. A response is applied only
//! when its sequence number is still the latest one issued.
//!
//! State lives behind a synchronous mutex that is never held across an
//! `.await`; status snapshots are published through a `watch` channel and
//! lifecycle events are delivered to a [`SaveEventSink`] after the lock is
//! released.

mod state;

#[cfg(test)]
mod tests;

pub(crate) use state::EditorState;
pub use state::{AutoConflictNotice, EditorStatus, ManualConflict, PendingConflict, SaveAttempt};

use futures::future::Abortable;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use carechart_core::records::{
    EditableRecord, PersistenceClient, RecordEdit, RecordPayload, RecordSchema, RecordVersion,
    SaveSignal, SavedRecord,
};
use carechart_core::sync::{
    change_snapshot, classify_save_error, clean_snapshot, dirty_fields, has_unsaved_changes,
    normalize_payload, validate_payload, AttemptPhase, RetryDecision, SaveError, SaveSource,
};

use crate::config::SaveConfig;
use crate::conflict::{merge_after_auto_conflict, ConflictResolver};
use crate::error::{ResolveError, SaveFailure};
use crate::events::{NoOpSaveEventSink, SaveEvent, SaveEventSink};

/// Result of an explicit save that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualSaveOutcome {
    Saved(SavedRecord),
    /// The store holds a newer version; the user must choose how to resolve it.
    Conflict(ManualConflict),
    /// A later save took over before this one completed.
    Superseded,
}

pub(crate) enum ReloadMode {
    /// Replace the working copy with the stored record.
    DiscardAll,
    /// Drop only the edits a rejected automatic save carried.
    KeepUnrelatedEdits,
}

struct AutoDispatch {
    attempt: SaveAttempt,
    record: EditableRecord,
    conflicting_fields: BTreeMap<String, Value>,
}

enum ManualStep {
    Done(Result<ManualSaveOutcome, SaveFailure>),
    RetryAfter(Duration),
}

struct Inner {
    schema: Arc<RecordSchema>,
    client: Arc<dyn PersistenceClient>,
    config: SaveConfig,
    event_sink: Arc<dyn SaveEventSink>,
    state: Mutex<EditorState>,
    status_tx: watch::Sender<EditorStatus>,
}

/// Builder for [`SaveOrchestrator`].
pub struct SaveOrchestratorBuilder {
    schema: Arc<RecordSchema>,
    client: Arc<dyn PersistenceClient>,
    config: SaveConfig,
    event_sink: Arc<dyn SaveEventSink>,
    record: EditableRecord,
}

impl SaveOrchestratorBuilder {
    pub fn config(mut self, config: SaveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_sink(mut self, event_sink: Arc<dyn SaveEventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Start from a stored record instead of an empty, never-saved one.
    pub fn hydrate_from(mut self, saved: &SavedRecord) -> carechart_core::Result<Self> {
        self.record = EditableRecord::from_saved(saved)?;
        Ok(self)
    }

    pub fn build(self) -> SaveOrchestrator {
        let state = EditorState::new(&self.schema, self.record);
        let (status_tx, _) = watch::channel(state.status(&self.schema));
        SaveOrchestrator {
            inner: Arc::new(Inner {
                schema: self.schema,
                client: self.client,
                config: self.config,
                event_sink: self.event_sink,
                state: Mutex::new(state),
                status_tx,
            }),
        }
    }
}

/// Coordinates automatic and manual saves of a single record.
#[derive(Clone)]
pub struct SaveOrchestrator {
    inner: Arc<Inner>,
}

impl SaveOrchestrator {
    pub fn builder(
        schema: Arc<RecordSchema>,
        client: Arc<dyn PersistenceClient>,
    ) -> SaveOrchestratorBuilder {
        SaveOrchestratorBuilder {
            schema,
            client,
            config: SaveConfig::default(),
            event_sink: Arc::new(NoOpSaveEventSink),
            record: EditableRecord::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Releases the lock, then publishes status and queued events.
    fn commit(&self, mut state: MutexGuard<'_, EditorState>) {
        let status = state.status(&self.inner.schema);
        let events = std::mem::take(&mut state.pending_events);
        drop(state);

        self.inner.status_tx.send_replace(status);
        for event in events {
            self.inner.event_sink.emit(event);
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &SaveConfig {
        &self.inner.config
    }

    pub fn status(&self) -> EditorStatus {
        self.lock().status(&self.inner.schema)
    }

    /// Receives a new [`EditorStatus`] after every state transition.
    pub fn subscribe(&self) -> watch::Receiver<EditorStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn working_record(&self) -> EditableRecord {
        self.lock().working.clone()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        let state = self.lock();
        has_unsaved_changes(&self.inner.schema, &state.working, &state.synced)
    }

    pub fn conflict_resolver(&self) -> ConflictResolver {
        ConflictResolver::new(self.clone())
    }

    /// Applies a user edit to the working copy and restarts the debounce.
    ///
    /// Returns `false` when the edit was ignored (session ended or an invalid
    /// plan index). Must be called from within a tokio runtime for the
    /// automatic save to be scheduled.
    pub fn on_field_change(&self, edit: RecordEdit) -> bool {
        let mut state = self.lock();
        if state.closed {
            debug!("[RecordSave] Ignoring edit after the session ended");
            return false;
        }
        if !state.working.apply_edit(edit) {
            debug!("[RecordSave] Ignoring edit for a missing treatment plan entry");
            return false;
        }
        self.arm_debounce(&mut state);
        self.commit(state);
        true
    }

    fn arm_debounce(&self, state: &mut EditorState) {
        state.cancel_debounce();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[RecordSave] No async runtime available, automatic save not scheduled");
            return;
        };

        state.debounce_generation += 1;
        let generation = state.debounce_generation;
        let delay = self.inner.config.debounce;
        let this = self.clone();
        state.debounce = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_debounce_elapsed(generation).await;
        }));
        state.auto_phase = AttemptPhase::Debouncing;
    }

    async fn on_debounce_elapsed(&self, generation: u64) {
        let (run_id, signal, registration) = {
            let mut state = self.lock();
            if state.closed || state.debounce_generation != generation {
                return;
            }
            // This task now carries the run; later edits arm a fresh timer
            // instead of aborting it.
            state.debounce = None;
            state.cancel_auto();
            let (run, registration) = state.new_run();
            let run_id = run.run_id();
            let signal = run.signal().clone();
            state.auto_run = Some(run);
            (run_id, signal, registration)
        };

        if Abortable::new(self.run_auto(run_id, signal), registration)
            .await
            .is_err()
        {
            debug!("[RecordSave] Automatic save run {} cancelled", run_id);
        }
    }

    async fn run_auto(&self, run_id: u64, signal: SaveSignal) {
        let mut retry = 0;
        loop {
            let dispatch = {
                let mut state = self.lock();
                let dispatch = self.prepare_auto(&mut state, &signal);
                if dispatch.is_none() {
                    state.finish_auto_run(run_id);
                }
                self.commit(state);
                dispatch
            };
            let Some(dispatch) = dispatch else {
                return;
            };

            let result = self
                .inner
                .client
                .save(
                    &dispatch.attempt.payload,
                    dispatch.attempt.expected_version,
                    &signal,
                )
                .await;

            let retry_after = {
                let mut state = self.lock();
                let retry_after = self.settle_auto(&mut state, &dispatch, result, retry, &signal);
                if retry_after.is_none() {
                    state.finish_auto_run(run_id);
                }
                self.commit(state);
                retry_after
            };
            match retry_after {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                None => return,
            }
        }
    }

    /// Builds the next automatic attempt from the current working copy, or
    /// records why none is needed.
    fn prepare_auto(&self, state: &mut EditorState, signal: &SaveSignal) -> Option<AutoDispatch> {
        let schema = &*self.inner.schema;
        if state.closed || signal.is_cancelled() {
            return None;
        }
        if state.auto_blocked() {
            debug!("[RecordSave] Automatic save deferred behind a manual save or open conflict");
            state.auto_deferred = true;
            state.settle_auto_phase(AttemptPhase::Idle);
            return None;
        }
        state.auto_deferred = false;

        let snapshot = change_snapshot(schema, &state.working, &state.synced);
        if !has_unsaved_changes(schema, &state.working, &state.synced) || snapshot == state.last_saved
        {
            debug!(
                "[RecordSave] Automatic save suppressed, snapshot {} already saved",
                snapshot.digest()
            );
            state.settle_auto_phase(AttemptPhase::Suppressed);
            return None;
        }

        let payload = normalize_payload(schema, &state.working);
        if let Err(err) = validate_payload(schema, &payload) {
            debug!("[RecordSave] Automatic save skipped: {}", err.user_message());
            state.last_auto_error = Some(err.user_message());
            state.pending_events.push(SaveEvent::save_failed(
                SaveSource::Auto,
                err.kind(),
                err.user_message(),
            ));
            state.settle_auto_phase(AttemptPhase::FatalRaised);
            return None;
        }

        let attempt = SaveAttempt {
            sequence: state.next_sequence(),
            source: SaveSource::Auto,
            payload,
            expected_version: state.working.version,
        };
        debug!(
            "[RecordSave] Dispatching automatic save #{} for {}",
            attempt.sequence,
            attempt.payload.id.as_deref().unwrap_or("<new record>")
        );
        state.auto_phase = AttemptPhase::InFlight;
        Some(AutoDispatch {
            conflicting_fields: dirty_fields(schema, &state.working, &state.synced),
            record: state.working.clone(),
            attempt,
        })
    }

    /// Applies an automatic response. Returns the backoff when a retry is due.
    fn settle_auto(
        &self,
        state: &mut EditorState,
        dispatch: &AutoDispatch,
        result: Result<SavedRecord, SaveError>,
        retry: u32,
        signal: &SaveSignal,
    ) -> Option<Duration> {
        let sequence = dispatch.attempt.sequence;
        if signal.is_cancelled() || !state.is_latest(sequence) {
            debug!("[RecordSave] Discarding stale automatic response #{}", sequence);
            return None;
        }

        let err = match result {
            Ok(saved) => {
                self.apply_success(state, SaveSource::Auto, &dispatch.record, &saved);
                return None;
            }
            Err(err) => err,
        };

        match (classify_save_error(&err), err) {
            (RetryDecision::Discard, _) => None,
            (RetryDecision::RouteToConflict, SaveError::Conflict(conflict)) => {
                warn!(
                    "[RecordSave] Automatic save #{} conflicted: server={} client={:?} correlation={}",
                    sequence, conflict.server_version, conflict.client_version, conflict.correlation_id
                );
                state.pending_events.push(SaveEvent::ConflictRaised {
                    source: SaveSource::Auto,
                    conflict: conflict.clone(),
                });
                state.auto_conflict = Some(AutoConflictNotice {
                    conflict,
                    conflicting_fields: dispatch.conflicting_fields.clone(),
                    attempted: dispatch.record.clone(),
                });
                state.settle_auto_phase(AttemptPhase::ConflictRaised);
                None
            }
            (RetryDecision::Retry, err) if retry < self.inner.config.max_retries => {
                let delay = self.inner.config.backoff_for(retry);
                debug!(
                    "[RecordSave] Automatic save #{} failed ({}), retry {} in {:?}",
                    sequence,
                    err,
                    retry + 1,
                    delay
                );
                state.auto_phase = AttemptPhase::RetryScheduled { attempt: retry + 1 };
                Some(delay)
            }
            (_, err) => {
                // Automatic failures never interrupt the user; the record stays dirty.
                warn!("[RecordSave] Automatic save #{} dropped: {}", sequence, err);
                state.last_auto_error = Some(err.user_message());
                state.pending_events.push(SaveEvent::save_failed(
                    SaveSource::Auto,
                    err.kind(),
                    err.user_message(),
                ));
                state.settle_auto_phase(AttemptPhase::FatalRaised);
                None
            }
        }
    }

    fn apply_success(
        &self,
        state: &mut EditorState,
        source: SaveSource,
        sent: &EditableRecord,
        saved: &SavedRecord,
    ) {
        let first_save = state.working.id.is_none();
        let synced = EditableRecord::from_saved(saved).unwrap_or_else(|err| {
            warn!(
                "[RecordSave] Stored record {} could not be hydrated ({}), keeping the sent copy",
                saved.id, err
            );
            let mut fallback = sent.clone();
            fallback.id = Some(saved.id.clone());
            fallback.version = Some(saved.version);
            fallback
        });

        state.working.id = Some(saved.id.clone());
        state.working.version = Some(saved.version);
        state.synced = synced;
        state.last_saved = clean_snapshot(&self.inner.schema, &state.synced);

        match source {
            SaveSource::Auto => {
                state.last_auto_error = None;
                state.settle_auto_phase(AttemptPhase::Applied);
            }
            SaveSource::Manual => {
                // The user's explicit save supersedes any older automatic notice.
                state.auto_conflict = None;
                state.manual_phase = AttemptPhase::Applied;
            }
        }

        info!(
            "[RecordSave] {} save applied to {} (version {})",
            source, saved.id, saved.version
        );
        state
            .pending_events
            .push(SaveEvent::saved(source, saved.id.clone(), saved.version));
        if first_save {
            info!("[RecordSave] New record identified as {}", saved.id);
            state
                .pending_events
                .push(SaveEvent::record_identified(saved.id.clone()));
        }
    }

    /// Saves the working copy now, cancelling any pending or running
    /// automatic save.
    ///
    /// Validation failures and failures that exhausted their retries reject
    /// with a [`SaveFailure`]; a version mismatch resolves to
    /// [`ManualSaveOutcome::Conflict`]. While a manual conflict is pending
    /// the same conflict is returned without contacting the store.
    pub async fn on_explicit_save(&self) -> Result<ManualSaveOutcome, SaveFailure> {
        self.run_manual(None).await
    }

    pub(crate) async fn run_manual(
        &self,
        expected_override: Option<RecordVersion>,
    ) -> Result<ManualSaveOutcome, SaveFailure> {
        let (run_id, sequence, payload, record, signal, registration) = {
            let mut state = self.lock();
            if state.closed {
                return Err(SaveFailure::unexpected("The editing session has ended"));
            }
            if expected_override.is_none() {
                if let Some(pending) = state.manual_conflict.clone() {
                    debug!("[RecordSave] Manual save blocked by an unresolved conflict");
                    return Ok(ManualSaveOutcome::Conflict(pending));
                }
            }

            state.cancel_debounce();
            state.cancel_auto();
            state.cancel_manual();

            let schema = &*self.inner.schema;
            let payload = normalize_payload(schema, &state.working);
            if let Err(err) = validate_payload(schema, &payload) {
                info!("[RecordSave] Manual save rejected: {}", err.user_message());
                state.manual_phase = AttemptPhase::FatalRaised;
                state.pending_events.push(SaveEvent::save_failed(
                    SaveSource::Manual,
                    err.kind(),
                    err.user_message(),
                ));
                self.commit(state);
                return Err(SaveFailure::from(err));
            }

            let (run, registration) = state.new_run();
            let run_id = run.run_id();
            let signal = run.signal().clone();
            state.manual_run = Some(run);
            let sequence = state.next_sequence();
            state.manual_phase = AttemptPhase::InFlight;
            let record = state.working.clone();
            self.commit(state);
            (run_id, sequence, payload, record, signal, registration)
        };

        let attempts = self.manual_attempts(
            sequence,
            payload,
            record,
            expected_override,
            signal,
        );
        let outcome = Abortable::new(attempts, registration)
            .await
            .unwrap_or(Ok(ManualSaveOutcome::Superseded));

        self.finish_manual(run_id);
        outcome
    }

    async fn manual_attempts(
        &self,
        mut sequence: u64,
        payload: RecordPayload,
        record: EditableRecord,
        expected_override: Option<RecordVersion>,
        signal: SaveSignal,
    ) -> Result<ManualSaveOutcome, SaveFailure> {
        let mut retry = 0;
        loop {
            let expected_version = {
                let mut state = self.lock();
                if retry > 0 {
                    sequence = state.next_sequence();
                    state.manual_phase = AttemptPhase::InFlight;
                }
                let expected = expected_override.or(state.working.version);
                self.commit(state);
                expected
            };
            if signal.is_cancelled() {
                return Ok(ManualSaveOutcome::Superseded);
            }
            debug!(
                "[RecordSave] Dispatching manual save #{} (retry {})",
                sequence, retry
            );

            let result = self
                .inner
                .client
                .save(&payload, expected_version, &signal)
                .await;

            let step = {
                let mut state = self.lock();
                let step =
                    self.settle_manual(&mut state, sequence, &payload, &record, result, retry, &signal);
                self.commit(state);
                step
            };
            match step {
                ManualStep::Done(outcome) => return outcome,
                ManualStep::RetryAfter(delay) => {
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_manual(
        &self,
        state: &mut EditorState,
        sequence: u64,
        payload: &RecordPayload,
        record: &EditableRecord,
        result: Result<SavedRecord, SaveError>,
        retry: u32,
        signal: &SaveSignal,
    ) -> ManualStep {
        if signal.is_cancelled() || !state.is_latest(sequence) {
            debug!("[RecordSave] Discarding stale manual response #{}", sequence);
            return ManualStep::Done(Ok(ManualSaveOutcome::Superseded));
        }

        let err = match result {
            Ok(saved) => {
                self.apply_success(state, SaveSource::Manual, record, &saved);
                return ManualStep::Done(Ok(ManualSaveOutcome::Saved(saved)));
            }
            Err(err) => err,
        };

        match (classify_save_error(&err), err) {
            (RetryDecision::Discard, _) => ManualStep::Done(Ok(ManualSaveOutcome::Superseded)),
            (RetryDecision::RouteToConflict, SaveError::Conflict(conflict)) => {
                warn!(
                    "[RecordSave] Manual save #{} conflicted: server={} client={:?} correlation={}",
                    sequence, conflict.server_version, conflict.client_version, conflict.correlation_id
                );
                state.pending_events.push(SaveEvent::ConflictRaised {
                    source: SaveSource::Manual,
                    conflict: conflict.clone(),
                });
                let pending = ManualConflict {
                    conflict,
                    attempted: payload.clone(),
                };
                state.manual_conflict = Some(pending.clone());
                state.manual_phase = AttemptPhase::ConflictRaised;
                ManualStep::Done(Ok(ManualSaveOutcome::Conflict(pending)))
            }
            (RetryDecision::RejectInvalid, err) => {
                info!("[RecordSave] Manual save #{} rejected: {}", sequence, err);
                ManualStep::Done(Err(self.fail_manual(state, err)))
            }
            (RetryDecision::Retry, err) if retry < self.inner.config.max_retries => {
                let delay = self.inner.config.backoff_for(retry);
                debug!(
                    "[RecordSave] Manual save #{} failed ({}), retry {} in {:?}",
                    sequence,
                    err,
                    retry + 1,
                    delay
                );
                state.manual_phase = AttemptPhase::RetryScheduled { attempt: retry + 1 };
                ManualStep::RetryAfter(delay)
            }
            (RetryDecision::Retry, err) => {
                error!(
                    "[RecordSave] Manual save gave up after {} attempts: {}",
                    retry + 1,
                    err
                );
                let exhausted = SaveError::unknown(format!(
                    "Saving failed after {} attempts: {}",
                    retry + 1,
                    err.user_message()
                ));
                ManualStep::Done(Err(self.fail_manual(state, exhausted)))
            }
            (_, err) => {
                error!("[RecordSave] Manual save #{} failed: {}", sequence, err);
                ManualStep::Done(Err(self.fail_manual(state, err)))
            }
        }
    }

    fn fail_manual(&self, state: &mut EditorState, err: SaveError) -> SaveFailure {
        state.manual_phase = AttemptPhase::FatalRaised;
        state.pending_events.push(SaveEvent::save_failed(
            SaveSource::Manual,
            err.kind(),
            err.user_message(),
        ));
        SaveFailure::from(err)
    }

    /// Clears the manual run and resumes an automatic save that came due
    /// while it was running.
    fn finish_manual(&self, run_id: u64) {
        let mut state = self.lock();
        state.finish_manual_run(run_id);
        self.resume_deferred_auto(&mut state);
        self.commit(state);
    }

    fn resume_deferred_auto(&self, state: &mut EditorState) {
        if !state.auto_deferred || state.closed || state.auto_blocked() {
            return;
        }
        state.auto_deferred = false;
        if has_unsaved_changes(&self.inner.schema, &state.working, &state.synced) {
            self.arm_debounce(state);
        }
    }

    /// Stops all timers and in-flight saves. Later edits and saves are ignored.
    pub fn end_session(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.cancel_debounce();
        state.cancel_auto();
        state.cancel_manual();
        // Responses still in flight must not land after the editor closed.
        state.next_sequence();
        info!(
            "[RecordSave] Editing session for {} ended",
            state.working.id.as_deref().unwrap_or("<new record>")
        );
        self.commit(state);
    }

    pub(crate) fn pending_conflicts(&self) -> Vec<PendingConflict> {
        let state = self.lock();
        let mut pending = Vec::new();
        if let Some(manual) = &state.manual_conflict {
            pending.push(PendingConflict::Manual(manual.clone()));
        }
        if let Some(auto) = &state.auto_conflict {
            pending.push(PendingConflict::Auto(auto.clone()));
        }
        pending
    }

    pub(crate) fn dismiss_auto_conflict(&self) -> bool {
        let mut state = self.lock();
        let Some(notice) = state.auto_conflict.take() else {
            return false;
        };
        debug!(
            "[RecordSave] Automatic conflict {} dismissed",
            notice.conflict.correlation_id
        );
        state.settle_auto_phase(AttemptPhase::Idle);
        self.commit(state);
        true
    }

    pub(crate) fn take_manual_conflict(&self) -> Option<ManualConflict> {
        let mut state = self.lock();
        let pending = state.manual_conflict.take();
        if pending.is_some() {
            state.manual_phase = AttemptPhase::Idle;
        }
        self.commit(state);
        pending
    }

    /// Puts a conflict back when resolving it failed without a newer one.
    pub(crate) fn restore_manual_conflict(&self, pending: ManualConflict) {
        let mut state = self.lock();
        if state.manual_conflict.is_none() && !state.closed {
            state.manual_conflict = Some(pending);
            state.manual_phase = AttemptPhase::ConflictRaised;
        }
        self.commit(state);
    }

    pub(crate) fn has_auto_conflict(&self) -> bool {
        self.lock().auto_conflict.is_some()
    }

    pub(crate) fn has_manual_conflict(&self) -> bool {
        self.lock().manual_conflict.is_some()
    }

    /// Fetches the stored record and rebases the editor on it.
    pub(crate) async fn reload(&self, mode: ReloadMode) -> Result<SavedRecord, ResolveError> {
        let id = {
            let state = self.lock();
            if state.closed {
                return Err(ResolveError::NoConflict);
            }
            state.working.id.clone().ok_or(ResolveError::NotPersisted)?
        };

        let stored = self
            .inner
            .client
            .fetch(&id)
            .await
            .map_err(ResolveError::Reload)?;
        let hydrated = EditableRecord::from_saved(&stored)
            .map_err(|err| ResolveError::Reload(SaveError::unknown(err.to_string())))?;

        let schema = &*self.inner.schema;
        let mut state = self.lock();
        if state.closed {
            return Err(ResolveError::NoConflict);
        }
        // Anything dispatched before the reload is stale from here on.
        state.cancel_auto();
        state.cancel_manual();
        state.next_sequence();

        match mode {
            ReloadMode::DiscardAll => {
                state.cancel_debounce();
                state.working = hydrated.clone();
                state.manual_conflict = None;
                state.auto_conflict = None;
                state.auto_deferred = false;
            }
            ReloadMode::KeepUnrelatedEdits => {
                let notice = state.auto_conflict.take();
                state.working = match &notice {
                    Some(notice) => merge_after_auto_conflict(
                        schema,
                        &state.working,
                        &state.synced,
                        &notice.attempted,
                        &hydrated,
                    ),
                    None => hydrated.clone(),
                };
            }
        }
        state.synced = hydrated;
        state.last_saved = clean_snapshot(schema, &state.synced);
        state.last_auto_error = None;
        state.manual_phase = AttemptPhase::Idle;
        state.settle_auto_phase(AttemptPhase::Idle);

        info!(
            "[RecordSave] Reloaded {} at version {}",
            stored.id, stored.version
        );
        state.pending_events.push(SaveEvent::Reloaded {
            record_id: stored.id.clone(),
            version: stored.version,
        });

        if has_unsaved_changes(schema, &state.working, &state.synced) && state.debounce.is_none() {
            self.arm_debounce(&mut state);
        }
        self.commit(state);
        Ok(stored)
    }
}
