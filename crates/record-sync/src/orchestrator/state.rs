use futures::future::{AbortHandle, AbortRegistration};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;

use carechart_core::records::{
    EditableRecord, RecordId, RecordPayload, RecordSchema, RecordVersion, SaveSignal,
};
use carechart_core::sync::{
    clean_snapshot, has_unsaved_changes, AttemptPhase, ChangeSnapshot, ConflictState, SaveSource,
};

use crate::events::SaveEvent;

/// One dispatch to the persistence client.
#[derive(Debug, Clone)]
pub struct SaveAttempt {
    pub sequence: u64,
    pub source: SaveSource,
    pub payload: RecordPayload,
    pub expected_version: Option<RecordVersion>,
}

/// Cancels a running save both cooperatively and by dropping its future.
#[derive(Debug)]
pub(crate) struct CancelHandle {
    run_id: u64,
    signal: SaveSignal,
    abort: AbortHandle,
}

impl CancelHandle {
    pub(crate) fn new_pair(run_id: u64) -> (Self, AbortRegistration) {
        let (abort, registration) = AbortHandle::new_pair();
        let handle = Self {
            run_id,
            signal: SaveSignal::new(),
            abort,
        };
        (handle, registration)
    }

    pub(crate) fn run_id(&self) -> u64 {
        self.run_id
    }

    pub(crate) fn signal(&self) -> &SaveSignal {
        &self.signal
    }

    pub(crate) fn cancel(&self) {
        self.signal.cancel();
        self.abort.abort();
    }
}

/// Informational notice left by a conflicting automatic save. The working
/// copy is untouched until the user reloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoConflictNotice {
    pub conflict: ConflictState,
    /// Effective values of the fields the rejected attempt tried to change.
    pub conflicting_fields: BTreeMap<String, Value>,
    #[serde(skip)]
    pub(crate) attempted: EditableRecord,
}

/// Blocking conflict raised by an explicit save.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualConflict {
    pub conflict: ConflictState,
    pub attempted: RecordPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PendingConflict {
    Auto(AutoConflictNotice),
    Manual(ManualConflict),
}

/// Snapshot of the editor's save state, published on every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorStatus {
    pub record_id: Option<RecordId>,
    pub version: Option<RecordVersion>,
    pub has_unsaved_changes: bool,
    pub auto_phase: AttemptPhase,
    pub manual_phase: AttemptPhase,
    pub auto_conflict: Option<AutoConflictNotice>,
    pub manual_conflict: Option<ManualConflict>,
    /// Last silent automatic-save failure, shown as a non-blocking hint.
    pub last_auto_error: Option<String>,
    pub session_ended: bool,
}

pub(crate) struct EditorState {
    pub working: EditableRecord,
    pub synced: EditableRecord,
    pub last_saved: ChangeSnapshot,
    pub sequence: u64,
    next_run_id: u64,
    pub debounce: Option<JoinHandle<()>>,
    pub debounce_generation: u64,
    pub auto_run: Option<CancelHandle>,
    pub manual_run: Option<CancelHandle>,
    pub auto_phase: AttemptPhase,
    pub manual_phase: AttemptPhase,
    pub auto_conflict: Option<AutoConflictNotice>,
    pub manual_conflict: Option<ManualConflict>,
    /// An automatic save came due while it was not allowed to dispatch.
    pub auto_deferred: bool,
    pub last_auto_error: Option<String>,
    pub closed: bool,
    pub pending_events: Vec<SaveEvent>,
}

impl EditorState {
    pub fn new(schema: &RecordSchema, record: EditableRecord) -> Self {
        let last_saved = clean_snapshot(schema, &record);
        Self {
            synced: record.clone(),
            working: record,
            last_saved,
            sequence: 0,
            next_run_id: 0,
            debounce: None,
            debounce_generation: 0,
            auto_run: None,
            manual_run: None,
            auto_phase: AttemptPhase::Idle,
            manual_phase: AttemptPhase::Idle,
            auto_conflict: None,
            manual_conflict: None,
            auto_deferred: false,
            last_auto_error: None,
            closed: false,
            pending_events: Vec::new(),
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn is_latest(&self, sequence: u64) -> bool {
        self.sequence == sequence
    }

    pub fn new_run(&mut self) -> (CancelHandle, AbortRegistration) {
        self.next_run_id += 1;
        CancelHandle::new_pair(self.next_run_id)
    }

    pub fn cancel_debounce(&mut self) {
        if let Some(timer) = self.debounce.take() {
            timer.abort();
        }
        if self.auto_phase == AttemptPhase::Debouncing {
            self.auto_phase = AttemptPhase::Idle;
        }
    }

    pub fn cancel_auto(&mut self) {
        if let Some(run) = self.auto_run.take() {
            run.cancel();
            if self.auto_phase.is_busy() {
                self.auto_phase = AttemptPhase::Idle;
            }
        }
    }

    pub fn cancel_manual(&mut self) {
        if let Some(run) = self.manual_run.take() {
            run.cancel();
            if self.manual_phase.is_busy() {
                self.manual_phase = AttemptPhase::Idle;
            }
        }
    }

    pub fn finish_auto_run(&mut self, run_id: u64) {
        if self.auto_run.as_ref().map(CancelHandle::run_id) == Some(run_id) {
            self.auto_run = None;
        }
    }

    pub fn finish_manual_run(&mut self, run_id: u64) {
        if self.manual_run.as_ref().map(CancelHandle::run_id) == Some(run_id) {
            self.manual_run = None;
        }
    }

    /// A pending debounce owns the automatic phase until it fires.
    pub fn settle_auto_phase(&mut self, phase: AttemptPhase) {
        if self.debounce.is_none() {
            self.auto_phase = phase;
        }
    }

    /// Automatic saves wait while a manual save or any conflict is open.
    pub fn auto_blocked(&self) -> bool {
        self.manual_run.is_some() || self.manual_conflict.is_some() || self.auto_conflict.is_some()
    }

    pub fn status(&self, schema: &RecordSchema) -> EditorStatus {
        EditorStatus {
            record_id: self.working.id.clone(),
            version: self.working.version,
            has_unsaved_changes: has_unsaved_changes(schema, &self.working, &self.synced),
            auto_phase: self.auto_phase,
            manual_phase: self.manual_phase,
            auto_conflict: self.auto_conflict.clone(),
            manual_conflict: self.manual_conflict.clone(),
            last_auto_error: self.last_auto_error.clone(),
            session_ended: self.closed,
        }
    }
}
