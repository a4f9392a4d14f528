//! Outbound notifications about save lifecycle milestones.

use serde::Serialize;

use carechart_core::records::{RecordId, RecordVersion};
use carechart_core::sync::{ConflictState, SaveErrorKind, SaveSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaveEvent {
    Saved {
        source: SaveSource,
        record_id: RecordId,
        version: RecordVersion,
    },
    /// The first successful save assigned the record its identity.
    RecordIdentified { record_id: RecordId },
    ConflictRaised {
        source: SaveSource,
        conflict: ConflictState,
    },
    SaveFailed {
        source: SaveSource,
        kind: SaveErrorKind,
        message: String,
    },
    Reloaded {
        record_id: RecordId,
        version: RecordVersion,
    },
}

impl SaveEvent {
    pub fn saved(source: SaveSource, record_id: impl Into<RecordId>, version: RecordVersion) -> Self {
        Self::Saved {
            source,
            record_id: record_id.into(),
            version,
        }
    }

    pub fn record_identified(record_id: impl Into<RecordId>) -> Self {
        Self::RecordIdentified {
            record_id: record_id.into(),
        }
    }

    pub fn save_failed(source: SaveSource, kind: SaveErrorKind, message: impl Into<String>) -> Self {
        Self::SaveFailed {
            source,
            kind,
            message: message.into(),
        }
    }
}

/// Receiver for [`SaveEvent`]s. Called outside the orchestrator's locks.
pub trait SaveEventSink: Send + Sync {
    fn emit(&self, event: SaveEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSaveEventSink;

impl SaveEventSink for NoOpSaveEventSink {
    fn emit(&self, _event: SaveEvent) {}
}
