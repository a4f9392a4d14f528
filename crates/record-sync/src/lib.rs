//! Save orchestration for the Carechart patient-record editor.
//!
//! [`SaveOrchestrator`] keeps the editor's working copy in step with the
//! records store through automatic and manual saves, [`ConflictResolver`]
//! handles version conflicts, and [`RecordApiClient`] talks to the records
//! API over HTTP.

pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod orchestrator;

pub use client::RecordApiClient;
pub use config::SaveConfig;
pub use conflict::{AuthorizationLevel, ConflictResolver, ManualResolution, ResolutionOutcome};
pub use error::{ClientError, ResolveError, SaveFailure};
pub use events::{NoOpSaveEventSink, SaveEvent, SaveEventSink};
pub use orchestrator::{
    AutoConflictNotice, EditorStatus, ManualConflict, ManualSaveOutcome, PendingConflict,
    SaveAttempt, SaveOrchestrator, SaveOrchestratorBuilder,
};
