//! Resolution of version conflicts raised by either save path.
//!
//! An automatic-save conflict is a dismissible notice: the user may ignore
//! it, or reload the stored record, which drops only the edits the rejected
//! attempt carried. A manual-save conflict blocks further manual saves until
//! the user either reloads (discarding local edits) or, with elevated
//! authorization, overwrites the stored version.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use carechart_core::records::{EditableRecord, RecordSchema, SavedRecord};
use carechart_core::sync::canonical::{dental_chart_value, treatment_plan_value};
use carechart_core::sync::effective_fields;

use crate::error::ResolveError;
use crate::orchestrator::{
    ManualConflict, ManualSaveOutcome, PendingConflict, ReloadMode, SaveOrchestrator,
};

/// Role-derived permission of the current user, supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationLevel {
    #[default]
    Standard,
    /// May overwrite a newer stored version.
    Elevated,
}

impl AuthorizationLevel {
    pub fn can_force_overwrite(self) -> bool {
        matches!(self, AuthorizationLevel::Elevated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualResolution {
    /// Discard local edits and adopt the stored record.
    Reload,
    /// Re-send the local record against the stored version.
    ForceOverwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Reloaded(SavedRecord),
    Overwritten(SavedRecord),
    /// The record changed again between the conflict and the overwrite.
    ConflictAgain(ManualConflict),
    Superseded,
}

/// User-facing conflict actions for one [`SaveOrchestrator`].
#[derive(Clone)]
pub struct ConflictResolver {
    orchestrator: SaveOrchestrator,
}

impl ConflictResolver {
    pub fn new(orchestrator: SaveOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Open conflicts, the blocking manual one first.
    pub fn pending(&self) -> Vec<PendingConflict> {
        self.orchestrator.pending_conflicts()
    }

    /// Choices to present for a manual conflict.
    pub fn resolution_choices(level: AuthorizationLevel) -> Vec<ManualResolution> {
        let mut choices = vec![ManualResolution::Reload];
        if level.can_force_overwrite() {
            choices.push(ManualResolution::ForceOverwrite);
        }
        choices
    }

    /// Hides the automatic-save notice. Returns `false` if none was shown.
    pub fn dismiss_auto_notice(&self) -> bool {
        self.orchestrator.dismiss_auto_conflict()
    }

    /// Adopts the stored record while keeping edits made after the rejected
    /// automatic attempt.
    pub async fn reload_after_auto_conflict(&self) -> Result<SavedRecord, ResolveError> {
        if !self.orchestrator.has_auto_conflict() {
            return Err(ResolveError::NoConflict);
        }
        self.orchestrator
            .reload(ReloadMode::KeepUnrelatedEdits)
            .await
    }

    pub async fn resolve_manual_conflict(
        &self,
        choice: ManualResolution,
        level: AuthorizationLevel,
    ) -> Result<ResolutionOutcome, ResolveError> {
        if !self.orchestrator.has_manual_conflict() {
            return Err(ResolveError::NoConflict);
        }

        match choice {
            ManualResolution::Reload => self
                .orchestrator
                .reload(ReloadMode::DiscardAll)
                .await
                .map(ResolutionOutcome::Reloaded),
            ManualResolution::ForceOverwrite => {
                if !level.can_force_overwrite() {
                    warn!("[RecordSave] Force overwrite refused for {:?} authorization", level);
                    return Err(ResolveError::NotAuthorized);
                }
                let pending = self
                    .orchestrator
                    .take_manual_conflict()
                    .ok_or(ResolveError::NoConflict)?;
                info!(
                    "[RecordSave] Overwriting stored version {} (correlation {})",
                    pending.conflict.server_version, pending.conflict.correlation_id
                );

                match self
                    .orchestrator
                    .run_manual(Some(pending.conflict.server_version))
                    .await
                {
                    Ok(ManualSaveOutcome::Saved(saved)) => Ok(ResolutionOutcome::Overwritten(saved)),
                    Ok(ManualSaveOutcome::Conflict(again)) => {
                        Ok(ResolutionOutcome::ConflictAgain(again))
                    }
                    Ok(ManualSaveOutcome::Superseded) => {
                        self.orchestrator.restore_manual_conflict(pending);
                        Ok(ResolutionOutcome::Superseded)
                    }
                    Err(failure) => {
                        self.orchestrator.restore_manual_conflict(pending);
                        Err(failure.into())
                    }
                }
            }
        }
    }
}

/// Rebases the working copy on `stored` after an automatic conflict.
///
/// A field adopts the stored value when it is unchanged since the last sync,
/// or still holds exactly what the rejected attempt sent. Anything edited
/// after that attempt is kept.
pub(crate) fn merge_after_auto_conflict(
    schema: &RecordSchema,
    working: &EditableRecord,
    synced: &EditableRecord,
    attempted: &EditableRecord,
    stored: &EditableRecord,
) -> EditableRecord {
    let current = effective_fields(schema, working);
    let baseline = effective_fields(schema, synced);
    let rejected = effective_fields(schema, attempted);

    let mut merged = working.clone();
    merged.id = stored.id.clone();
    merged.version = stored.version;

    for (name, _) in schema.fields() {
        let value = current.get(name);
        let untouched = value == baseline.get(name);
        let carried_by_rejected = value == rejected.get(name) && rejected.get(name) != baseline.get(name);
        if untouched || carried_by_rejected {
            match stored.fields.get(name) {
                Some(value) => {
                    merged.fields.insert(name.to_string(), value.clone());
                }
                None => {
                    merged.fields.remove(name);
                }
            }
        }
    }

    let chart = dental_chart_value(&working.dental_chart);
    if chart == dental_chart_value(&synced.dental_chart)
        || chart == dental_chart_value(&attempted.dental_chart)
    {
        merged.dental_chart = stored.dental_chart.clone();
    }

    let plan = treatment_plan_value(&working.treatment_plan);
    if plan == treatment_plan_value(&synced.treatment_plan)
        || plan == treatment_plan_value(&attempted.treatment_plan)
    {
        merged.treatment_plan = stored.treatment_plan.clone();
    }

    merged
}
