//! Patient record domain models: the editable working copy, its auxiliary
//! collections, the normalized payload and the store's saved representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::record_schema::{DENTAL_CHART_FIELD, TREATMENT_PLAN_FIELD};
use crate::errors::{Error, Result};
use crate::sync::canonical::canonical_json;

pub type RecordId = String;

/// Version marker assigned by the store on every successful write.
pub type RecordVersion = DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToothCondition {
    Healthy,
    Caries,
    Filled,
    Crown,
    RootCanal,
    Implant,
    Missing,
    ExtractionPlanned,
}

/// Status of a single tooth in the dental chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToothStatus {
    pub condition: ToothCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ToothStatus {
    pub fn new(condition: ToothCondition) -> Self {
        Self {
            condition,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// One step of the treatment plan. Dates hold raw user input until normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreatmentPlanEntry {
    pub procedure: String,
    #[serde(default)]
    pub tooth: Option<u8>,
    #[serde(default)]
    pub planned_date: Option<String>,
    #[serde(default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TreatmentPlanEntry {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            ..Default::default()
        }
    }

    pub fn for_tooth(mut self, tooth: u8) -> Self {
        self.tooth = Some(tooth);
        self
    }

    pub fn planned_on(mut self, date: impl Into<String>) -> Self {
        self.planned_date = Some(date.into());
        self
    }
}

/// A single user mutation of the working copy.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEdit {
    SetField { name: String, value: Value },
    ClearField { name: String },
    SetTooth { tooth: u8, status: ToothStatus },
    ClearTooth { tooth: u8 },
    AddPlanEntry(TreatmentPlanEntry),
    ReplacePlanEntry { index: usize, entry: TreatmentPlanEntry },
    RemovePlanEntry { index: usize },
    MovePlanEntry { from: usize, to: usize },
    ReplacePlan(Vec<TreatmentPlanEntry>),
}

impl RecordEdit {
    pub fn set(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::SetField {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn clear(name: impl Into<String>) -> Self {
        Self::ClearField { name: name.into() }
    }
}

/// In-memory working copy of the record under edit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditableRecord {
    pub id: Option<RecordId>,
    pub version: Option<RecordVersion>,
    pub fields: BTreeMap<String, Value>,
    pub dental_chart: BTreeMap<u8, ToothStatus>,
    pub treatment_plan: Vec<TreatmentPlanEntry>,
}

impl EditableRecord {
    /// Empty record that has never been persisted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Applies one edit. Returns `false` (and leaves the record untouched)
    /// when the edit addresses a plan index that does not exist.
    pub fn apply_edit(&mut self, edit: RecordEdit) -> bool {
        match edit {
            RecordEdit::SetField { name, value } => {
                self.fields.insert(name, value);
            }
            RecordEdit::ClearField { name } => {
                self.fields.remove(&name);
            }
            RecordEdit::SetTooth { tooth, status } => {
                self.dental_chart.insert(tooth, status);
            }
            RecordEdit::ClearTooth { tooth } => {
                self.dental_chart.remove(&tooth);
            }
            RecordEdit::AddPlanEntry(entry) => self.treatment_plan.push(entry),
            RecordEdit::ReplacePlanEntry { index, entry } => match self.treatment_plan.get_mut(index) {
                Some(slot) => *slot = entry,
                None => return false,
            },
            RecordEdit::RemovePlanEntry { index } => {
                if index >= self.treatment_plan.len() {
                    return false;
                }
                self.treatment_plan.remove(index);
            }
            RecordEdit::MovePlanEntry { from, to } => {
                let len = self.treatment_plan.len();
                if from >= len || to >= len {
                    return false;
                }
                let entry = self.treatment_plan.remove(from);
                self.treatment_plan.insert(to, entry);
            }
            RecordEdit::ReplacePlan(entries) => self.treatment_plan = entries,
        }
        true
    }

    /// Hydrates a working copy from the store's representation, splitting the
    /// merged collection fields back out of the flat field set.
    pub fn from_saved(saved: &SavedRecord) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut dental_chart = BTreeMap::new();
        let mut treatment_plan = Vec::new();

        for (name, value) in &saved.payload.fields {
            match name.as_str() {
                DENTAL_CHART_FIELD => dental_chart = parse_dental_chart(value)?,
                TREATMENT_PLAN_FIELD => treatment_plan = parse_treatment_plan(value)?,
                _ if value.is_null() => {}
                _ => {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(Self {
            id: Some(saved.id.clone()),
            version: Some(saved.version),
            fields,
            dental_chart,
            treatment_plan,
        })
    }
}

fn parse_dental_chart(value: &Value) -> Result<BTreeMap<u8, ToothStatus>> {
    let mut chart = BTreeMap::new();
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, status) in map {
                let tooth = key.parse::<u8>().map_err(|_| {
                    Error::invalid_record(format!("dental chart key '{}' is not a tooth number", key))
                })?;
                chart.insert(tooth, serde_json::from_value(status.clone())?);
            }
        }
        other => {
            return Err(Error::invalid_record(format!(
                "dental chart must be an object, got {}",
                other
            )))
        }
    }
    Ok(chart)
}

fn parse_treatment_plan(value: &Value) -> Result<Vec<TreatmentPlanEntry>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(value.clone())?),
        other => Err(Error::invalid_record(format!(
            "treatment plan must be an array, got {}",
            other
        ))),
    }
}

/// Canonical composite record sent to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub id: Option<RecordId>,
    pub fields: BTreeMap<String, Value>,
}

impl RecordPayload {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Byte-stable serialization used for idempotence checks and logging.
    pub fn canonical_json(&self) -> String {
        let mut root = serde_json::Map::new();
        root.insert(
            "id".to_string(),
            self.id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        root.insert(
            "fields".to_string(),
            Value::Object(self.fields.clone().into_iter().collect()),
        );
        canonical_json(&Value::Object(root))
    }
}

/// The store's canonical saved representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecord {
    pub id: RecordId,
    pub version: RecordVersion,
    pub payload: RecordPayload,
}
