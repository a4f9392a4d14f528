//! Builds the canonical save payload from the fragmented working state.

use serde_json::Value;
use std::collections::BTreeMap;

use super::canonical::{
    dental_chart_value, normalize_date, normalize_field, treatment_plan_value,
};
use super::save_model::{FieldError, SaveError};
use crate::records::{
    EditableRecord, FieldKind, RecordPayload, RecordSchema, DENTAL_CHART_FIELD,
    TREATMENT_PLAN_FIELD,
};

/// Flat fields exactly as they would be sent: normalized, defaults
/// backfilled, dependents of unset flags nulled. Fields outside the schema
/// are UI scratch state and never leave the editor.
pub fn effective_fields(schema: &RecordSchema, record: &EditableRecord) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    for (name, spec) in schema.fields() {
        let mut value = normalize_field(spec.kind, record.field(name));
        if value.is_null() {
            if let Some(default) = &spec.default {
                value = default.clone();
            }
        }
        fields.insert(name.to_string(), value);
    }

    for rule in schema.clearing_rules() {
        if fields.get(&rule.flag) == Some(&Value::Bool(true)) {
            continue;
        }
        for dependent in &rule.dependents {
            if let Some(slot) = fields.get_mut(dependent) {
                *slot = Value::Null;
            }
        }
    }
    fields
}

/// Assembles the single composite record the store expects.
pub fn normalize_payload(schema: &RecordSchema, record: &EditableRecord) -> RecordPayload {
    let mut fields = effective_fields(schema, record);
    fields.insert(
        DENTAL_CHART_FIELD.to_string(),
        dental_chart_value(&record.dental_chart),
    );
    fields.insert(
        TREATMENT_PLAN_FIELD.to_string(),
        treatment_plan_value(&record.treatment_plan),
    );
    RecordPayload {
        id: record.id.clone(),
        fields,
    }
}

/// Local pre-check run before any network call.
pub fn validate_payload(schema: &RecordSchema, payload: &RecordPayload) -> Result<(), SaveError> {
    let mut errors = Vec::new();

    for (name, spec) in schema.fields() {
        let value = payload.get(name).unwrap_or(&Value::Null);
        if spec.required && value.is_null() {
            errors.push(FieldError::new(name, "is required"));
            continue;
        }
        if spec.kind == FieldKind::Date {
            if let Value::String(raw) = value {
                if normalize_date(raw).as_deref() != Some(raw.as_str()) {
                    errors.push(FieldError::new(name, "is not a valid date"));
                }
            }
        }
    }

    if let Some(Value::Array(entries)) = payload.get(TREATMENT_PLAN_FIELD) {
        for (idx, entry) in entries.iter().enumerate() {
            if entry.get("procedure").map_or(true, Value::is_null) {
                errors.push(FieldError::new(
                    format!("{}[{}].procedure", TREATMENT_PLAN_FIELD, idx),
                    "is required",
                ));
            }
            for key in ["planned_date", "completed_date"] {
                if let Some(Value::String(raw)) = entry.get(key) {
                    if normalize_date(raw).as_deref() != Some(raw.as_str()) {
                        errors.push(FieldError::new(
                            format!("{}[{}].{}", TREATMENT_PLAN_FIELD, idx, key),
                            "is not a valid date",
                        ));
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SaveError::validation_fields(
            "The record has fields that need attention",
            errors,
        ))
    }
}
