//! Detects unsaved differences between the working copy and the last
//! synchronized state, and produces the snapshot used to suppress redundant
//! automatic saves.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::canonical::{canonical_json, dental_chart_value, treatment_plan_value};
use super::payload_normalizer::effective_fields;
use crate::records::{EditableRecord, RecordSchema, DENTAL_CHART_FIELD, TREATMENT_PLAN_FIELD};

/// Canonical serialization of the dirty fields plus both auxiliary
/// collections. Equality is byte equality of the serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeSnapshot {
    canonical: String,
}

impl ChangeSnapshot {
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Short fingerprint for log lines.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.canonical.as_bytes());
        let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
        format!("sha256:{}", hex)
    }
}

/// Effective field values that differ from the synchronized state, keyed by
/// field name and carrying the working value.
pub fn dirty_fields(
    schema: &RecordSchema,
    working: &EditableRecord,
    synced: &EditableRecord,
) -> BTreeMap<String, Value> {
    let current = effective_fields(schema, working);
    let baseline = effective_fields(schema, synced);
    current
        .into_iter()
        .filter(|(name, value)| baseline.get(name) != Some(value))
        .collect()
}

pub fn collections_changed(working: &EditableRecord, synced: &EditableRecord) -> bool {
    dental_chart_value(&working.dental_chart) != dental_chart_value(&synced.dental_chart)
        || treatment_plan_value(&working.treatment_plan)
            != treatment_plan_value(&synced.treatment_plan)
}

pub fn has_unsaved_changes(
    schema: &RecordSchema,
    working: &EditableRecord,
    synced: &EditableRecord,
) -> bool {
    collections_changed(working, synced) || !dirty_fields(schema, working, synced).is_empty()
}

pub fn change_snapshot(
    schema: &RecordSchema,
    working: &EditableRecord,
    synced: &EditableRecord,
) -> ChangeSnapshot {
    let mut root = Map::new();
    root.insert(
        "fields".to_string(),
        Value::Object(dirty_fields(schema, working, synced).into_iter().collect()),
    );
    root.insert(
        DENTAL_CHART_FIELD.to_string(),
        dental_chart_value(&working.dental_chart),
    );
    root.insert(
        TREATMENT_PLAN_FIELD.to_string(),
        treatment_plan_value(&working.treatment_plan),
    );
    ChangeSnapshot {
        canonical: canonical_json(&Value::Object(root)),
    }
}

/// Snapshot of a state with nothing dirty; what a freshly synchronized
/// record hashes to.
pub fn clean_snapshot(schema: &RecordSchema, synced: &EditableRecord) -> ChangeSnapshot {
    change_snapshot(schema, synced, synced)
}
