//! Field-level description of the patient record: kinds, required fields,
//! flag defaults and the flag → dependent-field clearing rules.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload field carrying the per-tooth status map.
pub const DENTAL_CHART_FIELD: &str = "dental_chart";

/// Payload field carrying the ordered treatment plan.
pub const TREATMENT_PLAN_FIELD: &str = "treatment_plan";

/// How a flat field is normalized and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Date,
    Flag,
    Number,
    /// Unordered list of labels; compared as a set.
    Tags,
    /// Free-form nested object; compared with sorted keys.
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    /// Value used when the working state leaves the field unset.
    pub default: Option<Value>,
}

/// When `flag` is anything but `true`, every field in `dependents` is sent as null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearingRule {
    pub flag: String,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordSchema {
    fields: BTreeMap<String, FieldSpec>,
    clearing_rules: Vec<ClearingRule>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, name: String, spec: FieldSpec) -> Self {
        if name == DENTAL_CHART_FIELD || name == TREATMENT_PLAN_FIELD {
            warn!(
                "[RecordSchema] '{}' is reserved for auxiliary collections; field ignored",
                name
            );
            return self;
        }
        self.fields.insert(name, spec);
        self
    }

    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.insert(
            name.into(),
            FieldSpec {
                kind,
                required: false,
                default: None,
            },
        )
    }

    pub fn required_field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.insert(
            name.into(),
            FieldSpec {
                kind,
                required: true,
                default: None,
            },
        )
    }

    /// Boolean flag backfilled with `default` when unset.
    pub fn flag_with_default(self, name: impl Into<String>, default: bool) -> Self {
        self.insert(
            name.into(),
            FieldSpec {
                kind: FieldKind::Flag,
                required: false,
                default: Some(Value::Bool(default)),
            },
        )
    }

    pub fn clears(mut self, flag: impl Into<String>, dependents: &[&str]) -> Self {
        self.clearing_rules.push(ClearingRule {
            flag: flag.into(),
            dependents: dependents.iter().map(|d| d.to_string()).collect(),
        });
        self
    }

    pub fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).map(|spec| spec.kind)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn clearing_rules(&self) -> &[ClearingRule] {
        &self.clearing_rules
    }

    /// Stock schema of the clinic's patient chart.
    pub fn patient_chart() -> Self {
        use FieldKind::*;

        Self::new()
            .required_field("first_name", Text)
            .required_field("last_name", Text)
            .field("birth_date", Date)
            .field("sex", Text)
            .field("phone", Text)
            .field("email", Text)
            .field("address", Text)
            .field("occupation", Text)
            .field("referral_source", Text)
            .field("emergency_contact", Object)
            .field("tags", Tags)
            .field("last_visit", Date)
            .field("notes", Text)
            .flag_with_default("has_allergies", false)
            .field("allergy_details", Text)
            .flag_with_default("takes_medication", false)
            .field("medication_list", Text)
            .flag_with_default("is_smoker", false)
            .field("cigarettes_per_day", Number)
            // No default: "not asked" must stay distinguishable from "no".
            .field("is_pregnant", Flag)
            .field("pregnancy_week", Number)
            .flag_with_default("has_insurance", false)
            .field("insurance_provider", Text)
            .field("insurance_number", Text)
            .field("insurance_valid_until", Date)
            .flag_with_default("consent_signed", false)
            .field("consent_date", Date)
            .flag_with_default("sms_reminders", true)
            .flag_with_default("email_reminders", false)
            .clears("has_allergies", &["allergy_details"])
            .clears("takes_medication", &["medication_list"])
            .clears("is_smoker", &["cigarettes_per_day"])
            .clears("is_pregnant", &["pregnancy_week"])
            .clears(
                "has_insurance",
                &[
                    "insurance_provider",
                    "insurance_number",
                    "insurance_valid_until",
                ],
            )
            .clears("consent_signed", &["consent_date"])
    }
}
