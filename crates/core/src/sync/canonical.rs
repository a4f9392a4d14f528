//! Value normalization shared by the change tracker and the payload
//! normalizer, plus a key-sorted JSON serialization.
//!
//! Missing values, `null`, blank strings and empty lists/objects all
//! normalize to `Value::Null`, so logically equal states serialize to the
//! same bytes.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::records::{FieldKind, ToothStatus, TreatmentPlanEntry};

const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Serializes `value` with object keys sorted at every level.
///
/// Keys are sorted here instead of relying on `serde_json::Map` ordering,
/// which follows insertion order once any crate in the build enables
/// serde_json's `preserve_order` feature.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (idx, (key, item)) in sorted.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Parses the date formats the intake forms produce into `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.format(CANONICAL_DATE_FORMAT).to_string());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive().format(CANONICAL_DATE_FORMAT).to_string());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.date().format(CANONICAL_DATE_FORMAT).to_string());
        }
    }
    None
}

/// Normalizes one flat field according to its kind.
pub fn normalize_field(kind: FieldKind, value: Option<&Value>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };

    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Text, Value::String(s)) => text_value(s),
        (FieldKind::Date, Value::String(s)) => match normalize_date(s) {
            Some(date) => Value::String(date),
            None => text_value(s),
        },
        (FieldKind::Flag, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Value::Null,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => text_value(s),
        },
        (FieldKind::Number, Value::Number(n)) => normalize_number(n),
        (FieldKind::Number, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            match trimmed.parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    Number::from_f64(parsed).map_or(Value::Null, |n| normalize_number(&n))
                }
                _ => text_value(s),
            }
        }
        (FieldKind::Tags, Value::String(s)) => tags_value(s.split(',').map(str::to_string)),
        (FieldKind::Tags, Value::Array(items)) => tags_value(items.iter().filter_map(|item| {
            match normalize_value(item) {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(canonical_json(&other)),
            }
        })),
        _ => normalize_value(value),
    }
}

/// Kind-agnostic normalization used for nested and unknown values.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => text_value(s),
        Value::Number(n) => normalize_number(n),
        Value::Array(items) => {
            if items.is_empty() {
                Value::Null
            } else {
                Value::Array(items.iter().map(normalize_value).collect())
            }
        }
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .iter()
                .map(|(key, item)| (key.clone(), normalize_value(item)))
                .filter(|(_, item)| !item.is_null())
                .collect();
            if normalized.is_empty() {
                Value::Null
            } else {
                Value::Object(normalized)
            }
        }
        other => other.clone(),
    }
}

fn text_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

fn optional_text(raw: Option<&String>) -> Value {
    raw.map_or(Value::Null, |s| text_value(s))
}

fn optional_date(raw: Option<&String>) -> Value {
    match raw {
        Some(s) => normalize_date(s).map_or_else(|| text_value(s), Value::String),
        None => Value::Null,
    }
}

/// Integral floats collapse to integers so `5` and `5.0` compare equal.
fn normalize_number(n: &Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
        Some(f) => Value::from(f),
        None => Value::Number(n.clone()),
    }
}

fn tags_value(items: impl Iterator<Item = String>) -> Value {
    let mut tags: Vec<String> = items
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    if tags.is_empty() {
        Value::Null
    } else {
        Value::Array(tags.into_iter().map(Value::String).collect())
    }
}

/// Dental chart as sent to the store: object keyed by tooth number.
pub fn dental_chart_value(chart: &BTreeMap<u8, ToothStatus>) -> Value {
    let map: Map<String, Value> = chart
        .iter()
        .map(|(tooth, status)| {
            let mut entry = Map::new();
            entry.insert(
                "condition".to_string(),
                serde_json::to_value(status.condition).unwrap_or(Value::Null),
            );
            let note = optional_text(status.note.as_ref());
            if !note.is_null() {
                entry.insert("note".to_string(), note);
            }
            (tooth.to_string(), Value::Object(entry))
        })
        .collect();
    Value::Object(map)
}

/// Treatment plan as sent to the store. Order is preserved.
pub fn treatment_plan_value(plan: &[TreatmentPlanEntry]) -> Value {
    Value::Array(plan.iter().map(plan_entry_value).collect())
}

fn plan_entry_value(entry: &TreatmentPlanEntry) -> Value {
    let mut map = Map::new();
    map.insert("procedure".to_string(), text_value(&entry.procedure));
    map.insert(
        "tooth".to_string(),
        entry.tooth.map_or(Value::Null, Value::from),
    );
    map.insert(
        "planned_date".to_string(),
        optional_date(entry.planned_date.as_ref()),
    );
    map.insert(
        "completed_date".to_string(),
        optional_date(entry.completed_date.as_ref()),
    );
    map.insert("notes".to_string(), optional_text(entry.notes.as_ref()));
    Value::Object(map)
}
