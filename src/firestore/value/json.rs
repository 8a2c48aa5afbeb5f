use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::{FirestoreValue, ValueKind};

/// Converts plain JSON into a document value.
///
/// Integral numbers that fit in an `i64` become integers, every other number
/// becomes a double.
pub fn from_json_value(value: &JsonValue) -> FirestoreValue {
    match value {
        JsonValue::Null => FirestoreValue::null(),
        JsonValue::Bool(boolean) => FirestoreValue::from_bool(*boolean),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => FirestoreValue::from_integer(integer),
            None => FirestoreValue::from_double(number.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(string) => FirestoreValue::from_string(string.clone()),
        JsonValue::Array(values) => {
            FirestoreValue::from_array(values.iter().map(from_json_value).collect())
        }
        JsonValue::Object(object) => FirestoreValue::from_map(
            object
                .iter()
                .map(|(key, value)| (key.clone(), from_json_value(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Converts a document value into plain JSON.
///
/// Timestamps render as RFC 3339 strings, bytes as base64 and references as
/// their path. Sentinels are write-only and cannot be converted.
pub fn to_json_value(value: &FirestoreValue) -> FirestoreResult<JsonValue> {
    Ok(match value.kind() {
        ValueKind::Null => JsonValue::Null,
        ValueKind::Boolean(boolean) => JsonValue::Bool(*boolean),
        ValueKind::Integer(integer) => JsonValue::Number((*integer).into()),
        ValueKind::Double(double) => Number::from_f64(*double)
            .map(JsonValue::Number)
            .ok_or_else(|| invalid_argument(format!("{double} cannot be represented as JSON")))?,
        ValueKind::Timestamp(timestamp) => JsonValue::String(
            Utc.timestamp_opt(timestamp.seconds, timestamp.nanos as u32)
                .single()
                .ok_or_else(|| invalid_argument("Timestamp out of range"))?
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        ValueKind::String(string) => JsonValue::String(string.clone()),
        ValueKind::Bytes(bytes) => JsonValue::String(bytes.to_base64()),
        ValueKind::Reference(reference) => JsonValue::String(reference.clone()),
        ValueKind::Array(array) => JsonValue::Array(
            array
                .values()
                .iter()
                .map(to_json_value)
                .collect::<FirestoreResult<Vec<_>>>()?,
        ),
        ValueKind::Map(map) => {
            let mut object = Map::new();
            for (key, value) in map.fields() {
                object.insert(key.clone(), to_json_value(value)?);
            }
            JsonValue::Object(object)
        }
        ValueKind::Sentinel(_) => {
            return Err(invalid_argument(
                "Sentinel values are write-only and have no JSON representation",
            ))
        }
    })
}
