use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value as JsonValue};

use crate::firestore::api::DocumentSnapshot;
use crate::firestore::constants::{
    SENTINEL_ARRAY_REMOVE, SENTINEL_ARRAY_UNION, SENTINEL_DELETE, SENTINEL_INCREMENT,
    SENTINEL_SERVER_TIMESTAMP, SENTINEL_TAG,
};
use crate::firestore::error::{internal_error, invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, Timestamp};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::{BytesValue, FirestoreValue, MapValue, SentinelValue, ValueKind};

/// Encodes a value in the typed JSON form; sentinels become tagged records.
pub fn encode_value(value: &FirestoreValue) -> FirestoreResult<JsonValue> {
    Ok(match value.kind() {
        ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
        ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
        ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
        ValueKind::Double(double) => json!({ "doubleValue": double }),
        ValueKind::Timestamp(timestamp) => json!({ "timestampValue": encode_timestamp(timestamp)? }),
        ValueKind::String(string) => json!({ "stringValue": string }),
        ValueKind::Bytes(bytes) => json!({ "bytesValue": bytes.to_base64() }),
        ValueKind::Reference(reference) => json!({ "referenceValue": reference }),
        ValueKind::Array(array) => {
            let values = array
                .values()
                .iter()
                .map(encode_value)
                .collect::<FirestoreResult<Vec<_>>>()?;
            json!({ "arrayValue": { "values": values } })
        }
        ValueKind::Map(map) => json!({ "mapValue": { "fields": encode_fields(map)? } }),
        ValueKind::Sentinel(sentinel) => encode_sentinel(sentinel)?,
    })
}

/// Encodes document fields as a JSON object of typed values.
pub fn encode_fields(map: &MapValue) -> FirestoreResult<JsonValue> {
    let mut fields = Map::new();
    for (key, value) in map.fields() {
        fields.insert(key.clone(), encode_value(value)?);
    }
    Ok(JsonValue::Object(fields))
}

fn encode_sentinel(sentinel: &SentinelValue) -> FirestoreResult<JsonValue> {
    Ok(match sentinel {
        SentinelValue::ServerTimestamp => json!({ SENTINEL_TAG: SENTINEL_SERVER_TIMESTAMP }),
        SentinelValue::NumericIncrement(operand) => {
            let value = match operand.kind() {
                ValueKind::Integer(integer) => json!(integer),
                ValueKind::Double(double) => json!(double),
                other => {
                    return Err(invalid_argument(format!(
                        "increment() requires a numeric operand, got {other:?}"
                    )))
                }
            };
            json!({ SENTINEL_TAG: SENTINEL_INCREMENT, "value": value })
        }
        SentinelValue::ArrayUnion(elements) => json!({
            SENTINEL_TAG: SENTINEL_ARRAY_UNION,
            "elements": elements.iter().map(encode_value).collect::<FirestoreResult<Vec<_>>>()?,
        }),
        SentinelValue::ArrayRemove(elements) => json!({
            SENTINEL_TAG: SENTINEL_ARRAY_REMOVE,
            "elements": elements.iter().map(encode_value).collect::<FirestoreResult<Vec<_>>>()?,
        }),
        SentinelValue::DeleteField => json!({ SENTINEL_TAG: SENTINEL_DELETE }),
    })
}

/// Encodes one mutation of a commit request.
pub fn encode_write(write: &WriteOperation) -> FirestoreResult<JsonValue> {
    let path = write.key().path().canonical_string();
    Ok(match write {
        WriteOperation::Set { data, merge, .. } => json!({
            "op": "set",
            "path": path,
            "fields": encode_fields(data)?,
            "merge": merge,
        }),
        WriteOperation::Update {
            data, field_paths, ..
        } => json!({
            "op": "update",
            "path": path,
            "fields": encode_fields(data)?,
            "fieldPaths": field_paths.iter().map(FieldPath::canonical_string).collect::<Vec<_>>(),
        }),
        WriteOperation::Delete { .. } => json!({ "op": "delete", "path": path }),
    })
}

/// Decodes a `{"path", "exists", "fields"}` snapshot record.
pub fn decode_snapshot(value: &JsonValue) -> FirestoreResult<DocumentSnapshot> {
    let path = value
        .get("path")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| internal_error("Snapshot is missing its 'path'"))?;
    let key = DocumentKey::from_string(path)?;
    let exists = value.get("exists").and_then(JsonValue::as_bool).unwrap_or(false);
    if !exists {
        return Ok(DocumentSnapshot::missing(key));
    }
    let fields = match value.get("fields") {
        Some(fields) => decode_fields(fields)?,
        None => MapValue::new(BTreeMap::new()),
    };
    Ok(DocumentSnapshot::new(key, Some(fields)))
}

/// Decodes a query response: either `{"documents": [...]}` or a bare array.
pub fn decode_documents(value: &JsonValue) -> FirestoreResult<Vec<DocumentSnapshot>> {
    let entries = match value {
        JsonValue::Array(entries) => entries,
        JsonValue::Object(object) => match object.get("documents") {
            Some(JsonValue::Array(entries)) => entries,
            None => return Ok(Vec::new()),
            Some(_) => return Err(internal_error("'documents' must be an array")),
        },
        _ => return Err(internal_error("Expected a document list")),
    };
    entries.iter().map(decode_snapshot).collect()
}

/// Decodes a JSON object of typed values into document fields.
pub fn decode_fields(value: &JsonValue) -> FirestoreResult<MapValue> {
    let object = value
        .as_object()
        .ok_or_else(|| internal_error("Expected an object of fields"))?;
    let mut fields = BTreeMap::new();
    for (key, value) in object {
        fields.insert(key.clone(), decode_value(value)?);
    }
    Ok(MapValue::new(fields))
}

pub fn decode_value(value: &JsonValue) -> FirestoreResult<FirestoreValue> {
    let object = value
        .as_object()
        .ok_or_else(|| internal_error("Expected a typed value object"))?;
    if object.contains_key("nullValue") {
        return Ok(FirestoreValue::null());
    }
    if let Some(bool_value) = object.get("booleanValue") {
        let value = bool_value
            .as_bool()
            .ok_or_else(|| internal_error("booleanValue must be bool"))?;
        return Ok(FirestoreValue::from_bool(value));
    }
    if let Some(integer_value) = object.get("integerValue") {
        let parsed = match integer_value {
            JsonValue::String(value) => i64::from_str(value)
                .map_err(|err| internal_error(format!("Invalid integerValue: {err}")))?,
            JsonValue::Number(number) => number
                .as_i64()
                .ok_or_else(|| internal_error("Integer out of range"))?,
            _ => return Err(internal_error("integerValue must be a string or number")),
        };
        return Ok(FirestoreValue::from_integer(parsed));
    }
    if let Some(double_value) = object.get("doubleValue") {
        let parsed = match double_value {
            JsonValue::Number(number) => number
                .as_f64()
                .ok_or_else(|| internal_error("Invalid doubleValue"))?,
            JsonValue::String(value) => value
                .parse::<f64>()
                .map_err(|err| internal_error(format!("Invalid doubleValue: {err}")))?,
            _ => return Err(internal_error("doubleValue must be a number or string")),
        };
        return Ok(FirestoreValue::from_double(parsed));
    }
    if let Some(timestamp_value) = object.get("timestampValue") {
        let timestamp = timestamp_value
            .as_str()
            .ok_or_else(|| internal_error("timestampValue must be string"))?;
        return Ok(FirestoreValue::from_timestamp(parse_timestamp(timestamp)?));
    }
    if let Some(string_value) = object.get("stringValue") {
        let string = string_value
            .as_str()
            .ok_or_else(|| internal_error("stringValue must be string"))?;
        return Ok(FirestoreValue::from_string(string));
    }
    if let Some(bytes_value) = object.get("bytesValue") {
        let encoded = bytes_value
            .as_str()
            .ok_or_else(|| internal_error("bytesValue must be base64 string"))?;
        let bytes = BytesValue::from_base64(encoded)
            .map_err(|err| internal_error(format!("Invalid bytesValue: {err}")))?;
        return Ok(FirestoreValue::from_bytes(bytes));
    }
    if let Some(reference_value) = object.get("referenceValue") {
        let reference = reference_value
            .as_str()
            .ok_or_else(|| internal_error("referenceValue must be string"))?;
        return Ok(FirestoreValue::from_reference(reference));
    }
    if let Some(array_value) = object.get("arrayValue") {
        let values = match array_value.get("values").and_then(JsonValue::as_array) {
            Some(entries) => entries
                .iter()
                .map(decode_value)
                .collect::<FirestoreResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        return Ok(FirestoreValue::from_array(values));
    }
    if let Some(map_value) = object.get("mapValue") {
        let map = match map_value.get("fields") {
            Some(fields) => decode_fields(fields)?,
            None => MapValue::new(BTreeMap::new()),
        };
        return Ok(FirestoreValue::from_kind(ValueKind::Map(map)));
    }

    Err(internal_error("Unknown typed value"))
}

fn encode_timestamp(timestamp: &Timestamp) -> FirestoreResult<String> {
    Utc.timestamp_opt(timestamp.seconds, timestamp.nanos as u32)
        .single()
        .map(|datetime| datetime.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .ok_or_else(|| invalid_argument("Timestamp out of range"))
}

fn parse_timestamp(value: &str) -> FirestoreResult<Timestamp> {
    let datetime = DateTime::parse_from_rfc3339(value)
        .map_err(|err| internal_error(format!("Invalid timestamp: {err}")))?
        .with_timezone(&Utc);
    Ok(Timestamp::new(
        datetime.timestamp(),
        datetime.timestamp_subsec_nanos() as i32,
    ))
}
