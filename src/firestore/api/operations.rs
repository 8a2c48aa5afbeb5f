use std::collections::BTreeMap;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::local::transform::{sentinel_literal, set_value_at_segments};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::remote::datastore::WriteOperation;
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};

/// Options that configure the behaviour of `set_doc` writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// When `true`, the provided fields are merged into the existing
    /// document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    /// Set options that merge every field present in the provided data.
    pub fn merge_all() -> Self {
        Self { merge: true }
    }
}

/// Validated payload of an `update` write.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedUpdateData {
    /// Nested form of the update: every field path expanded into maps.
    pub map: MapValue,
    /// The paths the update touches, in caller order.
    pub field_paths: Vec<FieldPath>,
}

/// Validates a `set` payload.
///
/// `DeleteField` has no meaning for a set; it is stored as its literal
/// tagged record so both stores persist the same document.
pub fn encode_set_data(data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<MapValue> {
    let mut encoded = BTreeMap::new();
    for (key, value) in data {
        let path = FieldPath::new([key.clone()])?;
        encoded.insert(key, encode_set_value(value, &path)?);
    }
    Ok(MapValue::new(encoded))
}

/// Validates an `update` payload whose keys are dot-separated field paths.
pub fn encode_update_document_data(
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<EncodedUpdateData> {
    if data.is_empty() {
        return Err(invalid_argument(
            "update_doc requires at least one field/value pair",
        ));
    }

    let mut field_paths: Vec<FieldPath> = Vec::with_capacity(data.len());
    let mut fields = BTreeMap::new();
    for (key, value) in data {
        let path = FieldPath::from_dot_separated(&key)?;
        if let Some(conflict) = field_paths.iter().find(|existing| overlaps(existing, &path)) {
            return Err(invalid_argument(format!(
                "Field paths '{conflict}' and '{path}' overlap in the same update"
            )));
        }
        match value.kind() {
            ValueKind::Sentinel(sentinel) => validate_sentinel(sentinel, &path)?,
            _ => assert_no_sentinel(&value, &path)?,
        }
        set_value_at_segments(&mut fields, path.segments(), value);
        field_paths.push(path);
    }

    Ok(EncodedUpdateData {
        map: MapValue::new(fields),
        field_paths,
    })
}

/// Parses a document path, rejecting collection paths.
pub(crate) fn validate_document_path(path: &str) -> FirestoreResult<DocumentKey> {
    DocumentKey::from_string(path)
}

pub(crate) fn set_write(
    path: &str,
    data: BTreeMap<String, FirestoreValue>,
    options: SetOptions,
) -> FirestoreResult<WriteOperation> {
    Ok(WriteOperation::Set {
        key: validate_document_path(path)?,
        data: encode_set_data(data)?,
        merge: options.merge,
    })
}

pub(crate) fn update_write(
    path: &str,
    data: BTreeMap<String, FirestoreValue>,
) -> FirestoreResult<WriteOperation> {
    let key = validate_document_path(path)?;
    let encoded = encode_update_document_data(data)?;
    Ok(WriteOperation::Update {
        key,
        data: encoded.map,
        field_paths: encoded.field_paths,
    })
}

pub(crate) fn delete_write(path: &str) -> FirestoreResult<WriteOperation> {
    Ok(WriteOperation::Delete {
        key: validate_document_path(path)?,
    })
}

fn encode_set_value(value: FirestoreValue, path: &FieldPath) -> FirestoreResult<FirestoreValue> {
    match value.into_kind() {
        ValueKind::Sentinel(SentinelValue::DeleteField) => {
            Ok(sentinel_literal(SentinelValue::DeleteField))
        }
        ValueKind::Sentinel(sentinel) => {
            validate_sentinel(&sentinel, path)?;
            Ok(FirestoreValue::from_kind(ValueKind::Sentinel(sentinel)))
        }
        ValueKind::Map(map) => {
            let mut encoded = BTreeMap::new();
            for (key, child) in map.into_fields() {
                let child_path = FieldPath::new(path.segments().iter().cloned().chain([key.clone()]))?;
                encoded.insert(key, encode_set_value(child, &child_path)?);
            }
            Ok(FirestoreValue::from_map(encoded))
        }
        other => {
            let value = FirestoreValue::from_kind(other);
            assert_no_sentinel(&value, path)?;
            Ok(value)
        }
    }
}

fn validate_sentinel(sentinel: &SentinelValue, path: &FieldPath) -> FirestoreResult<()> {
    match sentinel {
        SentinelValue::ServerTimestamp | SentinelValue::DeleteField => Ok(()),
        SentinelValue::ArrayUnion(elements) | SentinelValue::ArrayRemove(elements) => {
            for element in elements {
                assert_no_sentinel(element, path)?;
            }
            Ok(())
        }
        SentinelValue::NumericIncrement(operand) => match operand.kind() {
            ValueKind::Integer(_) | ValueKind::Double(_) => Ok(()),
            _ => Err(invalid_argument(format!(
                "increment() on '{path}' requires a numeric operand"
            ))),
        },
    }
}

/// Sentinels are only valid as the direct value of a written field.
fn assert_no_sentinel(value: &FirestoreValue, path: &FieldPath) -> FirestoreResult<()> {
    match value.kind() {
        ValueKind::Sentinel(_) => Err(invalid_argument(format!(
            "Invalid data. Sentinel values cannot be nested inside arrays or update values (field '{path}')."
        ))),
        ValueKind::Array(array) => array
            .values()
            .iter()
            .try_for_each(|element| assert_no_sentinel(element, path)),
        ValueKind::Map(map) => map
            .fields()
            .values()
            .try_for_each(|element| assert_no_sentinel(element, path)),
        _ => Ok(()),
    }
}

fn overlaps(left: &FieldPath, right: &FieldPath) -> bool {
    let shared = left.segments().len().min(right.segments().len());
    left.segments()[..shared] == right.segments()[..shared]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::constants::SENTINEL_TAG;

    #[test]
    fn set_rewrites_delete_field_into_literal() {
        let data = BTreeMap::from([("gone".to_string(), FirestoreValue::delete_field())]);
        let encoded = encode_set_data(data).unwrap();
        let literal = encoded.fields()["gone"].as_map().expect("literal record");
        assert_eq!(
            literal.fields().get(SENTINEL_TAG),
            Some(&FirestoreValue::from("delete"))
        );
    }

    #[test]
    fn set_keeps_resolvable_sentinels_inline() {
        let data = BTreeMap::from([(
            "stats".to_string(),
            FirestoreValue::from_map(BTreeMap::from([(
                "updatedAt".to_string(),
                FirestoreValue::server_timestamp(),
            )])),
        )]);
        let encoded = encode_set_data(data).unwrap();
        let path = FieldPath::from_dot_separated("stats.updatedAt").unwrap();
        assert!(encoded.get(&path).unwrap().is_sentinel());
    }

    #[test]
    fn update_expands_dotted_paths() {
        let data = BTreeMap::from([
            ("stats.views".to_string(), FirestoreValue::numeric_increment(1)),
            ("title".to_string(), FirestoreValue::from("hello")),
        ]);
        let encoded = encode_update_document_data(data).unwrap();
        assert_eq!(encoded.field_paths.len(), 2);
        let views = FieldPath::from_dot_separated("stats.views").unwrap();
        assert!(encoded.map.get(&views).unwrap().is_sentinel());
    }

    #[test]
    fn update_rejects_overlapping_paths() {
        let data = BTreeMap::from([
            ("stats".to_string(), FirestoreValue::from_map(BTreeMap::new())),
            ("stats.views".to_string(), FirestoreValue::from(1)),
        ]);
        assert!(encode_update_document_data(data).is_err());
    }

    #[test]
    fn update_rejects_nested_delete() {
        let data = BTreeMap::from([(
            "stats".to_string(),
            FirestoreValue::from_map(BTreeMap::from([(
                "views".to_string(),
                FirestoreValue::delete_field(),
            )])),
        )]);
        let err = encode_update_document_data(data).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn array_rejects_nested_sentinel() {
        let data = BTreeMap::from([(
            "values".to_string(),
            FirestoreValue::from_array(vec![FirestoreValue::server_timestamp()]),
        )]);
        let err = encode_set_data(data).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn increment_requires_numeric_operand() {
        let data = BTreeMap::from([(
            "total".to_string(),
            FirestoreValue::numeric_increment(FirestoreValue::from_string("five")),
        )]);
        let err = encode_update_document_data(data).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn empty_update_is_rejected() {
        assert!(encode_update_document_data(BTreeMap::new()).is_err());
    }
}
