use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::firestore::api::converter::FirestoreDataConverter;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath};
use crate::firestore::value::{to_json_value, FirestoreValue, MapValue, ValueKind};

/// A document read at a point in time: its key and, if it exists, its fields.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    key: DocumentKey,
    data: Option<MapValue>,
}

impl DocumentSnapshot {
    pub fn new(key: DocumentKey, data: Option<MapValue>) -> Self {
        Self { key, data }
    }

    /// Snapshot of a document that does not exist.
    pub fn missing(key: DocumentKey) -> Self {
        Self { key, data: None }
    }

    /// Returns whether the document exists in the store.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// Slash-separated path of the document.
    pub fn path(&self) -> String {
        self.key.path().canonical_string()
    }

    /// Returns the document fields if the snapshot contains data.
    pub fn data(&self) -> Option<&BTreeMap<String, FirestoreValue>> {
        self.data.as_ref().map(|map| map.fields())
    }

    pub fn map_value(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    pub fn into_map_value(self) -> Option<MapValue> {
        self.data
    }

    /// Reads a (possibly nested) field. `None` when the document or the
    /// field is absent.
    pub fn get(&self, field: impl IntoFieldPath) -> FirestoreResult<Option<&FirestoreValue>> {
        let path: FieldPath = field.into_field_path()?;
        Ok(self.data.as_ref().and_then(|map| map.get(&path)))
    }

    /// Decodes the document through `converter`.
    pub fn data_with<C: FirestoreDataConverter>(&self, converter: &C) -> FirestoreResult<Option<C::Model>> {
        self.data.as_ref().map(|map| converter.from_map(map)).transpose()
    }

    /// Deserializes the document fields into `T` via serde.
    pub fn data_as<T: DeserializeOwned>(&self) -> FirestoreResult<Option<T>> {
        let Some(map) = &self.data else {
            return Ok(None);
        };
        let json = to_json_value(&FirestoreValue::from_kind(ValueKind::Map(map.clone())))?;
        serde_json::from_value(json)
            .map(Some)
            .map_err(|err| invalid_argument(format!("Failed to deserialize '{}': {err}", self.key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn snapshot_reports_existence() {
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let snapshot = DocumentSnapshot::missing(key);
        assert!(!snapshot.exists());
        assert_eq!(snapshot.data_as::<BTreeMap<String, i64>>().unwrap(), None);
    }

    #[test]
    fn reads_nested_fields_and_typed_data() {
        #[derive(Clone, Debug, Deserialize, PartialEq)]
        struct City {
            name: String,
            population: i64,
        }

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FirestoreValue::from("San Francisco"));
        fields.insert("population".to_string(), FirestoreValue::from(870_000i64));
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let snapshot = DocumentSnapshot::new(key, Some(MapValue::new(fields)));

        assert_eq!(
            snapshot.get("population").unwrap(),
            Some(&FirestoreValue::from(870_000i64))
        );
        assert_eq!(snapshot.get("missing.nested").unwrap(), None);
        assert_eq!(snapshot.path(), "cities/sf");
        let city: City = snapshot.data_as().unwrap().unwrap();
        assert_eq!(city.name, "San Francisco");
        assert_eq!(city.population, 870_000);
    }
}
