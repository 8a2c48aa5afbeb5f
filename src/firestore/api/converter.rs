use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::{from_json_value, to_json_value, FirestoreValue, MapValue, ValueKind};

/// Converts between caller models and document maps.
///
/// Writes use `to_map`, reads use `from_map`.
pub trait FirestoreDataConverter: Send + Sync + Clone + 'static {
    type Model: Clone;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<BTreeMap<String, FirestoreValue>>;

    fn from_map(&self, value: &MapValue) -> FirestoreResult<Self::Model>;
}

/// Leaves document maps unchanged.
#[derive(Clone, Default)]
pub struct PassthroughConverter;

impl FirestoreDataConverter for PassthroughConverter {
    type Model = BTreeMap<String, FirestoreValue>;

    fn to_map(&self, value: &Self::Model) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        Ok(value.clone())
    }

    fn from_map(&self, value: &MapValue) -> FirestoreResult<Self::Model> {
        Ok(value.fields().clone())
    }
}

/// Maps any serde model to and from documents through its JSON form.
///
/// Field names are used exactly as serde produces them; combine with
/// `#[serde(rename_all = "camelCase")]` to match wire casing.
pub struct SerdeConverter<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> SerdeConverter<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> FirestoreDataConverter for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Model = T;

    fn to_map(&self, value: &T) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let json = serde_json::to_value(value)
            .map_err(|err| invalid_argument(format!("Failed to serialize document model: {err}")))?;
        match from_json_value(&json).into_kind() {
            ValueKind::Map(map) => Ok(map.into_fields()),
            other => Err(invalid_argument(format!(
                "Document models must serialize to an object, got {other:?}"
            ))),
        }
    }

    fn from_map(&self, value: &MapValue) -> FirestoreResult<T> {
        let json = to_json_value(&FirestoreValue::from_kind(ValueKind::Map(value.clone())))?;
        serde_json::from_value(json)
            .map_err(|err| invalid_argument(format!("Failed to deserialize document: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Product {
        unit_price: f64,
        tags: Vec<String>,
    }

    #[test]
    fn serde_converter_maps_both_ways() {
        let converter = SerdeConverter::<Product>::new();
        let product = Product {
            unit_price: 9.5,
            tags: vec!["new".into()],
        };
        let map = converter.to_map(&product).unwrap();
        assert_eq!(map.get("unitPrice"), Some(&FirestoreValue::from(9.5)));
        let back = converter.from_map(&MapValue::new(map)).unwrap();
        assert_eq!(back, product);
    }

    #[test]
    fn scalars_are_not_documents() {
        let converter = SerdeConverter::<i64>::new();
        let err = converter.to_map(&5).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }
}
