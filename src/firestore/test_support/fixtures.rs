use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};

use crate::firestore::model::DocumentKey;
use crate::firestore::remote::datastore::{Datastore, InMemoryDatastore};
use crate::firestore::remote::serializer::encode_fields;
use crate::firestore::value::{FirestoreValue, MapValue};

pub(crate) fn fields(entries: &[(&str, FirestoreValue)]) -> BTreeMap<String, FirestoreValue> {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Builds an in-memory store holding `documents` (path, fields).
pub(crate) async fn seeded_store(documents: &[(&str, &[(&str, FirestoreValue)])]) -> InMemoryDatastore {
    let store = InMemoryDatastore::new();
    for (path, entries) in documents {
        let key = DocumentKey::from_string(path).expect("valid document path");
        store
            .set_document(&key, MapValue::new(fields(entries)), false)
            .await
            .expect("seed document");
    }
    store
}

/// Wire record of an existing document, as the bridge returns it.
pub(crate) fn document_record(path: &str, entries: &[(&str, FirestoreValue)]) -> JsonValue {
    let data = MapValue::new(fields(entries));
    json!({
        "path": path,
        "exists": true,
        "fields": encode_fields(&data).expect("encodable fields"),
    })
}
