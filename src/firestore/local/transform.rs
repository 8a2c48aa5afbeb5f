use std::collections::BTreeMap;

use crate::firestore::constants::{
    SENTINEL_ARRAY_REMOVE, SENTINEL_ARRAY_UNION, SENTINEL_DELETE, SENTINEL_INCREMENT,
    SENTINEL_SERVER_TIMESTAMP, SENTINEL_TAG,
};
use crate::firestore::error::{not_found, FirestoreResult};
use crate::firestore::model::{FieldPath, Timestamp};
use crate::firestore::value::{values_equal, FirestoreValue, MapValue, SentinelValue, ValueKind};

/// Resolves one sentinel against the prior value of its field.
///
/// Returns `None` when the field must be removed.
pub fn resolve_sentinel(
    prior: Option<&FirestoreValue>,
    sentinel: &SentinelValue,
    now: Timestamp,
) -> Option<FirestoreValue> {
    match sentinel {
        SentinelValue::ServerTimestamp => Some(FirestoreValue::from_timestamp(now)),
        SentinelValue::NumericIncrement(operand) => Some(apply_increment(prior, operand)),
        SentinelValue::ArrayUnion(elements) => {
            let mut values = prior_array(prior);
            for element in elements {
                if !values.iter().any(|existing| values_equal(existing, element)) {
                    values.push(element.clone());
                }
            }
            Some(FirestoreValue::from_array(values))
        }
        SentinelValue::ArrayRemove(elements) => {
            let mut values = prior_array(prior);
            values.retain(|existing| {
                !elements.iter().any(|element| values_equal(existing, element))
            });
            Some(FirestoreValue::from_array(values))
        }
        SentinelValue::DeleteField => None,
    }
}

/// Applies a `set` write. A non-merge set replaces the document; a merge set
/// writes every leaf of `data` into the prior document.
///
/// `DeleteField` is never resolved here: it is stored as its literal tagged
/// record, matching what the remote store receives for the same payload.
pub fn apply_set(
    prior: Option<&MapValue>,
    data: &MapValue,
    merge: bool,
    now: Timestamp,
) -> MapValue {
    if !merge {
        return MapValue::new(resolve_map(data.fields(), prior, now));
    }

    let mut fields = prior.map(|map| map.fields().clone()).unwrap_or_default();
    let mut leaves = Vec::new();
    collect_leaves(data.fields(), &mut Vec::new(), &mut leaves);
    for (segments, value) in leaves {
        let prior_value = prior.and_then(|map| value_at_segments(map, &segments));
        let resolved = match value.kind() {
            ValueKind::Sentinel(SentinelValue::DeleteField) => sentinel_literal(SentinelValue::DeleteField),
            ValueKind::Sentinel(sentinel) => resolve_sentinel(prior_value, sentinel, now)
                .unwrap_or_else(FirestoreValue::null),
            _ => value.clone(),
        };
        set_value_at_segments(&mut fields, &segments, resolved);
    }
    MapValue::new(fields)
}

/// Applies an `update` write: each field path is replaced (or removed for
/// `DeleteField`) and every other field is left untouched.
pub fn apply_update(
    key_description: &str,
    prior: Option<&MapValue>,
    data: &MapValue,
    field_paths: &[FieldPath],
    now: Timestamp,
) -> FirestoreResult<MapValue> {
    let prior = prior.ok_or_else(|| {
        not_found(format!("No document to update: {key_description}"))
    })?;
    let mut fields = prior.fields().clone();
    for path in field_paths {
        let Some(value) = data.get(path) else {
            continue;
        };
        let resolved = match value.kind() {
            ValueKind::Sentinel(sentinel) => resolve_sentinel(prior.get(path), sentinel, now),
            _ => Some(value.clone()),
        };
        match resolved {
            Some(resolved) => set_value_at_segments(&mut fields, path.segments(), resolved),
            None => delete_value_at_segments(&mut fields, path.segments()),
        }
    }
    Ok(MapValue::new(fields))
}

/// The tagged record a sentinel becomes when it is stored instead of resolved.
pub(crate) fn sentinel_literal(sentinel: SentinelValue) -> FirestoreValue {
    let tag = match sentinel {
        SentinelValue::ServerTimestamp => SENTINEL_SERVER_TIMESTAMP,
        SentinelValue::NumericIncrement(_) => SENTINEL_INCREMENT,
        SentinelValue::ArrayUnion(_) => SENTINEL_ARRAY_UNION,
        SentinelValue::ArrayRemove(_) => SENTINEL_ARRAY_REMOVE,
        SentinelValue::DeleteField => SENTINEL_DELETE,
    };
    FirestoreValue::from_map(BTreeMap::from([(
        SENTINEL_TAG.to_string(),
        FirestoreValue::from_string(tag),
    )]))
}

fn apply_increment(prior: Option<&FirestoreValue>, operand: &FirestoreValue) -> FirestoreValue {
    let base = prior.filter(|value| value.as_f64().is_some());
    match (base.map(FirestoreValue::kind), operand.kind()) {
        (Some(ValueKind::Integer(current)), ValueKind::Integer(delta)) => {
            FirestoreValue::from_integer(current.saturating_add(*delta))
        }
        (None, _) => operand.clone(),
        (Some(_), _) => {
            let current = base.and_then(FirestoreValue::as_f64).unwrap_or_default();
            FirestoreValue::from_double(current + operand.as_f64().unwrap_or_default())
        }
    }
}

fn prior_array(prior: Option<&FirestoreValue>) -> Vec<FirestoreValue> {
    prior
        .and_then(FirestoreValue::as_array)
        .map(|array| array.values().to_vec())
        .unwrap_or_default()
}

fn resolve_map(
    data: &BTreeMap<String, FirestoreValue>,
    prior: Option<&MapValue>,
    now: Timestamp,
) -> BTreeMap<String, FirestoreValue> {
    let mut resolved = BTreeMap::new();
    for (key, value) in data {
        let prior_value = prior.and_then(|map| map.fields().get(key));
        let next = match value.kind() {
            ValueKind::Sentinel(SentinelValue::DeleteField) => {
                Some(sentinel_literal(SentinelValue::DeleteField))
            }
            ValueKind::Sentinel(sentinel) => resolve_sentinel(prior_value, sentinel, now),
            ValueKind::Map(child) => Some(FirestoreValue::from_map(resolve_map(
                child.fields(),
                prior_value.and_then(FirestoreValue::as_map),
                now,
            ))),
            _ => Some(value.clone()),
        };
        if let Some(next) = next {
            resolved.insert(key.clone(), next);
        }
    }
    resolved
}

fn collect_leaves<'a>(
    data: &'a BTreeMap<String, FirestoreValue>,
    prefix: &mut Vec<String>,
    leaves: &mut Vec<(Vec<String>, &'a FirestoreValue)>,
) {
    for (key, value) in data {
        prefix.push(key.clone());
        match value.kind() {
            ValueKind::Map(child) if !child.fields().is_empty() => {
                collect_leaves(child.fields(), prefix, leaves)
            }
            _ => leaves.push((prefix.clone(), value)),
        }
        prefix.pop();
    }
}

fn value_at_segments<'a>(map: &'a MapValue, segments: &[String]) -> Option<&'a FirestoreValue> {
    let path = FieldPath::new(segments.iter().cloned()).ok()?;
    map.get(&path)
}

pub(crate) fn set_value_at_segments(
    fields: &mut BTreeMap<String, FirestoreValue>,
    segments: &[String],
    value: FirestoreValue,
) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }

    let entry = fields
        .entry(first.clone())
        .or_insert_with(|| FirestoreValue::from_map(BTreeMap::new()));
    let mut child_fields = match entry.kind() {
        ValueKind::Map(map) => map.fields().clone(),
        _ => BTreeMap::new(),
    };
    set_value_at_segments(&mut child_fields, rest, value);
    *entry = FirestoreValue::from_map(child_fields);
}

fn delete_value_at_segments(fields: &mut BTreeMap<String, FirestoreValue>, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.remove(first);
        return;
    }
    if let Some(entry) = fields.get_mut(first) {
        if let ValueKind::Map(map) = entry.kind() {
            let mut child_fields = map.fields().clone();
            delete_value_at_segments(&mut child_fields, rest);
            *entry = FirestoreValue::from_map(child_fields);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Timestamp {
        Timestamp::new(1_700_000_000, 0)
    }

    fn doc(entries: Vec<(&str, FirestoreValue)>) -> MapValue {
        MapValue::new(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    fn update(prior: &MapValue, entries: Vec<(&str, FirestoreValue)>) -> MapValue {
        let paths = entries
            .iter()
            .map(|(key, _)| FieldPath::from_dot_separated(key).unwrap())
            .collect::<Vec<_>>();
        let mut data = BTreeMap::new();
        for (path, (_, value)) in paths.iter().zip(entries) {
            set_value_at_segments(&mut data, path.segments(), value);
        }
        apply_update("test/doc", Some(prior), &MapValue::new(data), &paths, now()).unwrap()
    }

    #[test]
    fn increment_adds_to_prior_count() {
        let prior = doc(vec![("count", FirestoreValue::from_integer(10))]);
        let result = update(&prior, vec![("count", FirestoreValue::numeric_increment(5))]);
        assert_eq!(
            result.fields().get("count"),
            Some(&FirestoreValue::from_integer(15))
        );
    }

    #[test]
    fn increment_is_additive() {
        let prior = doc(vec![("count", FirestoreValue::from_integer(7))]);
        let stepwise = update(&prior, vec![("count", FirestoreValue::numeric_increment(3))]);
        let stepwise = update(&stepwise, vec![("count", FirestoreValue::numeric_increment(-9))]);
        let single = update(&prior, vec![("count", FirestoreValue::numeric_increment(-6))]);
        assert_eq!(stepwise, single);
    }

    #[test]
    fn increment_of_missing_or_mixed_numbers() {
        let prior = doc(vec![("ratio", FirestoreValue::from_integer(1))]);
        let result = update(
            &prior,
            vec![
                ("ratio", FirestoreValue::numeric_increment(0.5)),
                ("fresh", FirestoreValue::numeric_increment(2)),
            ],
        );
        assert_eq!(result.fields().get("ratio"), Some(&FirestoreValue::from_double(1.5)));
        assert_eq!(result.fields().get("fresh"), Some(&FirestoreValue::from_integer(2)));
    }

    #[test]
    fn array_union_is_idempotent() {
        let prior = doc(vec![("tags", FirestoreValue::from(vec!["a", "b"]))]);
        let union = || {
            FirestoreValue::array_union(vec![
                FirestoreValue::from("b"),
                FirestoreValue::from("c"),
                FirestoreValue::from("c"),
            ])
        };
        let once = update(&prior, vec![("tags", union())]);
        let twice = update(&once, vec![("tags", union())]);
        assert_eq!(once, twice);
        assert_eq!(
            once.fields().get("tags"),
            Some(&FirestoreValue::from(vec!["a", "b", "c"]))
        );
    }

    #[test]
    fn array_remove_drops_every_match() {
        let prior = doc(vec![("scores", FirestoreValue::from(vec![1, 2, 1, 3]))]);
        let result = update(
            &prior,
            vec![("scores", FirestoreValue::array_remove(vec![FirestoreValue::from_double(1.0)]))],
        );
        assert_eq!(result.fields().get("scores"), Some(&FirestoreValue::from(vec![2, 3])));
    }

    #[test]
    fn delete_field_removes_nested_and_top_level() {
        let prior = doc(vec![
            ("name", FirestoreValue::from("A")),
            (
                "stats",
                FirestoreValue::from_map(BTreeMap::from([
                    ("views".to_string(), FirestoreValue::from_integer(1)),
                    ("likes".to_string(), FirestoreValue::from_integer(2)),
                ])),
            ),
        ]);
        let result = update(
            &prior,
            vec![
                ("name", FirestoreValue::delete_field()),
                ("stats.views", FirestoreValue::delete_field()),
            ],
        );
        assert!(result.fields().get("name").is_none());
        let stats = result.fields().get("stats").and_then(FirestoreValue::as_map).unwrap();
        assert_eq!(stats.fields().len(), 1);
        assert!(stats.fields().contains_key("likes"));
    }

    #[test]
    fn server_timestamp_uses_store_clock() {
        let prior = doc(vec![]);
        let result = update(&prior, vec![("seen", FirestoreValue::server_timestamp())]);
        assert_eq!(result.fields().get("seen"), Some(&FirestoreValue::from_timestamp(now())));
    }

    #[test]
    fn update_requires_existing_document() {
        let err = apply_update("test/doc", None, &MapValue::default(), &[], now()).unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[test]
    fn set_keeps_delete_marker_literally() {
        let data = doc(vec![("gone", FirestoreValue::delete_field())]);
        let result = apply_set(None, &data, false, now());
        let marker = result.fields().get("gone").and_then(FirestoreValue::as_map).unwrap();
        assert_eq!(
            marker.fields().get(SENTINEL_TAG),
            Some(&FirestoreValue::from_string(SENTINEL_DELETE))
        );
    }

    #[test]
    fn merge_set_preserves_untouched_fields() {
        let prior = doc(vec![
            ("name", FirestoreValue::from("A")),
            ("count", FirestoreValue::from_integer(1)),
        ]);
        let data = doc(vec![("count", FirestoreValue::numeric_increment(1))]);
        let merged = apply_set(Some(&prior), &data, true, now());
        assert_eq!(merged.fields().get("name"), Some(&FirestoreValue::from("A")));
        assert_eq!(merged.fields().get("count"), Some(&FirestoreValue::from_integer(2)));

        let replaced = apply_set(Some(&prior), &data, false, now());
        assert!(replaced.fields().get("name").is_none());
        assert_eq!(replaced.fields().get("count"), Some(&FirestoreValue::from_integer(2)));
    }
}
