use std::cmp::Ordering;

use crate::firestore::api::query::{
    Bound, FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, Query,
};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::{FieldPath, ResourcePath};
use crate::firestore::value::{compare_same_kind, compare_values, values_equal, FirestoreValue, ValueKind};

/// Evaluates `query` over candidate documents and returns the filtered,
/// ordered and bounded result set.
///
/// Only existing documents directly inside the queried collection are
/// considered. Results follow the order-by chain with the document path as
/// the final tie-breaker; documents missing an ordered field are excluded.
pub(crate) fn apply_query_to_documents(
    documents: Vec<DocumentSnapshot>,
    query: &Query,
) -> FirestoreResult<Vec<DocumentSnapshot>> {
    let plan = query.plan();
    plan.validate()?;

    let mut filtered: Vec<DocumentSnapshot> = documents
        .into_iter()
        .filter(|snapshot| snapshot.exists() && query.matches_collection(snapshot.key()))
        .filter(|snapshot| document_satisfies_filters(snapshot, plan.filters()))
        .filter(|snapshot| {
            plan.order_by()
                .iter()
                .all(|order| get_field_value(snapshot, order.field()).is_some())
        })
        .collect();

    filtered.sort_by(|left, right| compare_snapshots(left, right, plan.order_by()));

    if let Some(bound) = plan.start_at() {
        filtered.retain(|snapshot| !is_before_start_bound(snapshot, bound, plan.order_by()));
    }

    if let Some(bound) = plan.end_at() {
        filtered.retain(|snapshot| !is_after_end_bound(snapshot, bound, plan.order_by()));
    }

    if let Some(offset) = plan.offset() {
        let offset = (offset as usize).min(filtered.len());
        filtered.drain(0..offset);
    }

    if let Some(limit) = plan.limit() {
        let limit = limit as usize;
        if filtered.len() > limit {
            match plan.limit_type() {
                LimitType::First => filtered.truncate(limit),
                LimitType::Last => {
                    let start = filtered.len() - limit;
                    filtered.drain(0..start);
                }
            }
        }
    }

    Ok(filtered)
}

/// Whether a single document satisfies every clause; missing fields never
/// match.
pub(crate) fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[FieldFilter]) -> bool {
    filters.iter().all(|filter| {
        get_field_value(snapshot, filter.field())
            .map(|value| evaluate_filter(filter, &value))
            .unwrap_or(false)
    })
}

fn evaluate_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    let operand = filter.value();
    match filter.operator() {
        FilterOperator::Equal => values_equal(value, operand),
        FilterOperator::NotEqual => !values_equal(value, operand),
        FilterOperator::LessThan => compare_same_kind(value, operand) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_same_kind(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => compare_same_kind(value, operand) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_same_kind(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => value
            .as_array()
            .map(|array| array.contains(operand))
            .unwrap_or(false),
        FilterOperator::ArrayContainsAny => match (value.as_array(), operand.as_array()) {
            (Some(array), Some(needles)) => needles.values().iter().any(|needle| array.contains(needle)),
            _ => false,
        },
        FilterOperator::In => operand
            .as_array()
            .map(|candidates| candidates.contains(value))
            .unwrap_or(false),
        FilterOperator::NotIn => match operand.as_array() {
            Some(candidates) => !value.is_null() && !candidates.contains(value),
            None => false,
        },
    }
}

fn get_field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> Option<FirestoreValue> {
    if field.is_document_id() {
        return Some(FirestoreValue::from_reference(snapshot.path()));
    }
    snapshot.map_value()?.get(field).cloned()
}

fn compare_snapshots(left: &DocumentSnapshot, right: &DocumentSnapshot, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = get_field_value(left, order.field()).unwrap_or_else(FirestoreValue::null);
        let right_value = get_field_value(right, order.field()).unwrap_or_else(FirestoreValue::null);
        let ordering = directed(compare_values(&left_value, &right_value), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    ResourcePath::comparator(left.key().path(), right.key().path())
}

fn directed(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Ascending => ordering,
        OrderDirection::Descending => ordering.reverse(),
    }
}

fn is_before_start_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_snapshot_to_bound(snapshot, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Less
    } else {
        ordering != Ordering::Greater
    }
}

fn is_after_end_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_snapshot_to_bound(snapshot, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Greater
    } else {
        ordering != Ordering::Less
    }
}

/// Compares a document with a cursor position using every cursor value
/// against the matching order-by field, in the query's direction.
fn compare_snapshot_to_bound(snapshot: &DocumentSnapshot, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (order, bound_value) in order_by.iter().zip(bound.values()) {
        let snapshot_value = get_field_value(snapshot, order.field()).unwrap_or_else(FirestoreValue::null);
        let bound_value = match (order.field().is_document_id(), bound_value.kind()) {
            (true, ValueKind::String(id)) if !id.contains('/') => FirestoreValue::from_reference(
                snapshot.key().collection_path().child([id.as_str()]).canonical_string(),
            ),
            _ => bound_value.clone(),
        };
        let ordering = directed(compare_values(&snapshot_value, &bound_value), order.direction());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
