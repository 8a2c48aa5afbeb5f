use serde_json::{json, Map, Value as JsonValue};

use crate::firestore::api::query::{Bound, FieldFilter, FilterOperator, LimitType, OrderBy, Query};
use crate::firestore::error::{invalid_plan, FirestoreResult};
use crate::firestore::remote::serializer::encode_value;
use crate::firestore::value::ValueKind;

/// Builds the `query` request for `query`.
///
/// `limit_to_last` has no wire form: the request is sent with every
/// direction flipped and the cursors swapped, and the caller reverses the
/// results it gets back.
pub(crate) fn encode_query_request(query: &Query) -> FirestoreResult<JsonValue> {
    let parent = query.collection_path().without_last().canonical_string();
    Ok(json!({
        "parent": parent,
        "structuredQuery": encode_structured_query(query)?,
    }))
}

pub(crate) fn encode_structured_query(query: &Query) -> FirestoreResult<JsonValue> {
    let plan = query.plan();
    plan.validate()?;
    if plan.offset().is_some() {
        return Err(invalid_plan(
            "Offsets are not supported by the remote store; paginate with cursors instead",
        ));
    }

    let mut structured = Map::new();
    structured.insert(
        "from".to_string(),
        json!([{ "collectionId": query.collection_id() }]),
    );

    if !plan.filters().is_empty() {
        structured.insert("where".to_string(), encode_filters(plan.filters())?);
    }

    let reversed = plan.limit_type() == LimitType::Last && plan.limit().is_some();
    if !plan.order_by().is_empty() {
        let orders = plan
            .order_by()
            .iter()
            .map(|order| encode_order(order, reversed))
            .collect::<Vec<_>>();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));
    }

    if let Some(limit) = plan.limit() {
        structured.insert("limit".to_string(), json!(limit));
    }

    let (start, end) = if reversed {
        (plan.end_at(), plan.start_at())
    } else {
        (plan.start_at(), plan.end_at())
    };
    if let Some(start) = start {
        structured.insert("startAt".to_string(), encode_cursor(start, true)?);
    }
    if let Some(end) = end {
        structured.insert("endAt".to_string(), encode_cursor(end, false)?);
    }

    Ok(JsonValue::Object(structured))
}

fn encode_filters(filters: &[FieldFilter]) -> FirestoreResult<JsonValue> {
    if filters.len() == 1 {
        return encode_field_filter(&filters[0]);
    }

    let nested = filters
        .iter()
        .map(encode_field_filter)
        .collect::<FirestoreResult<Vec<_>>>()?;

    Ok(json!({
        "compositeFilter": {
            "op": "AND",
            "filters": nested
        }
    }))
}

fn encode_field_filter(filter: &FieldFilter) -> FirestoreResult<JsonValue> {
    let field = json!({ "fieldPath": filter.field().canonical_string() });
    if let Some(op) = unary_operator(filter) {
        return Ok(json!({ "unaryFilter": { "field": field, "op": op } }));
    }
    Ok(json!({
        "fieldFilter": {
            "field": field,
            "op": filter.operator().as_str(),
            "value": encode_value(filter.value())?
        }
    }))
}

/// Equality against null or NaN travels as a unary filter.
fn unary_operator(filter: &FieldFilter) -> Option<&'static str> {
    let is_nan = matches!(filter.value().kind(), ValueKind::Double(value) if value.is_nan());
    match (filter.operator(), filter.value().is_null(), is_nan) {
        (FilterOperator::Equal, true, _) => Some("IS_NULL"),
        (FilterOperator::NotEqual, true, _) => Some("IS_NOT_NULL"),
        (FilterOperator::Equal, _, true) => Some("IS_NAN"),
        (FilterOperator::NotEqual, _, true) => Some("IS_NOT_NAN"),
        _ => None,
    }
}

fn encode_order(order: &OrderBy, reversed: bool) -> JsonValue {
    let direction = if reversed {
        order.direction().flipped()
    } else {
        order.direction()
    };
    json!({
        "field": { "fieldPath": order.field().canonical_string() },
        "direction": direction.as_str(),
    })
}

fn encode_cursor(bound: &Bound, start: bool) -> FirestoreResult<JsonValue> {
    let values = bound
        .values()
        .iter()
        .map(encode_value)
        .collect::<FirestoreResult<Vec<_>>>()?;
    Ok(json!({
        "values": values,
        "before": if start { bound.inclusive() } else { !bound.inclusive() },
    }))
}
