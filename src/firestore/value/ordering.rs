use std::cmp::Ordering;

use crate::firestore::value::{FirestoreValue, ValueKind};

fn type_rank(value: &FirestoreValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::Array(_) => 7,
        ValueKind::Map(_) => 8,
        ValueKind::Sentinel(_) => 9,
    }
}

/// Total order over values: first by type (null, boolean, number, timestamp,
/// string, bytes, reference, array, map), then by content. Integers and
/// doubles share one numeric space and NaN sorts before every other number.
pub fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left.kind(), right.kind()) {
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => compare_doubles(*a as f64, *b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => compare_doubles(*a, *b as f64),
        (ValueKind::Double(a), ValueKind::Double(b)) => compare_doubles(*a, *b),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.cmp(b),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => a.cmp(b),
        (ValueKind::Array(a), ValueKind::Array(b)) => {
            for (l, r) in a.values().iter().zip(b.values()) {
                let ordering = compare_values(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.values().len().cmp(&b.values().len())
        }
        (ValueKind::Map(a), ValueKind::Map(b)) => {
            for ((lk, lv), (rk, rv)) in a.fields().iter().zip(b.fields()) {
                let ordering = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.fields().len().cmp(&b.fields().len())
        }
        (ValueKind::Sentinel(a), ValueKind::Sentinel(b)) if a == b => Ordering::Equal,
        _ => Ordering::Equal,
    }
}

/// Ordering restricted to values of the same type class, as used by range
/// filters: `price > 100` never matches a string price.
pub fn compare_same_kind(left: &FirestoreValue, right: &FirestoreValue) -> Option<Ordering> {
    if type_rank(left) != type_rank(right) || left.is_sentinel() {
        return None;
    }
    Some(compare_values(left, right))
}

/// Structural equality where `1` and `1.0` are the same value.
pub fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    if left.is_sentinel() || right.is_sentinel() {
        return left == right;
    }
    compare_values(left, right) == Ordering::Equal
}

fn compare_doubles(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}
