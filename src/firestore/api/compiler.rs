use std::cmp::Ordering;

use crate::firestore::api::expr::{ArithmeticOp, CompareOp, Expr};
use crate::firestore::api::query::{FieldFilter, FilterOperator, OrderBy, OrderDirection};
use crate::firestore::error::{invalid_plan, FirestoreError, FirestoreResult};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{compare_values, values_equal, FirestoreValue, ValueKind};

/// Compiles a predicate into the clauses of a query plan, in source order.
pub(crate) fn compile_predicate(expr: &Expr) -> FirestoreResult<Vec<FieldFilter>> {
    let mut filters = Vec::new();
    compile_into(expr, &mut filters)?;
    Ok(filters)
}

/// Extracts the ordering field; anything but a bare field is rejected.
pub(crate) fn compile_order(expr: &Expr, direction: OrderDirection) -> FirestoreResult<OrderBy> {
    match expr {
        Expr::Field(name) => Ok(OrderBy::new(field_path(name)?, direction)),
        other => Err(invalid_plan(format!(
            "Ordering requires a direct field reference, got {}",
            describe(other)
        ))),
    }
}

fn compile_into(expr: &Expr, filters: &mut Vec<FieldFilter>) -> FirestoreResult<()> {
    match expr {
        Expr::And(left, right) => {
            compile_into(left, filters)?;
            compile_into(right, filters)
        }
        Expr::Or(_, _) => Err(invalid_plan(
            "Disjunctions (OR) are not supported by the backing store; run separate queries instead",
        )),
        Expr::Compare { op, left, right } => {
            filters.push(compile_comparison(*op, left, right)?);
            Ok(())
        }
        Expr::Contains {
            collection,
            element,
        } => {
            filters.push(compile_contains(collection, element, false)?);
            Ok(())
        }
        Expr::Not(inner) => compile_negation(inner, filters),
        Expr::Field(name) => {
            filters.push(FieldFilter::new(
                field_path(name)?,
                FilterOperator::Equal,
                FirestoreValue::from_bool(true),
            )?);
            Ok(())
        }
        other => Err(invalid_plan(format!(
            "Predicate {} does not reference any field",
            describe(other)
        ))),
    }
}

fn compile_negation(inner: &Expr, filters: &mut Vec<FieldFilter>) -> FirestoreResult<()> {
    match inner {
        Expr::Not(expr) => compile_into(expr, filters),
        Expr::Compare {
            op: CompareOp::Eq,
            left,
            right,
        } => {
            filters.push(compile_comparison(CompareOp::Ne, left, right)?);
            Ok(())
        }
        Expr::Compare {
            op: CompareOp::Ne,
            left,
            right,
        } => {
            filters.push(compile_comparison(CompareOp::Eq, left, right)?);
            Ok(())
        }
        Expr::Contains {
            collection,
            element,
        } => {
            filters.push(compile_contains(collection, element, true)?);
            Ok(())
        }
        Expr::Field(name) => {
            filters.push(FieldFilter::new(
                field_path(name)?,
                FilterOperator::Equal,
                FirestoreValue::from_bool(false),
            )?);
            Ok(())
        }
        other => Err(invalid_plan(format!(
            "Negation of {} cannot be expressed as a query clause",
            describe(other)
        ))),
    }
}

fn compile_comparison(op: CompareOp, left: &Expr, right: &Expr) -> FirestoreResult<FieldFilter> {
    let operator = filter_operator(op);
    match (left, right) {
        (Expr::Field(l), Expr::Field(r)) => Err(invalid_plan(format!(
            "Comparison between two fields ('{l}' and '{r}') is not supported"
        ))),
        (Expr::Field(name), constant) => {
            FieldFilter::new(field_path(name)?, operator, reduce_constant(constant)?)
        }
        (constant, Expr::Field(name)) => {
            FieldFilter::new(field_path(name)?, operator.mirrored(), reduce_constant(constant)?)
        }
        _ => Err(invalid_plan(
            "Comparison must have a direct field reference on exactly one side",
        )),
    }
}

fn compile_contains(collection: &Expr, element: &Expr, negated: bool) -> FirestoreResult<FieldFilter> {
    match (collection, element, negated) {
        (Expr::Field(name), constant, false) if !matches!(constant, Expr::Field(_)) => {
            FieldFilter::new(
                field_path(name)?,
                FilterOperator::ArrayContains,
                reduce_constant(constant)?,
            )
        }
        (constant, Expr::Field(name), _) if !matches!(constant, Expr::Field(_)) => {
            let operand = reduce_constant(constant)?;
            if !matches!(operand.kind(), ValueKind::Array(_)) {
                return Err(invalid_plan(format!(
                    "contains() on '{name}' requires a list of constants as the receiver"
                )));
            }
            let operator = if negated {
                FilterOperator::NotIn
            } else {
                FilterOperator::In
            };
            FieldFilter::new(field_path(name)?, operator, operand)
        }
        (Expr::Field(name), _, true) => Err(invalid_plan(format!(
            "Negated array-contains on '{name}' is not supported"
        ))),
        _ => Err(invalid_plan(
            "contains() must be called on a field with a constant, or on a list of constants with a field",
        )),
    }
}

/// Folds a field-free sub-expression to the value it denotes.
fn reduce_constant(expr: &Expr) -> FirestoreResult<FirestoreValue> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Captured(captured) => Ok(captured.evaluate()),
        Expr::List(items) => items
            .iter()
            .map(reduce_constant)
            .collect::<FirestoreResult<Vec<_>>>()
            .map(FirestoreValue::from_array),
        Expr::Arithmetic { op, left, right } => {
            fold_arithmetic(*op, reduce_constant(left)?, reduce_constant(right)?)
        }
        Expr::Compare { op, left, right } => {
            let left = reduce_constant(left)?;
            let right = reduce_constant(right)?;
            Ok(FirestoreValue::from_bool(evaluate_comparison(*op, &left, &right)))
        }
        Expr::Not(inner) => match reduce_constant(inner)?.as_bool() {
            Some(value) => Ok(FirestoreValue::from_bool(!value)),
            None => Err(invalid_plan("Negation of a non-boolean constant")),
        },
        Expr::Field(name) => Err(invalid_plan(format!(
            "Field '{name}' cannot appear inside a computed operand"
        ))),
        other => Err(invalid_plan(format!(
            "{} cannot be reduced to a constant",
            describe(other)
        ))),
    }
}

fn evaluate_comparison(op: CompareOp, left: &FirestoreValue, right: &FirestoreValue) -> bool {
    let ordering = compare_values(left, right);
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn fold_arithmetic(
    op: ArithmeticOp,
    left: FirestoreValue,
    right: FirestoreValue,
) -> FirestoreResult<FirestoreValue> {
    match (left.kind(), right.kind()) {
        (ValueKind::Integer(a), ValueKind::Integer(b)) => {
            let result = match op {
                ArithmeticOp::Add => a.checked_add(*b),
                ArithmeticOp::Sub => a.checked_sub(*b),
                ArithmeticOp::Mul => a.checked_mul(*b),
                ArithmeticOp::Div => a.checked_div(*b),
            };
            result
                .map(FirestoreValue::from_integer)
                .ok_or_else(|| arithmetic_error(op, &left, &right))
        }
        (ValueKind::String(a), ValueKind::String(b)) if op == ArithmeticOp::Add => {
            Ok(FirestoreValue::from_string(format!("{a}{b}")))
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(FirestoreValue::from_double(match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Sub => a - b,
                ArithmeticOp::Mul => a * b,
                ArithmeticOp::Div => a / b,
            })),
            _ => Err(arithmetic_error(op, &left, &right)),
        },
    }
}

fn arithmetic_error(op: ArithmeticOp, left: &FirestoreValue, right: &FirestoreValue) -> FirestoreError {
    invalid_plan(format!(
        "Cannot fold {op:?} over {:?} and {:?}",
        left.kind(),
        right.kind()
    ))
}

fn filter_operator(op: CompareOp) -> FilterOperator {
    match op {
        CompareOp::Eq => FilterOperator::Equal,
        CompareOp::Ne => FilterOperator::NotEqual,
        CompareOp::Lt => FilterOperator::LessThan,
        CompareOp::Le => FilterOperator::LessThanOrEqual,
        CompareOp::Gt => FilterOperator::GreaterThan,
        CompareOp::Ge => FilterOperator::GreaterThanOrEqual,
    }
}

fn field_path(name: &str) -> FirestoreResult<FieldPath> {
    FieldPath::from_dot_separated(name)
        .map_err(|err| invalid_plan(format!("Invalid field reference '{name}': {}", err.message())))
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Field(_) => "a field reference",
        Expr::Constant(_) => "a constant",
        Expr::Captured(_) => "a captured value",
        Expr::List(_) => "a list",
        Expr::Compare { .. } => "a comparison",
        Expr::Arithmetic { .. } => "an arithmetic expression",
        Expr::Contains { .. } => "a contains() call",
        Expr::And(_, _) => "a conjunction",
        Expr::Or(_, _) => "a disjunction",
        Expr::Not(_) => "a negation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::expr::Field;

    fn single(expr: Expr) -> FieldFilter {
        let mut filters = compile_predicate(&expr).expect("compiles");
        assert_eq!(filters.len(), 1);
        filters.remove(0)
    }

    #[test]
    fn conjunction_flattens_in_order() {
        let price: Field<i64> = Field::new("Price");
        let category: Field<&str> = Field::new("Category");
        let filters = compile_predicate(&(price.gt(100) & category.eq("tools") & price.le(500))).unwrap();
        let shape: Vec<_> = filters
            .iter()
            .map(|f| (f.field().canonical_string(), f.operator()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("price".to_string(), FilterOperator::GreaterThan),
                ("category".to_string(), FilterOperator::Equal),
                ("price".to_string(), FilterOperator::LessThanOrEqual),
            ]
        );
    }

    #[test]
    fn disjunction_is_rejected() {
        let price: Field<i64> = Field::new("Price");
        let err = compile_predicate(&(price.eq(1) | price.eq(2))).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-plan");
    }

    #[test]
    fn field_on_the_right_mirrors_the_operator() {
        let filter = single(Expr::lit(5).gt(Expr::field("Stock")));
        assert_eq!(filter.field().canonical_string(), "stock");
        assert_eq!(filter.operator(), FilterOperator::LessThan);
        assert_eq!(filter.value(), &FirestoreValue::from_integer(5));
    }

    #[test]
    fn folds_captured_and_arithmetic_operands() {
        let base = 40;
        let filter = single(Expr::field("Price").ge(Expr::captured(move || base.into()) * 2 + 20));
        assert_eq!(filter.value(), &FirestoreValue::from_integer(100));
    }

    #[test]
    fn rejects_two_fields_and_no_fields() {
        let both = Expr::field("a").eq(Expr::field("b"));
        assert!(compile_predicate(&both).is_err());
        let neither = Expr::lit(1).eq(1);
        assert!(compile_predicate(&neither).is_err());
        assert!(compile_predicate(&Expr::lit(true)).is_err());
    }

    #[test]
    fn contains_shapes() {
        let tags: Field<Vec<&str>> = Field::new("Tags");
        let contains = single(tags.contains("new"));
        assert_eq!(contains.operator(), FilterOperator::ArrayContains);

        let status: Field<&str> = Field::new("Status");
        let is_in = single(status.is_in(["open", "held"]));
        assert_eq!(is_in.operator(), FilterOperator::In);
        assert_eq!(
            is_in.value(),
            &FirestoreValue::from_array(vec!["open".into(), "held".into()])
        );

        let not_in = single(status.not_in(["closed"]));
        assert_eq!(not_in.operator(), FilterOperator::NotIn);

        let negated_contains = !tags.contains("old");
        assert!(compile_predicate(&negated_contains).is_err());
    }

    #[test]
    fn negations() {
        let price: Field<i64> = Field::new("Price");
        assert_eq!(single(!price.eq(3)).operator(), FilterOperator::NotEqual);
        assert_eq!(single(!price.ne(3)).operator(), FilterOperator::Equal);
        assert_eq!(single(!!price.lt(3)).operator(), FilterOperator::LessThan);
        assert!(compile_predicate(&!price.lt(3)).is_err());
    }

    #[test]
    fn bare_boolean_fields() {
        let active: Field<bool> = Field::new("Active");
        let positive = single(active.expr());
        assert_eq!(positive.operator(), FilterOperator::Equal);
        assert_eq!(positive.value(), &FirestoreValue::from_bool(true));
        let negative = single(!&active);
        assert_eq!(negative.value(), &FirestoreValue::from_bool(false));
    }

    #[test]
    fn ordering_requires_bare_field() {
        let order = compile_order(&Expr::field("Price"), OrderDirection::Descending).unwrap();
        assert_eq!(order.field().canonical_string(), "price");
        let err = compile_order(&(Expr::field("Price") + 1), OrderDirection::Ascending).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-plan");
    }
}
