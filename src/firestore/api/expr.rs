use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Add, BitAnd, BitOr, Div, Mul, Not, Sub};
use std::sync::Arc;

use crate::firestore::model::{from_wire_name, to_wire_name, Timestamp};
use crate::firestore::value::FirestoreValue;

/// Comparison operators available in predicate expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A value computed by the caller when the predicate is compiled.
#[derive(Clone)]
pub struct Captured(Arc<dyn Fn() -> FirestoreValue + Send + Sync>);

impl Captured {
    pub(crate) fn evaluate(&self) -> FirestoreValue {
        (self.0)()
    }
}

impl Debug for Captured {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Captured(..)")
    }
}

/// Typed predicate and ordering expression.
///
/// Expressions are plain data; nothing is evaluated until a [`Query`] compiles
/// them. Combine predicates with `&`, `|` and `!`, and arithmetic with the
/// usual operators.
///
/// [`Query`]: crate::firestore::api::Query
#[derive(Clone, Debug)]
pub enum Expr {
    /// Reference to a document field, already in wire casing.
    Field(String),
    Constant(FirestoreValue),
    Captured(Captured),
    List(Vec<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `collection.contains(element)`.
    Contains {
        collection: Box<Expr>,
        element: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// References a field by its model name; the name is translated to wire
    /// casing (`UnitPrice` → `unitPrice`).
    pub fn field(name: &str) -> Self {
        Expr::Field(to_wire_name(name))
    }

    /// References a field by its exact stored name.
    pub fn field_verbatim(name: &str) -> Self {
        Expr::Field(name.to_string())
    }

    pub fn lit(value: impl Into<FirestoreValue>) -> Self {
        Expr::Constant(value.into())
    }

    /// A value produced by `capture` when the query is built.
    pub fn captured<F>(capture: F) -> Self
    where
        F: Fn() -> FirestoreValue + Send + Sync + 'static,
    {
        Expr::Captured(Captured(Arc::new(capture)))
    }

    pub fn list<I, E>(items: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        Expr::List(items.into_iter().map(Into::into).collect())
    }

    fn compare(self, op: CompareOp, other: impl Into<Expr>) -> Self {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Ge, other)
    }

    pub fn contains(self, element: impl Into<Expr>) -> Self {
        Expr::Contains {
            collection: Box::new(self),
            element: Box::new(element.into()),
        }
    }

    fn arithmetic(self, op: ArithmeticOp, other: Expr) -> Self {
        Expr::Arithmetic {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }
}

macro_rules! expr_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Constant(value.into())
                }
            }
        )*
    };
}

expr_from_value!(FirestoreValue, bool, i32, i64, f64, &str, String, Timestamp);

impl<T> From<&Field<T>> for Expr {
    fn from(field: &Field<T>) -> Self {
        field.expr()
    }
}

impl<T> From<Field<T>> for Expr {
    fn from(field: Field<T>) -> Self {
        Expr::Field(field.name)
    }
}

impl<R: Into<Expr>> BitAnd<R> for Expr {
    type Output = Expr;

    fn bitand(self, rhs: R) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs.into()))
    }
}

impl<R: Into<Expr>> BitOr<R> for Expr {
    type Output = Expr;

    fn bitor(self, rhs: R) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs.into()))
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

macro_rules! expr_arithmetic {
    ($($trait:ident :: $method:ident => $op:ident),* $(,)?) => {
        $(
            impl<R: Into<Expr>> $trait<R> for Expr {
                type Output = Expr;

                fn $method(self, rhs: R) -> Expr {
                    self.arithmetic(ArithmeticOp::$op, rhs.into())
                }
            }
        )*
    };
}

expr_arithmetic!(Add::add => Add, Sub::sub => Sub, Mul::mul => Mul, Div::div => Div);

/// A field update as accepted by `update_doc`: dot-separated wire path and
/// the value (or sentinel) to write there.
pub type FieldUpdate = (String, FirestoreValue);

/// Typed handle to a document field.
///
/// The type parameter only constrains which operands and update helpers are
/// offered; the stored value is still a [`FirestoreValue`].
pub struct Field<T> {
    name: String,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> Debug for Field<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl<T> Field<T> {
    /// Declares a field by model name, translated to wire casing.
    pub fn new(name: &str) -> Self {
        Self {
            name: to_wire_name(name),
            _type: PhantomData,
        }
    }

    /// Declares a field whose stored name is used as-is.
    pub fn verbatim(name: &str) -> Self {
        Self {
            name: name.to_string(),
            _type: PhantomData,
        }
    }

    /// Wire name of the field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model-side name, for mapping stored fields back onto a model
    /// (`unitPrice` → `UnitPrice`).
    pub fn model_name(&self) -> String {
        from_wire_name(&self.name)
    }

    pub fn expr(&self) -> Expr {
        Expr::Field(self.name.clone())
    }

    /// Removes the field (update only).
    pub fn delete(&self) -> FieldUpdate {
        (self.name.clone(), FirestoreValue::delete_field())
    }
}

impl<T: Into<FirestoreValue>> Field<T> {
    pub fn eq(&self, value: T) -> Expr {
        self.expr().eq(Expr::lit(value))
    }

    pub fn ne(&self, value: T) -> Expr {
        self.expr().ne(Expr::lit(value))
    }

    pub fn lt(&self, value: T) -> Expr {
        self.expr().lt(Expr::lit(value))
    }

    pub fn le(&self, value: T) -> Expr {
        self.expr().le(Expr::lit(value))
    }

    pub fn gt(&self, value: T) -> Expr {
        self.expr().gt(Expr::lit(value))
    }

    pub fn ge(&self, value: T) -> Expr {
        self.expr().ge(Expr::lit(value))
    }

    /// Matches documents whose field equals one of `values`.
    pub fn is_in<I: IntoIterator<Item = T>>(&self, values: I) -> Expr {
        Expr::list(values.into_iter().map(Expr::lit)).contains(self.expr())
    }

    /// Matches documents whose field equals none of `values`.
    pub fn not_in<I: IntoIterator<Item = T>>(&self, values: I) -> Expr {
        !self.is_in(values)
    }

    pub fn set(&self, value: T) -> FieldUpdate {
        (self.name.clone(), value.into())
    }
}

impl<E: Into<FirestoreValue>> Field<Vec<E>> {
    /// Matches documents whose array field contains `element`.
    pub fn contains(&self, element: E) -> Expr {
        self.expr().contains(Expr::lit(element))
    }

    pub fn array_union<I: IntoIterator<Item = E>>(&self, elements: I) -> FieldUpdate {
        let elements = elements.into_iter().map(Into::into).collect();
        (self.name.clone(), FirestoreValue::array_union(elements))
    }

    pub fn array_remove<I: IntoIterator<Item = E>>(&self, elements: I) -> FieldUpdate {
        let elements = elements.into_iter().map(Into::into).collect();
        (self.name.clone(), FirestoreValue::array_remove(elements))
    }
}

impl Field<i64> {
    pub fn increment(&self, delta: i64) -> FieldUpdate {
        (self.name.clone(), FirestoreValue::numeric_increment(delta))
    }
}

impl Field<f64> {
    pub fn increment(&self, delta: f64) -> FieldUpdate {
        (self.name.clone(), FirestoreValue::numeric_increment(delta))
    }
}

impl Field<Timestamp> {
    pub fn server_timestamp(&self) -> FieldUpdate {
        (self.name.clone(), FirestoreValue::server_timestamp())
    }
}

impl Not for Field<bool> {
    type Output = Expr;

    fn not(self) -> Expr {
        !self.expr()
    }
}

impl Not for &Field<bool> {
    type Output = Expr;

    fn not(self) -> Expr {
        !self.expr()
    }
}
