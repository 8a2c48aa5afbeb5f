use std::sync::Arc;

use crate::firestore::api::compiler;
use crate::firestore::api::expr::Expr;
use crate::firestore::api::snapshot::DocumentSnapshot;
use crate::firestore::error::{invalid_argument, invalid_plan, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::firestore::value::{FirestoreValue, ValueKind};

/// Comparison operators understood by every executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    /// Name of the operator in the structured query wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    /// The operator to use when the operands swap sides (`5 > f` is `f < 5`).
    pub fn mirrored(&self) -> Self {
        match self {
            FilterOperator::LessThan => FilterOperator::GreaterThan,
            FilterOperator::LessThanOrEqual => FilterOperator::GreaterThanOrEqual,
            FilterOperator::GreaterThan => FilterOperator::LessThan,
            FilterOperator::GreaterThanOrEqual => FilterOperator::LessThanOrEqual,
            other => *other,
        }
    }

    fn takes_array_operand(&self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

/// One `(field, operator, operand)` constraint of a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn new(
        field: FieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<Self> {
        if value.is_sentinel() {
            return Err(invalid_plan(format!(
                "Sentinel values cannot be used as filter operands (field '{field}')"
            )));
        }
        if operator.takes_array_operand() {
            match value.kind() {
                ValueKind::Array(array) if !array.values().is_empty() => {}
                _ => {
                    return Err(invalid_plan(format!(
                        "Operator {} on '{field}' requires a non-empty array operand",
                        operator.as_str()
                    )))
                }
            }
        }
        Ok(Self {
            field,
            operator,
            value,
        })
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    pub(crate) fn flipped(&self) -> Self {
        match self {
            OrderDirection::Ascending => OrderDirection::Descending,
            OrderDirection::Descending => OrderDirection::Ascending,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A pagination cursor: one value per ordering field, and whether documents
/// equal to the cursor are part of the result.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    values: Vec<FirestoreValue>,
    inclusive: bool,
}

impl Bound {
    pub fn new(values: Vec<FirestoreValue>, inclusive: bool) -> Self {
        Self { values, inclusive }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitType {
    #[default]
    First,
    Last,
}

/// The compiled, backend-agnostic description of a query.
///
/// Plans are immutable: every `with_*` method returns a new plan and leaves
/// the receiver untouched, so a plan can be shared freely between builders,
/// executors and listeners.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPlan {
    filters: Arc<Vec<FieldFilter>>,
    order_by: Arc<Vec<OrderBy>>,
    limit: Option<u32>,
    limit_type: LimitType,
    offset: Option<u32>,
    start_at: Option<Bound>,
    end_at: Option<Bound>,
}

impl QueryPlan {
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    pub(crate) fn with_filters(&self, filters: Vec<FieldFilter>) -> Self {
        let mut next = self.clone();
        let mut combined = self.filters.as_ref().clone();
        combined.extend(filters);
        next.filters = Arc::new(combined);
        next
    }

    pub(crate) fn with_order_by(&self, order: OrderBy) -> Self {
        let mut next = self.clone();
        let mut combined = self.order_by.as_ref().clone();
        combined.push(order);
        next.order_by = Arc::new(combined);
        next
    }

    pub(crate) fn with_limit(&self, limit: u32, limit_type: LimitType) -> Self {
        Self {
            limit: Some(limit),
            limit_type,
            ..self.clone()
        }
    }

    pub(crate) fn with_offset(&self, offset: u32) -> Self {
        Self {
            offset: Some(offset),
            ..self.clone()
        }
    }

    pub(crate) fn with_start_at(&self, bound: Bound) -> Self {
        Self {
            start_at: Some(bound),
            ..self.clone()
        }
    }

    pub(crate) fn with_end_at(&self, bound: Bound) -> Self {
        Self {
            end_at: Some(bound),
            ..self.clone()
        }
    }

    /// Checks the structural invariants every executor relies on.
    pub fn validate(&self) -> FirestoreResult<()> {
        let has_cursor = self.start_at.is_some() || self.end_at.is_some();
        if has_cursor && self.order_by.is_empty() {
            return Err(invalid_plan(
                "Cursors (start_at/start_after/end_at/end_before) require at least one order_by clause",
            ));
        }
        for bound in self.start_at.iter().chain(self.end_at.iter()) {
            if bound.values().len() > self.order_by.len() {
                return Err(invalid_plan(format!(
                    "Cursor has {} values but the query only orders by {} fields",
                    bound.values().len(),
                    self.order_by.len()
                )));
            }
        }
        if self.limit_type == LimitType::Last && self.limit.is_some() && self.order_by.is_empty() {
            return Err(invalid_plan("limit_to_last requires at least one order_by clause"));
        }
        Ok(())
    }
}

/// A query over the documents directly inside one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection_path: ResourcePath,
    plan: QueryPlan,
}

impl Query {
    /// Starts an unfiltered query over the collection at `path`.
    pub fn collection(path: &str) -> FirestoreResult<Self> {
        let collection_path = ResourcePath::from_string(path)?;
        if collection_path.len() % 2 == 0 {
            return Err(invalid_argument(format!(
                "Queries must reference a collection (odd number of path segments), got '{path}'"
            )));
        }
        Ok(Self {
            collection_path,
            plan: QueryPlan::default(),
        })
    }

    /// Returns the full resource path to the targeted collection.
    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// The identifier (last segment) of the targeted collection.
    pub fn collection_id(&self) -> &str {
        self.collection_path.last_segment().unwrap_or_default()
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub(crate) fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }

    fn with_plan(&self, plan: QueryPlan) -> Self {
        Self {
            collection_path: self.collection_path.clone(),
            plan,
        }
    }

    /// Compiles a predicate and adds its clauses to the query.
    ///
    /// Conjunctions become independent clauses; any shape the backing store
    /// cannot evaluate natively (disjunctions, computed fields, unsupported
    /// `contains` forms) fails with `firestore/invalid-plan`.
    pub fn where_expr(&self, predicate: impl Into<Expr>) -> FirestoreResult<Self> {
        let filters = compiler::compile_predicate(&predicate.into())?;
        Ok(self.with_plan(self.plan.with_filters(filters)))
    }

    /// Adds a single clause without going through the expression compiler.
    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Self> {
        let filter = FieldFilter::new(field.into_field_path()?, operator, value.into())?;
        Ok(self.with_plan(self.plan.with_filters(vec![filter])))
    }

    pub fn order_by(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        let order = OrderBy::new(field.into_field_path()?, direction);
        Ok(self.with_plan(self.plan.with_order_by(order)))
    }

    /// Orders by the field referenced by `expr`, which must be a bare field.
    pub fn order_by_expr(
        &self,
        expr: impl Into<Expr>,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        let order = compiler::compile_order(&expr.into(), direction)?;
        Ok(self.with_plan(self.plan.with_order_by(order)))
    }

    pub fn limit(&self, limit: u32) -> FirestoreResult<Self> {
        if limit == 0 {
            return Err(invalid_plan("limit must be greater than zero"));
        }
        Ok(self.with_plan(self.plan.with_limit(limit, LimitType::First)))
    }

    /// Keeps the last `limit` documents of the ordered result.
    pub fn limit_to_last(&self, limit: u32) -> FirestoreResult<Self> {
        if limit == 0 {
            return Err(invalid_plan("limit_to_last must be greater than zero"));
        }
        if self.plan.order_by.is_empty() {
            return Err(invalid_plan("limit_to_last requires at least one order_by clause"));
        }
        Ok(self.with_plan(self.plan.with_limit(limit, LimitType::Last)))
    }

    /// Skips the first `offset` results.
    ///
    /// Only the in-memory store evaluates offsets; the remote store rejects
    /// such plans because cursors are the supported pagination mechanism.
    pub fn skip(&self, offset: u32) -> FirestoreResult<Self> {
        Ok(self.with_plan(self.plan.with_offset(offset)))
    }

    pub fn start_at<I, V>(&self, values: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        let bound = self.cursor("start_at", values, true)?;
        Ok(self.with_plan(self.plan.with_start_at(bound)))
    }

    pub fn start_after<I, V>(&self, values: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        let bound = self.cursor("start_after", values, false)?;
        Ok(self.with_plan(self.plan.with_start_at(bound)))
    }

    pub fn end_at<I, V>(&self, values: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        let bound = self.cursor("end_at", values, true)?;
        Ok(self.with_plan(self.plan.with_end_at(bound)))
    }

    pub fn end_before<I, V>(&self, values: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        let bound = self.cursor("end_before", values, false)?;
        Ok(self.with_plan(self.plan.with_end_at(bound)))
    }

    fn cursor<I, V>(&self, method: &str, values: I, inclusive: bool) -> FirestoreResult<Bound>
    where
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        if self.plan.order_by.is_empty() {
            return Err(invalid_plan(format!(
                "{method}() requires the query to be ordered; call order_by() first"
            )));
        }
        let values: Vec<FirestoreValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(invalid_plan(format!("{method}() requires at least one value")));
        }
        if values.len() > self.plan.order_by.len() {
            return Err(invalid_plan(format!(
                "{method}() has {} values but the query only orders by {} fields",
                values.len(),
                self.plan.order_by.len()
            )));
        }
        if values.iter().any(FirestoreValue::is_sentinel) {
            return Err(invalid_plan(format!("{method}() values cannot be sentinels")));
        }
        Ok(Bound::new(values, inclusive))
    }
}

/// The documents returned by running a query, in result order.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    query: Query,
    documents: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn new(query: Query, documents: Vec<DocumentSnapshot>) -> Self {
        Self { query, documents }
    }

    /// Returns the query used to obtain this snapshot.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Document ids in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(DocumentSnapshot::id).collect()
    }

    pub fn into_documents(self) -> Vec<DocumentSnapshot> {
        self.documents
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocumentSnapshot;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}
