pub(crate) mod compiler;
mod converter;
pub mod document;
pub mod expr;
pub(crate) mod operations;
pub(crate) mod query;
mod snapshot;
mod subscription;
pub(crate) mod transaction;
mod write_batch;

pub use converter::{FirestoreDataConverter, PassthroughConverter, SerdeConverter};
pub use document::FirestoreClient;
pub use expr::{ArithmeticOp, Captured, CompareOp, Expr, Field, FieldUpdate};
pub use operations::{encode_set_data, encode_update_document_data, EncodedUpdateData, SetOptions};
pub use query::{
    Bound, FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, Query, QueryPlan,
    QuerySnapshot,
};
pub use snapshot::DocumentSnapshot;
pub use subscription::{Subscription, SubscriptionState};
pub use transaction::Transaction;
pub use write_batch::WriteBatch;
