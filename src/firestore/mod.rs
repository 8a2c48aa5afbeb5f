//! Query compiler, transaction coordinator and live listeners over a
//! pluggable document store.

pub mod api;
mod constants;
pub mod error;
pub mod local;
pub mod model;
pub(crate) mod query_evaluator;
pub mod remote;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{
    Bound, DocumentSnapshot, EncodedUpdateData, Expr, Field, FieldFilter, FilterOperator,
    FirestoreClient, FirestoreDataConverter, LimitType, OrderBy, OrderDirection,
    PassthroughConverter, Query, QueryPlan, QuerySnapshot, SerdeConverter, SetOptions,
    Subscription, SubscriptionState, Transaction, WriteBatch,
};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath, Timestamp};
pub use remote::{
    Bridge, BridgeDatastore, BridgeDatastoreBuilder, BridgeError, BridgeListenHandle, Datastore,
    InMemoryDatastore, ListenEvent, ListenSnapshot, ListenTarget, ListenToken, WriteOperation,
};
pub use value::{BytesValue, FirestoreValue, MapValue, SentinelValue, ValueKind};
