//! # firestore-client-core
//!
//! Client-side query, transaction and live-listener layer for a document
//! store. Documents live under slash-separated paths and hold structured
//! key/value records.
//!
//! - Typed predicates ([`firestore::Field`], [`firestore::Expr`]) compile into
//!   an immutable [`firestore::QueryPlan`] scoped to a collection
//!   ([`firestore::Query`]).
//! - Plans run against any [`firestore::Datastore`]: the local
//!   [`firestore::InMemoryDatastore`] evaluates them itself, while
//!   [`firestore::BridgeDatastore`] serializes them for a remote backend
//!   reached through a [`firestore::Bridge`].
//! - [`firestore::FirestoreClient::run_transaction`] runs read-then-write
//!   logic as one all-or-nothing unit.
//! - [`firestore::Subscription`] keeps a live listener and tears it down
//!   cleanly even when disposal races registration.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use firestore_client_core::firestore::{
//!     Field, FirestoreClient, FirestoreResult, FirestoreValue, OrderDirection, Query,
//! };
//!
//! # async fn run() -> FirestoreResult<()> {
//! let client = FirestoreClient::with_in_memory();
//! client
//!     .set_doc(
//!         "products/a",
//!         BTreeMap::from([("price".into(), FirestoreValue::from_integer(100))]),
//!         None,
//!     )
//!     .await?;
//!
//! let price = Field::<i64>::new("Price");
//! let query = Query::collection("products")?
//!     .where_expr(price.ge(50))?
//!     .order_by("price", OrderDirection::Ascending)?;
//! let snapshot = client.get_docs(&query).await?;
//! assert_eq!(snapshot.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod firestore;

pub mod util;
