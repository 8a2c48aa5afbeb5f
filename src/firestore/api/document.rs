use std::collections::BTreeMap;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tokio_util::sync::CancellationToken;

use crate::firestore::api::converter::FirestoreDataConverter;
use crate::firestore::api::operations::{self, SetOptions};
use crate::firestore::api::query::{Query, QuerySnapshot};
use crate::firestore::api::snapshot::DocumentSnapshot;
use crate::firestore::api::subscription::{Observer, Subscription};
use crate::firestore::api::transaction::{self, Transaction};
use crate::firestore::constants::AUTO_ID_LENGTH;
use crate::firestore::error::{cancelled, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{Datastore, InMemoryDatastore, ListenSnapshot, ListenTarget};
use crate::firestore::value::FirestoreValue;

use super::write_batch::WriteBatch;

/// Fails with `firestore/cancelled` once `token` has been cancelled.
pub(crate) fn ensure_not_cancelled(token: Option<&CancellationToken>, operation: &str) -> FirestoreResult<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(cancelled(format!("{operation} was cancelled"))),
        _ => Ok(()),
    }
}

/// Entry point for reads, writes, queries, transactions and listeners
/// against one backing store.
#[derive(Clone)]
pub struct FirestoreClient {
    datastore: Arc<dyn Datastore>,
    cancellation: Option<CancellationToken>,
}

impl FirestoreClient {
    /// Creates a client backed by the supplied datastore implementation.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            cancellation: None,
        }
    }

    /// Returns a client that stores documents in memory only.
    ///
    /// Useful for tests, where queries are evaluated by the local reference
    /// executor.
    pub fn with_in_memory() -> Self {
        Self::new(Arc::new(InMemoryDatastore::new()))
    }

    /// Attaches a cancellation signal checked at the start of every
    /// operation. Calls already handed to the store are not aborted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Creates a new write batch that commits through this client's store.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(Arc::clone(&self.datastore), self.cancellation.clone())
    }

    /// Fetches the document located at `path`.
    ///
    /// Returns a snapshot that may or may not contain data depending on whether
    /// the document exists.
    pub async fn get_doc(&self, path: &str) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_active("get")?;
        let key = operations::validate_document_path(path)?;
        self.datastore.get_document(&key).await
    }

    /// Writes the provided map of fields into the document at `path`.
    ///
    /// Without merge the document is replaced; with `SetOptions::merge_all()`
    /// each provided leaf is written into the existing document.
    pub async fn set_doc(
        &self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<()> {
        self.ensure_active("set")?;
        let key = operations::validate_document_path(path)?;
        let options = options.unwrap_or_default();
        let encoded = operations::encode_set_data(data)?;
        self.datastore.set_document(&key, encoded, options.merge).await
    }

    /// Applies a partial update to the document located at `path`.
    ///
    /// Keys are dot-separated field paths; only those fields are touched.
    ///
    /// # Errors
    /// Returns `firestore/invalid-argument` if `data` is empty and
    /// `firestore/not-found` if the document does not exist.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use firestore_client_core::firestore::{FirestoreClient, FirestoreResult, FirestoreValue};
    /// # async fn run(client: FirestoreClient) -> FirestoreResult<()> {
    /// use std::collections::BTreeMap;
    ///
    /// client
    ///     .update_doc(
    ///         "cities/sf",
    ///         BTreeMap::from([
    ///             ("stats.population".into(), FirestoreValue::from_integer(900_000)),
    ///         ]),
    ///     )
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub async fn update_doc(&self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        self.ensure_active("update")?;
        let key = operations::validate_document_path(path)?;
        let encoded = operations::encode_update_document_data(data)?;
        self.datastore
            .update_document(&key, encoded.map, encoded.field_paths)
            .await
    }

    /// Deletes the document located at `path`.
    ///
    /// Succeeds even if the document does not exist.
    pub async fn delete_doc(&self, path: &str) -> FirestoreResult<()> {
        self.ensure_active("delete")?;
        let key = operations::validate_document_path(path)?;
        self.datastore.delete_document(&key).await
    }

    /// Adds a new document with an auto-generated id to the collection at
    /// `collection_path` and returns the resulting snapshot.
    pub async fn add_doc(
        &self,
        collection_path: &str,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<DocumentSnapshot> {
        let collection = Query::collection(collection_path)?;
        let path = collection
            .collection_path()
            .child([generate_auto_id()])
            .canonical_string();
        self.set_doc(&path, data, None).await?;
        self.get_doc(&path).await
    }

    /// Executes the provided query and returns its results.
    pub async fn get_docs(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        self.ensure_active("query")?;
        let documents = self.datastore.run_query(query).await?;
        Ok(QuerySnapshot::new(query.clone(), documents))
    }

    /// Reads a document and maps it through `converter`.
    pub async fn get_doc_with_converter<C>(&self, path: &str, converter: &C) -> FirestoreResult<Option<C::Model>>
    where
        C: FirestoreDataConverter,
    {
        let snapshot = self.get_doc(path).await?;
        snapshot.data_with(converter)
    }

    /// Writes a typed model to the document at `path`.
    pub async fn set_doc_with_converter<C>(
        &self,
        path: &str,
        converter: &C,
        data: &C::Model,
        options: Option<SetOptions>,
    ) -> FirestoreResult<()>
    where
        C: FirestoreDataConverter,
    {
        let map = converter.to_map(data)?;
        self.set_doc(path, map, options).await
    }

    /// Creates a document with auto-generated ID using the provided converter.
    pub async fn add_doc_with_converter<C>(
        &self,
        collection_path: &str,
        converter: &C,
        data: &C::Model,
    ) -> FirestoreResult<DocumentSnapshot>
    where
        C: FirestoreDataConverter,
    {
        let map = converter.to_map(data)?;
        self.add_doc(collection_path, map).await
    }

    /// Executes a query and maps every result through `converter`.
    pub async fn get_docs_with_converter<C>(&self, query: &Query, converter: &C) -> FirestoreResult<Vec<C::Model>>
    where
        C: FirestoreDataConverter,
    {
        let snapshot = self.get_docs(query).await?;
        snapshot
            .documents()
            .iter()
            .filter_map(|document| document.map_value())
            .map(|data| converter.from_map(data))
            .collect()
    }

    /// Runs `update` as a single all-or-nothing unit of reads and writes.
    ///
    /// `update` runs once to discover which documents it reads and once more
    /// against their current values; it must issue the same reads both times
    /// and have no side effects outside the transaction. An error returned by
    /// `update` aborts the transaction and nothing is written. Failed
    /// transactions are not retried.
    ///
    /// # Examples
    /// ```rust,no_run
    /// # use firestore_client_core::firestore::{FirestoreClient, FirestoreResult, FirestoreValue, SetOptions};
    /// # async fn run(client: FirestoreClient) -> FirestoreResult<()> {
    /// use std::collections::BTreeMap;
    ///
    /// let total = client
    ///     .run_transaction(|tx| {
    ///         let snapshot = tx.get("counters/visits")?;
    ///         let count = snapshot.get("count")?.and_then(|value| value.as_i64()).unwrap_or(0);
    ///         tx.set(
    ///             "counters/visits",
    ///             BTreeMap::from([("count".into(), FirestoreValue::from_integer(count + 1))]),
    ///             SetOptions::default(),
    ///         )?;
    ///         Ok(count + 1)
    ///     })
    ///     .await?;
    /// # let _ = total;
    /// # Ok(()) }
    /// ```
    pub async fn run_transaction<T, F>(&self, update: F) -> FirestoreResult<T>
    where
        T: Send,
        F: Fn(&mut dyn Transaction) -> FirestoreResult<T> + Send + Sync,
    {
        transaction::run_transaction(self.datastore.as_ref(), self.cancellation.as_ref(), update).await
    }

    /// Listens to the document at `path`.
    ///
    /// `on_next` first receives the current state, then every change.
    /// `on_error` fires at most once, after which the subscription is torn
    /// down. Drop or dispose the returned handle to stop listening.
    pub fn on_snapshot_doc<N, E>(&self, path: &str, on_next: N, on_error: E) -> FirestoreResult<Subscription>
    where
        N: Fn(DocumentSnapshot) + Send + Sync + 'static,
        E: Fn(FirestoreError) + Send + Sync + 'static,
    {
        self.ensure_active("listen")?;
        let key = operations::validate_document_path(path)?;
        let next = Arc::new(move |snapshot: ListenSnapshot| {
            if let ListenSnapshot::Document(document) = snapshot {
                on_next(document);
            }
        });
        self.subscribe(ListenTarget::Document(key), Observer::new(next, Arc::new(on_error)))
    }

    /// Listens to the results of `query`.
    pub fn on_snapshot_query<N, E>(&self, query: &Query, on_next: N, on_error: E) -> FirestoreResult<Subscription>
    where
        N: Fn(QuerySnapshot) + Send + Sync + 'static,
        E: Fn(FirestoreError) + Send + Sync + 'static,
    {
        self.ensure_active("listen")?;
        query.plan().validate()?;
        let next = Arc::new(move |snapshot: ListenSnapshot| {
            if let ListenSnapshot::Query(results) = snapshot {
                on_next(results);
            }
        });
        self.subscribe(ListenTarget::Query(query.clone()), Observer::new(next, Arc::new(on_error)))
    }

    fn subscribe(&self, target: ListenTarget, observer: Observer) -> FirestoreResult<Subscription> {
        let subscription = Subscription::new(Arc::clone(&self.datastore), target, observer);
        subscription.start()?;
        Ok(subscription)
    }

    fn ensure_active(&self, operation: &str) -> FirestoreResult<()> {
        ensure_not_cancelled(self.cancellation.as_ref(), operation)
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}
