use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_channel::{Sender, TrySendError};
use async_trait::async_trait;

use crate::firestore::api::query::{Query, QuerySnapshot};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::error::FirestoreResult;
use crate::firestore::local::transform::{apply_set, apply_update};
use crate::firestore::model::{DocumentKey, FieldPath, Timestamp};
use crate::firestore::query_evaluator::apply_query_to_documents;
use crate::firestore::value::MapValue;

use super::{
    Datastore, ListenEvent, ListenSnapshot, ListenTarget, ListenToken, TransactionCallback,
    TransactionReads, WriteOperation,
};

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Fully local store used as the reference executor and in tests.
///
/// Every write, batch and transaction is applied to a staged copy of the
/// documents and swapped in only when all of it succeeded. Listeners are
/// notified synchronously, in commit order.
#[derive(Clone)]
pub struct InMemoryDatastore {
    inner: Arc<Inner>,
}

struct Inner {
    // Lock order: `documents` before `listeners`.
    documents: Mutex<BTreeMap<String, MapValue>>,
    listeners: Mutex<HashMap<ListenToken, Listener>>,
    next_token: AtomicU64,
    clock: Clock,
}

struct Listener {
    target: ListenTarget,
    sink: Sender<ListenEvent>,
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::with_clock(Timestamp::now)
    }
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose server timestamps come from `clock`.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                documents: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Number of live listener registrations.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Number of stored documents across all collections.
    pub fn document_count(&self) -> usize {
        lock(&self.inner.documents).len()
    }

    fn commit_writes(&self, writes: &[WriteOperation]) -> FirestoreResult<()> {
        let mut documents = lock(&self.inner.documents);
        let mut staged = documents.clone();
        self.apply_writes(&mut staged, writes)?;
        *documents = staged;
        self.notify(&documents, writes);
        Ok(())
    }

    fn apply_writes(
        &self,
        documents: &mut BTreeMap<String, MapValue>,
        writes: &[WriteOperation],
    ) -> FirestoreResult<()> {
        let now = (self.inner.clock)();
        for write in writes {
            let path = write.key().path().canonical_string();
            match write {
                WriteOperation::Set { data, merge, .. } => {
                    let next = apply_set(documents.get(&path), data, *merge, now);
                    documents.insert(path, next);
                }
                WriteOperation::Update {
                    data, field_paths, ..
                } => {
                    let next = apply_update(&path, documents.get(&path), data, field_paths, now)?;
                    documents.insert(path, next);
                }
                WriteOperation::Delete { .. } => {
                    documents.remove(&path);
                }
            }
        }
        Ok(())
    }

    fn notify(&self, documents: &BTreeMap<String, MapValue>, writes: &[WriteOperation]) {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|token, listener| {
            let affected = writes.iter().any(|write| match &listener.target {
                ListenTarget::Document(key) => key == write.key(),
                ListenTarget::Query(query) => query.matches_collection(write.key()),
            });
            if !affected {
                return true;
            }
            let event = snapshot_event(documents, &listener.target);
            deliver(*token, &listener.sink, event)
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn snapshot_of(documents: &BTreeMap<String, MapValue>, key: &DocumentKey) -> DocumentSnapshot {
    let data = documents.get(&key.path().canonical_string()).cloned();
    DocumentSnapshot::new(key.clone(), data)
}

fn query_documents(
    documents: &BTreeMap<String, MapValue>,
    query: &Query,
) -> FirestoreResult<Vec<DocumentSnapshot>> {
    let candidates = documents
        .iter()
        .map(|(path, data)| Ok(DocumentSnapshot::new(DocumentKey::from_string(path)?, Some(data.clone()))))
        .collect::<FirestoreResult<Vec<_>>>()?;
    apply_query_to_documents(candidates, query)
}

fn snapshot_event(documents: &BTreeMap<String, MapValue>, target: &ListenTarget) -> ListenEvent {
    match target {
        ListenTarget::Document(key) => {
            ListenEvent::Snapshot(ListenSnapshot::Document(snapshot_of(documents, key)))
        }
        ListenTarget::Query(query) => match query_documents(documents, query) {
            Ok(results) => {
                ListenEvent::Snapshot(ListenSnapshot::Query(QuerySnapshot::new(query.clone(), results)))
            }
            Err(err) => ListenEvent::Error(err),
        },
    }
}

/// Pushes one event; returns whether the listener should stay registered.
fn deliver(token: ListenToken, sink: &Sender<ListenEvent>, event: ListenEvent) -> bool {
    let terminal = matches!(event, ListenEvent::Error(_));
    match sink.try_send(event) {
        Ok(()) => !terminal,
        Err(TrySendError::Full(_)) => {
            log::warn!(
                "Listener {} has a full bounded sink; dropping a snapshot",
                token.id()
            );
            true
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Listener {} went away; removing it", token.id());
            false
        }
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let documents = lock(&self.inner.documents);
        Ok(snapshot_of(&documents, key))
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let documents = lock(&self.inner.documents);
        query_documents(&documents, query)
    }

    async fn set_document(&self, key: &DocumentKey, data: MapValue, merge: bool) -> FirestoreResult<()> {
        self.commit_writes(&[WriteOperation::Set {
            key: key.clone(),
            data,
            merge,
        }])
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    ) -> FirestoreResult<()> {
        self.commit_writes(&[WriteOperation::Update {
            key: key.clone(),
            data,
            field_paths,
        }])
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.commit_writes(&[WriteOperation::Delete { key: key.clone() }])
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.commit_writes(&writes)
    }

    async fn run_transaction<'a>(
        &self,
        read_keys: Vec<DocumentKey>,
        callback: TransactionCallback<'a>,
    ) -> FirestoreResult<()> {
        let mut documents = lock(&self.inner.documents);
        let reads: TransactionReads = read_keys
            .into_iter()
            .map(|key| {
                let snapshot = snapshot_of(&documents, &key);
                (key, snapshot)
            })
            .collect();

        let writes = callback(&reads)?;
        let mut staged = documents.clone();
        self.apply_writes(&mut staged, &writes)?;
        *documents = staged;
        self.notify(&documents, &writes);
        Ok(())
    }

    async fn listen(&self, target: ListenTarget, sink: Sender<ListenEvent>) -> FirestoreResult<ListenToken> {
        if let ListenTarget::Query(query) = &target {
            query.plan().validate()?;
        }

        let documents = lock(&self.inner.documents);
        let token = ListenToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let initial = snapshot_event(&documents, &target);
        let mut listeners = lock(&self.inner.listeners);
        if deliver(token, &sink, initial) {
            log::debug!("Registered listener {} for {target}", token.id());
            listeners.insert(token, Listener { target, sink });
        }
        Ok(token)
    }

    async fn unlisten(&self, token: ListenToken) -> FirestoreResult<()> {
        if lock(&self.inner.listeners).remove(&token).is_none() {
            log::debug!("Listener {} was already removed", token.id());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::query::OrderDirection;
    use crate::firestore::value::FirestoreValue;

    fn fields(entries: &[(&str, FirestoreValue)]) -> MapValue {
        MapValue::new(
            entries
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn in_memory_get_set() {
        let datastore = InMemoryDatastore::new();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        datastore
            .set_document(&key, fields(&[("name", "SF".into())]), false)
            .await
            .unwrap();
        let snapshot = datastore.get_document(&key).await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(
            snapshot.data().unwrap().get("name"),
            Some(&FirestoreValue::from_string("SF"))
        );
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() {
        let datastore = InMemoryDatastore::new();
        let created = DocumentKey::from_string("cities/la").unwrap();
        let missing = DocumentKey::from_string("cities/nowhere").unwrap();
        let writes = vec![
            WriteOperation::Set {
                key: created.clone(),
                data: fields(&[("name", "LA".into())]),
                merge: false,
            },
            WriteOperation::Update {
                key: missing,
                data: fields(&[("name", "?".into())]),
                field_paths: vec![FieldPath::from_dot_separated("name").unwrap()],
            },
        ];
        let err = datastore.commit(writes).await.unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
        assert!(!datastore.get_document(&created).await.unwrap().exists());
    }

    #[tokio::test]
    async fn server_timestamps_use_the_injected_clock() {
        let datastore = InMemoryDatastore::with_clock(|| Timestamp::new(1_700_000_000, 0));
        let key = DocumentKey::from_string("events/e1").unwrap();
        datastore
            .set_document(&key, fields(&[("at", FirestoreValue::server_timestamp())]), false)
            .await
            .unwrap();
        let snapshot = datastore.get_document(&key).await.unwrap();
        assert_eq!(
            snapshot.data().unwrap().get("at"),
            Some(&FirestoreValue::from_timestamp(Timestamp::new(1_700_000_000, 0)))
        );
    }

    #[tokio::test]
    async fn query_listeners_receive_initial_and_changed_results() {
        let datastore = InMemoryDatastore::new();
        let query = Query::collection("products")
            .unwrap()
            .order_by("price", OrderDirection::Ascending)
            .unwrap();
        let (sender, receiver) = async_channel::unbounded();
        let token = datastore
            .listen(ListenTarget::Query(query), sender)
            .await
            .unwrap();

        let key = DocumentKey::from_string("products/a").unwrap();
        datastore
            .set_document(&key, fields(&[("price", 100.into())]), false)
            .await
            .unwrap();
        let unrelated = DocumentKey::from_string("orders/o1").unwrap();
        datastore
            .set_document(&unrelated, fields(&[("price", 1.into())]), false)
            .await
            .unwrap();

        let mut sizes = Vec::new();
        while let Ok(ListenEvent::Snapshot(ListenSnapshot::Query(snapshot))) = receiver.try_recv() {
            sizes.push(snapshot.len());
        }
        assert_eq!(sizes, vec![0, 1]);

        datastore.unlisten(token).await.unwrap();
        assert_eq!(datastore.listener_count(), 0);
    }
}
