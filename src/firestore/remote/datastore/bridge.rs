use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value as JsonValue};

use crate::firestore::api::query::{LimitType, Query, QuerySnapshot};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::constants::DEFAULT_LISTEN_CAPACITY;
use crate::firestore::error::{internal_error, FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::remote::bridge::{
    Bridge, BridgeError, BridgeListenHandle, METHOD_COMMIT, METHOD_DELETE, METHOD_GET,
    METHOD_QUERY, METHOD_SET, METHOD_TRANSACTION_BEGIN, METHOD_TRANSACTION_COMMIT,
    METHOD_TRANSACTION_ROLLBACK, METHOD_UPDATE,
};
use crate::firestore::remote::rpc_error::map_bridge_error;
use crate::firestore::remote::serializer::{decode_documents, decode_snapshot, encode_fields, encode_write};
use crate::firestore::remote::structured_query::encode_query_request;
use crate::firestore::value::MapValue;
use crate::util::runtime::spawn_detached;

use super::{
    Datastore, ListenEvent, ListenSnapshot, ListenTarget, ListenToken, TransactionCallback,
    TransactionReads, WriteOperation,
};

/// Remote executor: forwards every operation to the platform bridge.
///
/// Ordering, filtering and cursors are evaluated by the backend; results are
/// trusted as returned, except for `limit_to_last` queries which are reversed
/// locally.
pub struct BridgeDatastore {
    bridge: Arc<dyn Bridge>,
    listen_capacity: usize,
    listeners: Mutex<HashMap<ListenToken, ActiveListen>>,
    next_token: AtomicU64,
}

struct ActiveListen {
    handle: BridgeListenHandle,
    events: Receiver<JsonValue>,
}

/// Settings for a [`BridgeDatastore`].
pub struct BridgeDatastoreBuilder {
    bridge: Arc<dyn Bridge>,
    listen_capacity: usize,
}

impl BridgeDatastoreBuilder {
    /// Buffer size of the channel between the bridge and each listener.
    pub fn with_listen_capacity(mut self, capacity: usize) -> Self {
        self.listen_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> BridgeDatastore {
        BridgeDatastore {
            bridge: self.bridge,
            listen_capacity: self.listen_capacity,
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }
}

impl BridgeDatastore {
    pub fn builder(bridge: Arc<dyn Bridge>) -> BridgeDatastoreBuilder {
        BridgeDatastoreBuilder {
            bridge,
            listen_capacity: DEFAULT_LISTEN_CAPACITY,
        }
    }

    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self::builder(bridge).build()
    }

    async fn invoke(&self, method: &str, request: JsonValue) -> FirestoreResult<JsonValue> {
        log::debug!("bridge -> {method}");
        self.bridge.invoke(method, request).await.map_err(|err| {
            log::debug!("bridge <- {method} failed: {err}");
            map_bridge_error(err)
        })
    }

    async fn rollback(&self, transaction: &JsonValue) {
        let request = json!({ "transaction": transaction });
        if let Err(err) = self.invoke(METHOD_TRANSACTION_ROLLBACK, request).await {
            log::warn!("Failed to roll back transaction: {err}");
        }
    }

    async fn transaction_reads(
        &self,
        transaction: &JsonValue,
        read_keys: Vec<DocumentKey>,
    ) -> FirestoreResult<TransactionReads> {
        let fetches = read_keys.into_iter().map(|key| async move {
            let request = json!({
                "path": key.path().canonical_string(),
                "transaction": transaction,
            });
            let snapshot = decode_snapshot(&self.invoke(METHOD_GET, request).await?)?;
            Ok::<_, FirestoreError>((key, snapshot))
        });
        Ok(try_join_all(fetches).await?.into_iter().collect())
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<ListenToken, ActiveListen>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn listen_request(target: &ListenTarget) -> FirestoreResult<JsonValue> {
    Ok(match target {
        ListenTarget::Document(key) => json!({
            "target": { "document": key.path().canonical_string() }
        }),
        ListenTarget::Query(query) => json!({
            "target": { "query": encode_query_request(query)? }
        }),
    })
}

fn decode_listen_event(target: &ListenTarget, event: &JsonValue) -> ListenEvent {
    if let Some(error) = event.get("error") {
        let error = serde_json::from_value::<BridgeError>(error.clone())
            .unwrap_or_else(|err| BridgeError::new("unknown", format!("Unreadable listen error: {err}")));
        return ListenEvent::Error(map_bridge_error(error));
    }
    let decoded = match target {
        ListenTarget::Document(_) => event
            .get("snapshot")
            .ok_or_else(|| internal_error("Listen event carries no snapshot"))
            .and_then(decode_snapshot)
            .map(ListenSnapshot::Document),
        ListenTarget::Query(query) => decode_query_results(query, event)
            .map(|documents| ListenSnapshot::Query(QuerySnapshot::new(query.clone(), documents))),
    };
    match decoded {
        Ok(snapshot) => ListenEvent::Snapshot(snapshot),
        Err(err) => ListenEvent::Error(err),
    }
}

fn decode_query_results(query: &Query, response: &JsonValue) -> FirestoreResult<Vec<DocumentSnapshot>> {
    let mut documents = decode_documents(response)?;
    if query.plan().limit_type() == LimitType::Last && query.plan().limit().is_some() {
        documents.reverse();
    }
    Ok(documents)
}

async fn forward_events(
    token: ListenToken,
    target: ListenTarget,
    events: Receiver<JsonValue>,
    sink: Sender<ListenEvent>,
) {
    while let Ok(raw) = events.recv().await {
        let event = decode_listen_event(&target, &raw);
        let terminal = matches!(event, ListenEvent::Error(_));
        if sink.send(event).await.is_err() {
            log::debug!("Listener {} dropped its receiver", token.id());
            break;
        }
        if terminal {
            break;
        }
    }
    events.close();
}

#[async_trait]
impl Datastore for BridgeDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let response = self
            .invoke(METHOD_GET, json!({ "path": key.path().canonical_string() }))
            .await?;
        decode_snapshot(&response)
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let request = encode_query_request(query)?;
        let response = self.invoke(METHOD_QUERY, request).await?;
        decode_query_results(query, &response)
    }

    async fn set_document(&self, key: &DocumentKey, data: MapValue, merge: bool) -> FirestoreResult<()> {
        let request = json!({
            "path": key.path().canonical_string(),
            "fields": encode_fields(&data)?,
            "merge": merge,
        });
        self.invoke(METHOD_SET, request).await.map(|_| ())
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    ) -> FirestoreResult<()> {
        let request = json!({
            "path": key.path().canonical_string(),
            "fields": encode_fields(&data)?,
            "fieldPaths": field_paths.iter().map(FieldPath::canonical_string).collect::<Vec<_>>(),
        });
        self.invoke(METHOD_UPDATE, request).await.map(|_| ())
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        let request = json!({ "path": key.path().canonical_string() });
        self.invoke(METHOD_DELETE, request).await.map(|_| ())
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        let writes = writes
            .iter()
            .map(encode_write)
            .collect::<FirestoreResult<Vec<_>>>()?;
        self.invoke(METHOD_COMMIT, json!({ "writes": writes })).await.map(|_| ())
    }

    async fn run_transaction<'a>(
        &self,
        read_keys: Vec<DocumentKey>,
        callback: TransactionCallback<'a>,
    ) -> FirestoreResult<()> {
        let begin = self.invoke(METHOD_TRANSACTION_BEGIN, json!({})).await?;
        let transaction = begin
            .get("transaction")
            .cloned()
            .ok_or_else(|| internal_error("transaction.begin returned no transaction id"))?;

        let writes = match self
            .transaction_reads(&transaction, read_keys)
            .await
            .and_then(|reads| callback(&reads))
            .and_then(|writes| writes.iter().map(encode_write).collect::<FirestoreResult<Vec<_>>>())
        {
            Ok(writes) => writes,
            Err(err) => {
                self.rollback(&transaction).await;
                return Err(err);
            }
        };

        let request = json!({ "transaction": transaction, "writes": writes });
        self.invoke(METHOD_TRANSACTION_COMMIT, request).await.map(|_| ())
    }

    async fn listen(&self, target: ListenTarget, sink: Sender<ListenEvent>) -> FirestoreResult<ListenToken> {
        let request = listen_request(&target)?;
        let (raw_sender, raw_receiver) = async_channel::bounded(self.listen_capacity);
        let handle = self
            .bridge
            .listen(request, raw_sender)
            .await
            .map_err(map_bridge_error)?;

        let token = ListenToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        log::debug!("Registered bridge listener {} for {target}", token.id());
        self.listeners().insert(
            token,
            ActiveListen {
                handle,
                events: raw_receiver.clone(),
            },
        );
        spawn_detached(forward_events(token, target, raw_receiver, sink));
        Ok(token)
    }

    async fn unlisten(&self, token: ListenToken) -> FirestoreResult<()> {
        let Some(active) = self.listeners().remove(&token) else {
            log::debug!("Bridge listener {} was already removed", token.id());
            return Ok(());
        };
        active.events.close();
        self.bridge
            .unlisten(active.handle)
            .await
            .map_err(map_bridge_error)
    }
}

impl std::fmt::Debug for BridgeDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDatastore")
            .field("listen_capacity", &self.listen_capacity)
            .finish_non_exhaustive()
    }
}
