use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use firestore_client_core::firestore::{
    Bridge, BridgeDatastore, BridgeError, BridgeListenHandle, Datastore, DocumentKey,
    DocumentSnapshot, FieldPath, FirestoreClient, FirestoreErrorCode, FirestoreResult,
    FirestoreValue, InMemoryDatastore, ListenEvent, ListenTarget, ListenToken, MapValue,
    OrderDirection, Query, SubscriptionState, WriteOperation,
};
use firestore_client_core::firestore::remote::TransactionCallback;
use serde_json::{json, Value};

fn doc(entries: Vec<(&str, FirestoreValue)>) -> BTreeMap<String, FirestoreValue> {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn counts(events: &Arc<Mutex<Vec<Option<i64>>>>) -> Vec<Option<i64>> {
    events.lock().unwrap().clone()
}

fn recorder() -> (Arc<Mutex<Vec<Option<i64>>>>, impl Fn(DocumentSnapshot) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let on_next = move |snapshot: DocumentSnapshot| {
        let count = snapshot
            .get("count")
            .ok()
            .flatten()
            .and_then(FirestoreValue::as_i64);
        captured.lock().unwrap().push(count);
    };
    (events, on_next)
}

#[tokio::test(flavor = "multi_thread")]
async fn document_listener_emits_initial_and_updates() {
    let client = FirestoreClient::with_in_memory();
    let (events, on_next) = recorder();
    let subscription = client
        .on_snapshot_doc("counters/main", on_next, |err| panic!("unexpected error {err}"))
        .unwrap();
    assert_eq!(subscription.ready().await, SubscriptionState::Active);
    eventually(|| counts(&events).len() == 1).await;

    client
        .set_doc("counters/main", doc(vec![("count", 1.into())]), None)
        .await
        .unwrap();
    client
        .set_doc("counters/main", doc(vec![("count", 2.into())]), None)
        .await
        .unwrap();
    eventually(|| counts(&events).len() == 3).await;
    assert_eq!(counts(&events), vec![None, Some(1), Some(2)]);

    subscription.dispose().await;
    client
        .set_doc("counters/main", doc(vec![("count", 3.into())]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counts(&events).len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_listeners_on_one_document_are_independent() {
    let store = Arc::new(InMemoryDatastore::new());
    let client = FirestoreClient::new(store.clone());
    let (first_events, first_next) = recorder();
    let (second_events, second_next) = recorder();
    let first = client
        .on_snapshot_doc("counters/shared", first_next, |_| {})
        .unwrap();
    let second = client
        .on_snapshot_doc("counters/shared", second_next, |_| {})
        .unwrap();
    first.ready().await;
    second.ready().await;
    assert_eq!(store.listener_count(), 2);

    client
        .set_doc("counters/shared", doc(vec![("count", 1.into())]), None)
        .await
        .unwrap();
    eventually(|| counts(&first_events).len() == 2 && counts(&second_events).len() == 2).await;

    first.dispose().await;
    assert_eq!(store.listener_count(), 1);
    client
        .set_doc("counters/shared", doc(vec![("count", 2.into())]), None)
        .await
        .unwrap();
    eventually(|| counts(&second_events).len() == 3).await;
    assert_eq!(counts(&first_events), vec![None, Some(1)]);
    assert_eq!(counts(&second_events), vec![None, Some(1), Some(2)]);
    second.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn query_listener_tracks_matching_documents() {
    let client = FirestoreClient::with_in_memory();
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let captured = sizes.clone();
    let query = Query::collection("products")
        .unwrap()
        .order_by("price", OrderDirection::Ascending)
        .unwrap();
    let subscription = client
        .on_snapshot_query(
            &query,
            move |snapshot| captured.lock().unwrap().push(snapshot.len()),
            |_| {},
        )
        .unwrap();
    subscription.ready().await;

    client
        .set_doc("products/a", doc(vec![("price", 100.into())]), None)
        .await
        .unwrap();
    client
        .set_doc("orders/o1", doc(vec![("price", 1.into())]), None)
        .await
        .unwrap();
    client
        .set_doc("products/b", doc(vec![("price", 50.into())]), None)
        .await
        .unwrap();
    eventually(|| sizes.lock().unwrap().len() == 3).await;
    assert_eq!(*sizes.lock().unwrap(), vec![0, 1, 2]);
    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn listening_to_a_collection_path_is_rejected() {
    let client = FirestoreClient::with_in_memory();
    let err = client
        .on_snapshot_doc("counters", |_| {}, |_| {})
        .unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
}

/// Delegates to an in-memory store but holds `listen` until released.
struct GatedDatastore {
    inner: InMemoryDatastore,
    entered: Sender<()>,
    gate: Receiver<()>,
    unlistened: AtomicUsize,
}

#[async_trait]
impl Datastore for GatedDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        self.inner.get_document(key).await
    }

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>> {
        self.inner.run_query(query).await
    }

    async fn set_document(&self, key: &DocumentKey, data: MapValue, merge: bool) -> FirestoreResult<()> {
        self.inner.set_document(key, data, merge).await
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    ) -> FirestoreResult<()> {
        self.inner.update_document(key, data, field_paths).await
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.inner.delete_document(key).await
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        self.inner.commit(writes).await
    }

    async fn run_transaction<'a>(
        &self,
        read_keys: Vec<DocumentKey>,
        callback: TransactionCallback<'a>,
    ) -> FirestoreResult<()> {
        self.inner.run_transaction(read_keys, callback).await
    }

    async fn listen(&self, target: ListenTarget, sink: Sender<ListenEvent>) -> FirestoreResult<ListenToken> {
        let _ = self.entered.send(()).await;
        let _ = self.gate.recv().await;
        self.inner.listen(target, sink).await
    }

    async fn unlisten(&self, token: ListenToken) -> FirestoreResult<()> {
        self.unlistened.fetch_add(1, Ordering::SeqCst);
        self.inner.unlisten(token).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_during_registration_never_notifies() {
    let (entered_tx, entered_rx) = async_channel::unbounded();
    let (gate_tx, gate_rx) = async_channel::unbounded();
    let store = Arc::new(GatedDatastore {
        inner: InMemoryDatastore::new(),
        entered: entered_tx,
        gate: gate_rx,
        unlistened: AtomicUsize::new(0),
    });
    let client = FirestoreClient::new(store.clone());
    let (events, on_next) = recorder();

    let subscription = client
        .on_snapshot_doc("counters/main", on_next, |_| {})
        .unwrap();
    entered_rx.recv().await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Registering);

    subscription.dispose().await;
    assert_eq!(
        subscription.state(),
        SubscriptionState::Disposed {
            during_registration: true
        }
    );
    gate_tx.send(()).await.unwrap();

    assert_eq!(
        subscription.ready().await,
        SubscriptionState::Disposed {
            during_registration: true
        }
    );
    eventually(|| store.unlistened.load(Ordering::SeqCst) == 1).await;
    assert_eq!(store.inner.listener_count(), 0);

    client
        .set_doc("counters/main", doc(vec![("count", 1.into())]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(counts(&events).is_empty());
}

/// Bridge whose listeners are driven by the test.
#[derive(Default)]
struct PushBridge {
    sinks: Mutex<Vec<Sender<Value>>>,
    unlistened: Mutex<Vec<BridgeListenHandle>>,
}

#[async_trait]
impl Bridge for PushBridge {
    async fn invoke(&self, method: &str, _request: Value) -> Result<Value, BridgeError> {
        Err(BridgeError::new("unimplemented", format!("{method} is not used here")))
    }

    async fn listen(&self, _request: Value, sink: Sender<Value>) -> Result<BridgeListenHandle, BridgeError> {
        let mut sinks = self.sinks.lock().unwrap();
        sinks.push(sink);
        Ok(BridgeListenHandle(format!("h{}", sinks.len())))
    }

    async fn unlisten(&self, handle: BridgeListenHandle) -> Result<(), BridgeError> {
        self.unlistened.lock().unwrap().push(handle);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn store_errors_reach_the_error_callback_once() {
    let bridge = Arc::new(PushBridge::default());
    let client = FirestoreClient::new(Arc::new(BridgeDatastore::new(bridge.clone())));
    let (events, on_next) = recorder();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let captured = errors.clone();
    let subscription = client
        .on_snapshot_doc("counters/main", on_next, move |err| {
            captured.lock().unwrap().push(err.code)
        })
        .unwrap();
    assert_eq!(subscription.ready().await, SubscriptionState::Active);

    let sink = bridge.sinks.lock().unwrap()[0].clone();
    sink.send(json!({
        "snapshot": {
            "path": "counters/main",
            "exists": true,
            "fields": { "count": { "integerValue": "4" } },
        }
    }))
    .await
    .unwrap();
    sink.send(json!({ "error": { "code": "PERMISSION_DENIED", "message": "revoked" } }))
        .await
        .unwrap();
    let _ = sink.send(json!({ "error": { "code": "UNAVAILABLE", "message": "again" } })).await;

    eventually(|| errors.lock().unwrap().len() == 1).await;
    eventually(|| subscription.state().is_disposed()).await;
    eventually(|| bridge.unlistened.lock().unwrap().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*errors.lock().unwrap(), vec![FirestoreErrorCode::PermissionDenied]);
    assert_eq!(counts(&events), vec![Some(4)]);
}

/// Bridge that refuses every listen registration.
struct RejectingBridge;

#[async_trait]
impl Bridge for RejectingBridge {
    async fn invoke(&self, method: &str, _request: Value) -> Result<Value, BridgeError> {
        Err(BridgeError::new("unimplemented", format!("{method} is not used here")))
    }

    async fn listen(&self, _request: Value, _sink: Sender<Value>) -> Result<BridgeListenHandle, BridgeError> {
        Err(BridgeError::new("PERMISSION_DENIED", "listen rejected"))
    }

    async fn unlisten(&self, _handle: BridgeListenHandle) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_registration_reports_once_and_disposes() {
    let client = FirestoreClient::new(Arc::new(BridgeDatastore::new(Arc::new(RejectingBridge))));
    let (events, on_next) = recorder();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let captured = errors.clone();
    let subscription = client
        .on_snapshot_doc("counters/main", on_next, move |err| {
            captured.lock().unwrap().push(err.code)
        })
        .unwrap();

    assert_eq!(
        subscription.ready().await,
        SubscriptionState::Disposed {
            during_registration: false
        }
    );
    eventually(|| errors.lock().unwrap().len() == 1).await;
    subscription.dispose().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*errors.lock().unwrap(), vec![FirestoreErrorCode::PermissionDenied]);
    assert!(counts(&events).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_observer_still_receives_every_snapshot() {
    let client = FirestoreClient::with_in_memory();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let gate = Mutex::new(Some(release_rx));
    let (events, record) = recorder();
    let subscription = client
        .on_snapshot_doc(
            "counters/main",
            move |snapshot| {
                let blocked = gate.lock().unwrap().take();
                if let Some(release) = blocked {
                    let _ = release.recv();
                }
                record(snapshot);
            },
            |err| panic!("unexpected error {err}"),
        )
        .unwrap();
    assert_eq!(subscription.ready().await, SubscriptionState::Active);

    for count in 1..=100 {
        client
            .set_doc("counters/main", doc(vec![("count", count.into())]), None)
            .await
            .unwrap();
    }
    release_tx.send(()).unwrap();

    eventually(|| counts(&events).len() == 101).await;
    let seen = counts(&events);
    assert_eq!(seen.first(), Some(&None));
    assert_eq!(seen.last(), Some(&Some(100)));
    assert!(seen[1..].windows(2).all(|pair| pair[0] < pair[1]));
    subscription.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_waits_for_a_running_callback() {
    let client = FirestoreClient::with_in_memory();
    let (entered_tx, entered_rx) = async_channel::unbounded();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (events, record) = recorder();
    let subscription = Arc::new(
        client
            .on_snapshot_doc(
                "counters/main",
                move |snapshot| {
                    let exists = snapshot.exists();
                    record(snapshot);
                    if exists {
                        let _ = entered_tx.try_send(());
                        let _ = release_rx.lock().unwrap().recv();
                    }
                },
                |_| {},
            )
            .unwrap(),
    );
    subscription.ready().await;
    eventually(|| counts(&events).len() == 1).await;

    client
        .set_doc("counters/main", doc(vec![("count", 1.into())]), None)
        .await
        .unwrap();
    entered_rx.recv().await.unwrap();

    let disposing = {
        let subscription = subscription.clone();
        tokio::spawn(async move { subscription.dispose().await })
    };
    eventually(|| subscription.state().is_disposed()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!disposing.is_finished());

    release_tx.send(()).unwrap();
    disposing.await.unwrap();
    assert_eq!(counts(&events), vec![None, Some(1)]);

    client
        .set_doc("counters/main", doc(vec![("count", 2.into())]), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counts(&events), vec![None, Some(1)]);
}
