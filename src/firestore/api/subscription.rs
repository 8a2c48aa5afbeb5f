use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use async_channel::{Receiver, Sender};
use tokio::sync::Mutex as AsyncMutex;

use crate::firestore::error::{invalid_argument, FirestoreError, FirestoreResult};
use crate::firestore::remote::datastore::{
    Datastore, ListenEvent, ListenSnapshot, ListenTarget, ListenToken,
};
use crate::util::spawn_detached;

pub(crate) type NextCallback = Arc<dyn Fn(ListenSnapshot) + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(FirestoreError) + Send + Sync>;

/// Lifecycle of a [`Subscription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Registering,
    Active,
    /// No further callbacks fire. `during_registration` is set when the
    /// handle was disposed before the store confirmed the registration.
    Disposed { during_registration: bool },
}

impl SubscriptionState {
    pub fn is_disposed(&self) -> bool {
        matches!(self, SubscriptionState::Disposed { .. })
    }
}

#[derive(Clone)]
pub(crate) struct Observer {
    next: NextCallback,
    error: ErrorCallback,
}

impl Observer {
    pub(crate) fn new(next: NextCallback, error: ErrorCallback) -> Self {
        Self { next, error }
    }
}

struct Slot {
    state: SubscriptionState,
    token: Option<ListenToken>,
    observer: Option<Observer>,
    sink: Option<Sender<ListenEvent>>,
}

struct SubscriptionInner {
    datastore: Arc<dyn Datastore>,
    target: ListenTarget,
    slot: Mutex<Slot>,
    // Held across every callback; `dispose` takes it after flipping the state.
    delivery: AsyncMutex<()>,
    events: Receiver<ListenEvent>,
    // Never written to; closed once registration has settled.
    registered: (Sender<()>, Receiver<()>),
}

enum Registration {
    Active,
    Orphaned(ListenToken),
    Failed(FirestoreError, Option<Observer>),
}

/// One live listener on a document or a query.
///
/// The store pushes snapshots into an unbounded per-subscription channel that
/// a background task drains into the observer, in the order the store emitted
/// them. A slow observer delays delivery but never loses a snapshot. Once
/// `dispose` returns, no callback fires again and the store registration is
/// released, even when disposal races the registration itself. Dropping the
/// handle disposes it in the background.
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new(datastore: Arc<dyn Datastore>, target: ListenTarget, observer: Observer) -> Self {
        let (sink, events) = async_channel::unbounded();
        Self {
            inner: Arc::new(SubscriptionInner {
                datastore,
                target,
                slot: Mutex::new(Slot {
                    state: SubscriptionState::Created,
                    token: None,
                    observer: Some(observer),
                    sink: Some(sink),
                }),
                delivery: AsyncMutex::new(()),
                events,
                registered: async_channel::bounded(1),
            }),
        }
    }

    /// Registers with the store and starts delivering snapshots.
    ///
    /// # Errors
    /// Returns `firestore/invalid-argument` when called more than once.
    pub fn start(&self) -> FirestoreResult<()> {
        {
            let mut slot = lock(&self.inner.slot);
            if slot.state != SubscriptionState::Created {
                return Err(invalid_argument(format!(
                    "Subscription on {} was already started",
                    self.inner.target
                )));
            }
            slot.state = SubscriptionState::Registering;
        }
        let inner = Arc::clone(&self.inner);
        spawn_detached(async move { inner.run().await });
        Ok(())
    }

    pub fn state(&self) -> SubscriptionState {
        lock(&self.inner.slot).state
    }

    pub fn target(&self) -> &ListenTarget {
        &self.inner.target
    }

    /// Waits until the store accepted or rejected the registration and
    /// returns the resulting state.
    pub async fn ready(&self) -> SubscriptionState {
        // Resolves once the sender side is closed.
        let _ = self.inner.registered.1.recv().await;
        self.state()
    }

    /// Stops delivery and releases the store registration. Idempotent.
    ///
    /// Waits for a callback that is already running to return, so nothing is
    /// delivered after this resolves. Must not be awaited from inside a
    /// callback of the same subscription.
    pub async fn dispose(&self) {
        self.inner.dispose().await;
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.state().is_disposed() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        spawn_detached(async move { inner.dispose().await });
    }
}

impl SubscriptionInner {
    async fn run(self: Arc<Self>) {
        let Some(sink) = lock(&self.slot).sink.take() else {
            return;
        };
        let registration = self.datastore.listen(self.target.clone(), sink).await;
        let outcome = self.settle(registration);
        self.registered.0.close();

        match outcome {
            Registration::Active => {
                log::debug!("Subscription on {} is active", self.target);
            }
            Registration::Orphaned(token) => {
                log::debug!(
                    "Subscription on {} was disposed while registering; releasing listener {}",
                    self.target,
                    token.id()
                );
                self.release(token).await;
                return;
            }
            Registration::Failed(err, observer) => {
                self.events.close();
                let _delivering = self.delivery.lock().await;
                if let Some(observer) = observer {
                    (observer.error)(err);
                }
                return;
            }
        }

        while let Ok(event) = self.events.recv().await {
            if !self.deliver(event).await {
                break;
            }
        }
    }

    fn settle(&self, registration: FirestoreResult<ListenToken>) -> Registration {
        let mut slot = lock(&self.slot);
        let registering = slot.state == SubscriptionState::Registering;
        match registration {
            Ok(token) if registering => {
                slot.state = SubscriptionState::Active;
                slot.token = Some(token);
                Registration::Active
            }
            Ok(token) => {
                slot.observer = None;
                Registration::Orphaned(token)
            }
            Err(err) => {
                log::debug!("Subscription on {} failed to register: {err}", self.target);
                let observer = if registering { slot.observer.take() } else { None };
                if !slot.state.is_disposed() {
                    slot.state = SubscriptionState::Disposed {
                        during_registration: false,
                    };
                }
                Registration::Failed(err, observer)
            }
        }
    }

    /// Hands one event to the observer; returns whether delivery continues.
    async fn deliver(&self, event: ListenEvent) -> bool {
        let _delivering = self.delivery.lock().await;
        match event {
            ListenEvent::Snapshot(snapshot) => {
                let observer = {
                    let slot = lock(&self.slot);
                    if slot.state != SubscriptionState::Active {
                        return false;
                    }
                    slot.observer.clone()
                };
                if let Some(observer) = observer {
                    (observer.next)(snapshot);
                }
                true
            }
            ListenEvent::Error(err) => {
                let (observer, token) = {
                    let mut slot = lock(&self.slot);
                    if slot.state != SubscriptionState::Active {
                        return false;
                    }
                    slot.state = SubscriptionState::Disposed {
                        during_registration: false,
                    };
                    (slot.observer.take(), slot.token.take())
                };
                self.events.close();
                if let Some(observer) = observer {
                    (observer.error)(err);
                }
                if let Some(token) = token {
                    self.release(token).await;
                }
                false
            }
        }
    }

    async fn dispose(&self) {
        let token = {
            let mut slot = lock(&self.slot);
            let token = match slot.state {
                // An error callback may still be running.
                SubscriptionState::Disposed { .. } => None,
                SubscriptionState::Created => {
                    slot.state = SubscriptionState::Disposed {
                        during_registration: false,
                    };
                    slot.sink = None;
                    self.registered.0.close();
                    None
                }
                // The registration task unlistens once the store answers.
                SubscriptionState::Registering => {
                    slot.state = SubscriptionState::Disposed {
                        during_registration: true,
                    };
                    None
                }
                SubscriptionState::Active => {
                    slot.state = SubscriptionState::Disposed {
                        during_registration: false,
                    };
                    slot.token.take()
                }
            };
            slot.observer = None;
            token
        };
        self.events.close();
        // Wait out a callback that started before the state flipped.
        drop(self.delivery.lock().await);
        if let Some(token) = token {
            self.release(token).await;
        }
    }

    async fn release(&self, token: ListenToken) {
        if let Err(err) = self.datastore.unlisten(token).await {
            log::warn!(
                "Failed to release listener {} for {}: {err}",
                token.id(),
                self.target
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::DocumentKey;
    use crate::firestore::remote::datastore::InMemoryDatastore;
    use crate::firestore::value::{FirestoreValue, MapValue};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn recording_observer() -> (Observer, Receiver<ListenSnapshot>, Receiver<FirestoreError>) {
        let (next_tx, next_rx) = async_channel::unbounded();
        let (error_tx, error_rx) = async_channel::unbounded();
        let observer = Observer::new(
            Arc::new(move |snapshot| {
                let _ = next_tx.try_send(snapshot);
            }),
            Arc::new(move |err| {
                let _ = error_tx.try_send(err);
            }),
        );
        (observer, next_rx, error_rx)
    }

    async fn next_document(receiver: &Receiver<ListenSnapshot>) -> Option<FirestoreValue> {
        let snapshot = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("snapshot within timeout")
            .expect("channel open");
        match snapshot {
            ListenSnapshot::Document(document) => document.data().and_then(|data| data.get("n").cloned()),
            ListenSnapshot::Query(_) => panic!("expected a document snapshot"),
        }
    }

    #[tokio::test]
    async fn delivers_initial_and_subsequent_snapshots() {
        let store = Arc::new(InMemoryDatastore::new());
        let key = DocumentKey::from_string("counters/a").unwrap();
        let (observer, next_rx, _errors) = recording_observer();
        let subscription = Subscription::new(store.clone(), ListenTarget::Document(key.clone()), observer);
        subscription.start().unwrap();
        assert_eq!(subscription.ready().await, SubscriptionState::Active);
        assert_eq!(next_document(&next_rx).await, None);

        let data = MapValue::new(BTreeMap::from([("n".to_string(), FirestoreValue::from(1))]));
        store.set_document(&key, data, false).await.unwrap();
        assert_eq!(next_document(&next_rx).await, Some(FirestoreValue::from(1)));

        subscription.dispose().await;
        assert_eq!(store.listener_count(), 0);
        assert!(subscription.state().is_disposed());
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let store = Arc::new(InMemoryDatastore::new());
        let key = DocumentKey::from_string("counters/a").unwrap();
        let (observer, _next, _errors) = recording_observer();
        let subscription = Subscription::new(store, ListenTarget::Document(key), observer);
        subscription.start().unwrap();
        let err = subscription.start().unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        subscription.dispose().await;
    }

    #[tokio::test]
    async fn dispose_before_start_never_registers() {
        let store = Arc::new(InMemoryDatastore::new());
        let key = DocumentKey::from_string("counters/a").unwrap();
        let (observer, _next, _errors) = recording_observer();
        let subscription = Subscription::new(store.clone(), ListenTarget::Document(key), observer);
        subscription.dispose().await;
        subscription.dispose().await;
        assert_eq!(
            subscription.ready().await,
            SubscriptionState::Disposed {
                during_registration: false
            }
        );
        assert!(subscription.start().is_err());
        assert_eq!(store.listener_count(), 0);
    }
}
