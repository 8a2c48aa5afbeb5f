use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_channel::Sender;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::firestore::remote::bridge::{Bridge, BridgeError, BridgeListenHandle};

/// Bridge double that records every call and answers from queued responses.
///
/// Methods without a queued response answer `{}`.
#[derive(Default)]
pub(crate) struct RecordingBridge {
    calls: Mutex<Vec<(String, JsonValue)>>,
    responses: Mutex<HashMap<String, VecDeque<Result<JsonValue, BridgeError>>>>,
    listens: Mutex<Vec<(BridgeListenHandle, JsonValue, Sender<JsonValue>)>>,
    unlistened: Mutex<Vec<BridgeListenHandle>>,
    next_handle: AtomicU64,
}

impl RecordingBridge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: &str, response: Result<JsonValue, BridgeError>) {
        lock(&self.responses)
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<(String, JsonValue)> {
        lock(&self.calls).clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(method, _)| method.clone()).collect()
    }

    pub(crate) fn listen_requests(&self) -> Vec<JsonValue> {
        lock(&self.listens)
            .iter()
            .map(|(_, request, _)| request.clone())
            .collect()
    }

    /// Pushes `event` to every open bridge listener.
    pub(crate) async fn emit(&self, event: JsonValue) {
        let sinks: Vec<Sender<JsonValue>> = lock(&self.listens)
            .iter()
            .map(|(_, _, sink)| sink.clone())
            .collect();
        for sink in sinks {
            let _ = sink.send(event.clone()).await;
        }
    }

    pub(crate) fn unlistened(&self) -> Vec<BridgeListenHandle> {
        lock(&self.unlistened).clone()
    }
}

#[async_trait]
impl Bridge for RecordingBridge {
    async fn invoke(&self, method: &str, request: JsonValue) -> Result<JsonValue, BridgeError> {
        lock(&self.calls).push((method.to_string(), request));
        lock(&self.responses)
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(json!({})))
    }

    async fn listen(
        &self,
        request: JsonValue,
        sink: Sender<JsonValue>,
    ) -> Result<BridgeListenHandle, BridgeError> {
        let handle = BridgeListenHandle(format!(
            "listen-{}",
            self.next_handle.fetch_add(1, Ordering::Relaxed)
        ));
        lock(&self.listens).push((handle.clone(), request, sink));
        Ok(handle)
    }

    async fn unlisten(&self, handle: BridgeListenHandle) -> Result<(), BridgeError> {
        lock(&self.listens).retain(|(open, _, _)| open != &handle);
        lock(&self.unlistened).push(handle);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
