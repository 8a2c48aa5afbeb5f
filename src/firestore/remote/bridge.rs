use std::fmt::{Display, Formatter};

use async_channel::Sender;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const METHOD_GET: &str = "get";
pub const METHOD_QUERY: &str = "query";
pub const METHOD_SET: &str = "set";
pub const METHOD_UPDATE: &str = "update";
pub const METHOD_DELETE: &str = "delete";
pub const METHOD_COMMIT: &str = "commit";
pub const METHOD_TRANSACTION_BEGIN: &str = "transaction.begin";
pub const METHOD_TRANSACTION_COMMIT: &str = "transaction.commit";
pub const METHOD_TRANSACTION_ROLLBACK: &str = "transaction.rollback";

/// Failure reported by the platform bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeError {
    pub code: String,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for BridgeError {}

/// Opaque handle of a bridge-side listener.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeListenHandle(pub String);

/// The per-platform RPC bridge to the remote document store.
///
/// Requests and responses are JSON documents. `listen` pushes one JSON event
/// per change to `sink` until `unlisten` is called with the returned handle.
#[async_trait]
pub trait Bridge: Send + Sync + 'static {
    async fn invoke(&self, method: &str, request: JsonValue) -> Result<JsonValue, BridgeError>;

    async fn listen(
        &self,
        request: JsonValue,
        sink: Sender<JsonValue>,
    ) -> Result<BridgeListenHandle, BridgeError>;

    async fn unlisten(&self, handle: BridgeListenHandle) -> Result<(), BridgeError>;
}
