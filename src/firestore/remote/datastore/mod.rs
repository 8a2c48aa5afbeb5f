use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use async_channel::Sender;
use async_trait::async_trait;

use crate::firestore::api::query::{Query, QuerySnapshot};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::error::{FirestoreError, FirestoreResult};
use crate::firestore::model::{DocumentKey, FieldPath};
use crate::firestore::value::MapValue;

pub mod bridge;
pub mod in_memory;

/// One mutation of a batch or transaction commit.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Set {
        key: DocumentKey,
        data: MapValue,
        merge: bool,
    },
    Update {
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    },
    Delete {
        key: DocumentKey,
    },
}

impl WriteOperation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            WriteOperation::Set { key, .. }
            | WriteOperation::Update { key, .. }
            | WriteOperation::Delete { key } => key,
        }
    }
}

/// Documents pre-fetched for a transaction, keyed by path.
pub type TransactionReads = HashMap<DocumentKey, DocumentSnapshot>;

/// Runs the caller's logic once the reads are available and returns the
/// writes to commit. An error aborts the transaction without writing.
pub type TransactionCallback<'a> =
    Box<dyn FnOnce(&TransactionReads) -> FirestoreResult<Vec<WriteOperation>> + Send + 'a>;

/// What a listener observes.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenTarget {
    Document(DocumentKey),
    Query(Query),
}

impl Display for ListenTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenTarget::Document(key) => write!(f, "document {key}"),
            ListenTarget::Query(query) => write!(f, "query on {}", query.collection_path()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ListenSnapshot {
    Document(DocumentSnapshot),
    Query(QuerySnapshot),
}

/// Notification pushed by a store to a registered listener.
#[derive(Clone, Debug)]
pub enum ListenEvent {
    Snapshot(ListenSnapshot),
    /// Terminal failure; no further events follow for this registration.
    Error(FirestoreError),
}

/// Registration handle returned by [`Datastore::listen`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenToken(pub(crate) u64);

impl ListenToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The contract every backing store implements.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot>;

    async fn run_query(&self, query: &Query) -> FirestoreResult<Vec<DocumentSnapshot>>;

    async fn set_document(&self, key: &DocumentKey, data: MapValue, merge: bool) -> FirestoreResult<()>;

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
    ) -> FirestoreResult<()>;

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()>;

    /// Reads `read_keys`, hands them to `callback` and atomically commits the
    /// writes it returns.
    async fn run_transaction<'a>(
        &self,
        read_keys: Vec<DocumentKey>,
        callback: TransactionCallback<'a>,
    ) -> FirestoreResult<()>;

    /// Registers a listener. Snapshots for `target` are pushed to `sink` in
    /// the order the store produces them until [`Datastore::unlisten`].
    ///
    /// Stores that notify synchronously cannot wait for room in a bounded
    /// `sink`, so callers pass an unbounded channel.
    async fn listen(&self, target: ListenTarget, sink: Sender<ListenEvent>) -> FirestoreResult<ListenToken>;

    async fn unlisten(&self, token: ListenToken) -> FirestoreResult<()>;
}

pub use bridge::{BridgeDatastore, BridgeDatastoreBuilder};
pub use in_memory::InMemoryDatastore;
