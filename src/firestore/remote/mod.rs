pub mod bridge;
pub mod datastore;
pub mod rpc_error;
pub mod serializer;
pub(crate) mod structured_query;

pub use bridge::{Bridge, BridgeError, BridgeListenHandle};
pub use datastore::{
    BridgeDatastore, BridgeDatastoreBuilder, Datastore, InMemoryDatastore, ListenEvent,
    ListenSnapshot, ListenTarget, ListenToken, TransactionCallback, TransactionReads,
    WriteOperation,
};
pub use rpc_error::map_bridge_error;
