/// Key that marks a tagged sentinel record in mutation payloads.
pub(crate) const SENTINEL_TAG: &str = "__fieldValue__";

pub(crate) const SENTINEL_SERVER_TIMESTAMP: &str = "serverTimestamp";
pub(crate) const SENTINEL_INCREMENT: &str = "increment";
pub(crate) const SENTINEL_ARRAY_UNION: &str = "arrayUnion";
pub(crate) const SENTINEL_ARRAY_REMOVE: &str = "arrayRemove";
pub(crate) const SENTINEL_DELETE: &str = "delete";

/// Reserved field path that addresses the document path itself.
pub(crate) const DOCUMENT_ID_FIELD: &str = "__name__";

pub(crate) const MAX_BATCH_WRITES: usize = 500;

pub(crate) const AUTO_ID_LENGTH: usize = 20;

/// Default capacity of the per-subscription notification channel used by the bridge.
pub(crate) const DEFAULT_LISTEN_CAPACITY: usize = 64;
