use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::firestore::api::document::ensure_not_cancelled;
use crate::firestore::api::operations::{self, validate_document_path, SetOptions};
use crate::firestore::api::DocumentSnapshot;
use crate::firestore::error::{internal_error, invalid_argument, not_found, FirestoreResult};
use crate::firestore::model::DocumentKey;
use crate::firestore::remote::datastore::{Datastore, TransactionReads, WriteOperation};
use crate::firestore::value::FirestoreValue;

/// Reads and writes issued from inside `FirestoreClient::run_transaction`.
///
/// The update function may run more than once against different
/// implementations of this trait, so it must not have side effects outside
/// of the transaction and must issue the same reads on every run.
pub trait Transaction: Send {
    /// Reads a document. All reads must happen before the first write.
    fn get(&mut self, path: &str) -> FirestoreResult<DocumentSnapshot>;

    fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: SetOptions,
    ) -> FirestoreResult<()>;

    /// Updates fields of an existing document; keys are dot-separated paths.
    fn update(&mut self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()>;

    fn delete(&mut self, path: &str) -> FirestoreResult<()>;
}

/// First pass: records which documents are read. Every read answers with a
/// missing document and writes are validated but dropped.
#[derive(Default)]
pub(crate) struct DiscoveryTransaction {
    read_keys: Vec<DocumentKey>,
}

impl DiscoveryTransaction {
    pub(crate) fn into_read_keys(self) -> Vec<DocumentKey> {
        self.read_keys
    }
}

impl Transaction for DiscoveryTransaction {
    fn get(&mut self, path: &str) -> FirestoreResult<DocumentSnapshot> {
        let key = validate_document_path(path)?;
        if !self.read_keys.contains(&key) {
            self.read_keys.push(key.clone());
        }
        Ok(DocumentSnapshot::missing(key))
    }

    fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: SetOptions,
    ) -> FirestoreResult<()> {
        operations::set_write(path, data, options).map(|_| ())
    }

    fn update(&mut self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        operations::update_write(path, data).map(|_| ())
    }

    fn delete(&mut self, path: &str) -> FirestoreResult<()> {
        operations::delete_write(path).map(|_| ())
    }
}

/// Collects writes on behalf of the two executing implementations.
#[derive(Default)]
struct WriteLog {
    writes: Vec<WriteOperation>,
}

impl WriteLog {
    fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: SetOptions,
    ) -> FirestoreResult<()> {
        self.writes.push(operations::set_write(path, data, options)?);
        Ok(())
    }

    fn update(&mut self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        self.writes.push(operations::update_write(path, data)?);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> FirestoreResult<()> {
        self.writes.push(operations::delete_write(path)?);
        Ok(())
    }
}

/// Write-only transaction committed as a single batch.
#[derive(Default)]
pub(crate) struct DirectTransaction {
    log: WriteLog,
}

impl DirectTransaction {
    pub(crate) fn into_writes(self) -> Vec<WriteOperation> {
        self.log.writes
    }
}

impl Transaction for DirectTransaction {
    fn get(&mut self, path: &str) -> FirestoreResult<DocumentSnapshot> {
        Err(invalid_argument(format!(
            "Transaction read '{path}' was not issued on the first run of the update function; \
             reads must not depend on state outside the transaction"
        )))
    }

    fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: SetOptions,
    ) -> FirestoreResult<()> {
        self.log.set(path, data, options)
    }

    fn update(&mut self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        self.log.update(path, data)
    }

    fn delete(&mut self, path: &str) -> FirestoreResult<()> {
        self.log.delete(path)
    }
}

/// Answers reads from the documents the store fetched for this attempt.
pub(crate) struct ExecutingTransaction<'r> {
    reads: &'r TransactionReads,
    log: WriteLog,
}

impl<'r> ExecutingTransaction<'r> {
    pub(crate) fn new(reads: &'r TransactionReads) -> Self {
        Self {
            reads,
            log: WriteLog::default(),
        }
    }

    pub(crate) fn into_writes(self) -> Vec<WriteOperation> {
        self.log.writes
    }
}

impl Transaction for ExecutingTransaction<'_> {
    fn get(&mut self, path: &str) -> FirestoreResult<DocumentSnapshot> {
        if !self.log.writes.is_empty() {
            return Err(invalid_argument(
                "Transactions require all reads to be executed before all writes",
            ));
        }
        let key = validate_document_path(path)?;
        self.reads.get(&key).cloned().ok_or_else(|| {
            not_found(format!(
                "Document '{key}' was not read on the first run of the update function"
            ))
        })
    }

    fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: SetOptions,
    ) -> FirestoreResult<()> {
        self.log.set(path, data, options)
    }

    fn update(&mut self, path: &str, data: BTreeMap<String, FirestoreValue>) -> FirestoreResult<()> {
        self.log.update(path, data)
    }

    fn delete(&mut self, path: &str) -> FirestoreResult<()> {
        self.log.delete(path)
    }
}

/// Runs `update` as one all-or-nothing unit.
///
/// A discovery run finds the documents `update` reads. Write-only
/// transactions are committed as a plain atomic batch; otherwise the store
/// fetches the reads, runs `update` against them and commits its writes
/// atomically. Errors returned by `update` abort without writing. Nothing is
/// retried.
pub(crate) async fn run_transaction<T, F>(
    datastore: &dyn Datastore,
    cancellation: Option<&CancellationToken>,
    update: F,
) -> FirestoreResult<T>
where
    T: Send,
    F: Fn(&mut dyn Transaction) -> FirestoreResult<T> + Send + Sync,
{
    ensure_not_cancelled(cancellation, "transaction")?;

    let mut discovery = DiscoveryTransaction::default();
    if let Err(err) = update(&mut discovery) {
        log::debug!("Transaction discovery run failed, continuing: {err}");
    }
    let read_keys = discovery.into_read_keys();
    ensure_not_cancelled(cancellation, "transaction")?;

    if read_keys.is_empty() {
        let mut direct = DirectTransaction::default();
        let result = update(&mut direct)?;
        let writes = direct.into_writes();
        ensure_not_cancelled(cancellation, "transaction commit")?;
        if !writes.is_empty() {
            log::debug!("Committing write-only transaction ({} writes)", writes.len());
            datastore.commit(writes).await?;
        }
        return Ok(result);
    }

    log::debug!("Running transaction over {} documents", read_keys.len());
    let mut result = None;
    let slot = &mut result;
    let update = &update;
    datastore
        .run_transaction(
            read_keys,
            Box::new(move |reads: &TransactionReads| {
                let mut transaction = ExecutingTransaction::new(reads);
                *slot = Some(update(&mut transaction)?);
                Ok(transaction.into_writes())
            }),
        )
        .await?;

    result.ok_or_else(|| internal_error("Transaction finished without running the update function"))
}
