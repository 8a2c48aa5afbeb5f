use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::firestore::api::converter::FirestoreDataConverter;
use crate::firestore::api::document::ensure_not_cancelled;
use crate::firestore::api::operations::{self, SetOptions};
use crate::firestore::constants::MAX_BATCH_WRITES;
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::remote::datastore::{Datastore, WriteOperation};
use crate::firestore::value::FirestoreValue;

/// Aggregates write operations and commits them atomically.
#[derive(Clone)]
pub struct WriteBatch {
    datastore: Arc<dyn Datastore>,
    cancellation: Option<CancellationToken>,
    writes: Vec<WriteOperation>,
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl WriteBatch {
    pub(crate) fn new(datastore: Arc<dyn Datastore>, cancellation: Option<CancellationToken>) -> Self {
        Self {
            datastore,
            cancellation,
            writes: Vec::new(),
        }
    }

    /// Adds a set operation to the batch.
    pub fn set(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        let write = operations::set_write(path, data, options.unwrap_or_default())?;
        self.writes.push(write);
        Ok(self)
    }

    /// Adds a typed set operation using the provided converter.
    pub fn set_with_converter<C>(
        &mut self,
        path: &str,
        converter: &C,
        model: &C::Model,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self>
    where
        C: FirestoreDataConverter,
    {
        let map = converter.to_map(model)?;
        self.set(path, map, options)
    }

    /// Adds an update operation; keys are dot-separated field paths.
    pub fn update(
        &mut self,
        path: &str,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        let write = operations::update_write(path, data)?;
        self.writes.push(write);
        Ok(self)
    }

    pub fn delete(&mut self, path: &str) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        let write = operations::delete_write(path)?;
        self.writes.push(write);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits all queued writes atomically.
    pub async fn commit(self) -> FirestoreResult<()> {
        ensure_not_cancelled(self.cancellation.as_ref(), "batch commit")?;
        if self.writes.is_empty() {
            return Ok(());
        }
        log::debug!("Committing batch of {} writes", self.writes.len());
        self.datastore.commit(self.writes).await
    }

    fn ensure_capacity(&self) -> FirestoreResult<()> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(invalid_argument(format!(
                "WriteBatch cannot contain more than {MAX_BATCH_WRITES} operations"
            )));
        }
        Ok(())
    }
}
