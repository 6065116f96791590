//! Provides a typed repository over a [`RecordStore`].
use std::{marker::PhantomData, sync::Arc};

use tracing::instrument;

use crate::{Error, RawRecord, Record, RecordStore, Result, StoredRecord};

/// A typed view of one namespace of a [`RecordStore`].
///
/// The repository owns (de)serialization between `R` and the store's JSON
/// payloads; the store owns atomicity and uniqueness. Reads are public.
/// Writes stay inside the crate so identifiers and derived fields only ever
/// reach the store through [`EntityHooks`](crate::hooks::EntityHooks) and
/// [`TicketTrips`](crate::reactor::TicketTrips).
pub struct Repository<R, S>
where
    R: Record,
    S: RecordStore + ?Sized,
{
    store: Arc<S>,
    _phantom: PhantomData<fn() -> R>,
}

impl<R, S> Clone for Repository<R, S>
where
    R: Record,
    S: RecordStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _phantom: PhantomData,
        }
    }
}

fn decode<R: Record>(raw: RawRecord) -> Result<StoredRecord<R>> {
    let record = serde_json::from_value(raw.payload).map_err(|e| Error::Store(e.to_string()))?;
    Ok(StoredRecord::new(raw.key, raw.version, record))
}

fn encode<R: Record>(record: &R) -> Result<serde_json::Value> {
    serde_json::to_value(record).map_err(|e| Error::Store(e.to_string()))
}

impl<R, S> Repository<R, S>
where
    R: Record,
    S: RecordStore + ?Sized,
{
    /// Creates a new `Repository`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Inserts `record` under `key`, failing with [`Error::Conflict`] if the
    /// key is taken.
    #[instrument(skip(self, record), fields(table = %R::TABLE))]
    pub(crate) async fn insert(&self, key: &str, record: &R) -> Result<StoredRecord<R>> {
        let raw = self.store.insert(R::TABLE, key, encode(record)?).await?;
        Ok(StoredRecord::new(raw.key, raw.version, record.clone()))
    }

    /// Overwrites the record stored under `key`.
    #[instrument(skip(self, record), fields(table = %R::TABLE))]
    pub(crate) async fn update(
        &self,
        key: &str,
        expected_version: Option<i64>,
        record: &R,
    ) -> Result<StoredRecord<R>> {
        let raw = self
            .store
            .update(R::TABLE, key, expected_version, encode(record)?)
            .await?;
        Ok(StoredRecord::new(raw.key, raw.version, record.clone()))
    }

    /// Removes the record under `key`.
    #[instrument(skip(self), fields(table = %R::TABLE))]
    pub(crate) async fn remove(&self, key: &str) -> Result<()> {
        self.store.delete(R::TABLE, key).await
    }

    /// Loads the record under `key`, if any.
    #[instrument(skip(self), fields(table = %R::TABLE))]
    pub async fn find(&self, key: &str) -> Result<Option<StoredRecord<R>>> {
        self.store
            .get(R::TABLE, key)
            .await?
            .map(decode)
            .transpose()
    }

    /// Loads the record under `key`, failing with [`Error::NotFound`].
    pub async fn load(&self, key: &str) -> Result<StoredRecord<R>> {
        self.find(key).await?.ok_or(Error::NotFound)
    }

    /// Loads every record of the namespace, ordered by key.
    #[instrument(skip(self), fields(table = %R::TABLE))]
    pub async fn list(&self) -> Result<Vec<StoredRecord<R>>> {
        self.store
            .list(R::TABLE)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }
}
