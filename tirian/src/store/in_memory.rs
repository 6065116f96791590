//! An in-memory record store, useful for testing and development.

use std::{
    collections::{BTreeMap, btree_map},
    ops::Bound,
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::{Error, RawRecord, RecordStore, Result, Table};

use dashmap::DashMap;

/// Records of one namespace, ordered by key.
type TableMap = BTreeMap<String, RawRecord>;

/// An in-memory, thread-safe record store.
///
/// Each namespace is guarded by its own map entry, so every operation on a
/// namespace is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: DashMap<Table, TableMap>,
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    #[instrument(skip(self, payload), fields(table = %table))]
    async fn insert(&self, table: Table, key: &str, payload: Value) -> Result<RawRecord> {
        let mut records = self.tables.entry(table).or_default();

        match records.entry(key.to_owned()) {
            btree_map::Entry::Occupied(_) => Err(Error::Conflict),
            btree_map::Entry::Vacant(slot) => {
                let record = RawRecord {
                    table,
                    key: key.to_owned(),
                    version: 1,
                    payload,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    #[instrument(skip(self, payload), fields(table = %table))]
    async fn update(
        &self,
        table: Table,
        key: &str,
        expected_version: Option<i64>,
        payload: Value,
    ) -> Result<RawRecord> {
        let mut records = self.tables.entry(table).or_default();

        let record = records.get_mut(key).ok_or(Error::NotFound)?;
        if expected_version.is_some_and(|expected| expected != record.version) {
            return Err(Error::Conflict);
        }
        record.version += 1;
        record.payload = payload;
        Ok(record.clone())
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        let mut records = self.tables.entry(table).or_default();
        records.remove(key).map(drop).ok_or(Error::NotFound)
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn get(&self, table: Table, key: &str) -> Result<Option<RawRecord>> {
        Ok(self
            .tables
            .get(&table)
            .and_then(|records| records.get(key).cloned()))
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn list(&self, table: Table) -> Result<Vec<RawRecord>> {
        Ok(self
            .tables
            .get(&table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn latest_key_with_prefix(&self, table: Table, prefix: &str) -> Result<Option<String>> {
        Ok(self.tables.get(&table).and_then(|records| {
            records
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix))
                .last()
                .map(|(key, _)| key.clone())
        }))
    }
}
