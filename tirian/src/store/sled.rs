//! A persistent `RecordStore` implementation using `sled`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::{Error, RawRecord, RecordStore, Result, Table};

/// The on-disk value layout: the payload plus its version.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: i64,
    payload: Value,
}

fn to_store_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Store(e.to_string())
}

fn decode(table: Table, key: &[u8], value: &[u8]) -> Result<RawRecord> {
    let envelope: Envelope = serde_json::from_slice(value).map_err(to_store_error)?;
    let key = String::from_utf8(key.to_vec()).map_err(to_store_error)?;
    Ok(RawRecord {
        table,
        key,
        version: envelope.version,
        payload: envelope.payload,
    })
}

/// A persistent, thread-safe record store using `sled`.
///
/// Every namespace is its own `sled::Tree`, which is an ordered key-value
/// store. Inserts and versioned updates are single compare-and-swap
/// operations, so concurrent writers across threads never overwrite each
/// other silently.
#[derive(Clone)]
pub struct SledRecordStore {
    db: sled::Db,
}

impl SledRecordStore {
    /// Creates a new `SledRecordStore`.
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    fn tree(&self, table: Table) -> Result<sled::Tree> {
        self.db.open_tree(table.as_str()).map_err(to_store_error)
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    #[instrument(skip(self, payload), fields(table = %table))]
    async fn insert(&self, table: Table, key: &str, payload: Value) -> Result<RawRecord> {
        let tree = self.tree(table)?;
        let envelope = Envelope {
            version: 1,
            payload,
        };
        let value = serde_json::to_vec(&envelope).map_err(to_store_error)?;

        tree.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(value))
            .map_err(to_store_error)?
            .map_err(|_| Error::Conflict)?;

        Ok(RawRecord {
            table,
            key: key.to_owned(),
            version: envelope.version,
            payload: envelope.payload,
        })
    }

    #[instrument(skip(self, payload), fields(table = %table))]
    async fn update(
        &self,
        table: Table,
        key: &str,
        expected_version: Option<i64>,
        payload: Value,
    ) -> Result<RawRecord> {
        let tree = self.tree(table)?;
        let current = tree
            .get(key.as_bytes())
            .map_err(to_store_error)?
            .ok_or(Error::NotFound)?;
        let stored: Envelope = serde_json::from_slice(&current).map_err(to_store_error)?;

        if expected_version.is_some_and(|expected| expected != stored.version) {
            return Err(Error::Conflict);
        }

        let envelope = Envelope {
            version: stored.version + 1,
            payload,
        };
        let value = serde_json::to_vec(&envelope).map_err(to_store_error)?;

        // A concurrent writer between the read and this swap loses us the race.
        tree.compare_and_swap(key.as_bytes(), Some(&current), Some(value))
            .map_err(to_store_error)?
            .map_err(|_| Error::Conflict)?;

        Ok(RawRecord {
            table,
            key: key.to_owned(),
            version: envelope.version,
            payload: envelope.payload,
        })
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        let tree = self.tree(table)?;
        tree.remove(key.as_bytes())
            .map_err(to_store_error)?
            .map(drop)
            .ok_or(Error::NotFound)
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn get(&self, table: Table, key: &str) -> Result<Option<RawRecord>> {
        let tree = self.tree(table)?;
        tree.get(key.as_bytes())
            .map_err(to_store_error)?
            .map(|value| decode(table, key.as_bytes(), &value))
            .transpose()
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn list(&self, table: Table) -> Result<Vec<RawRecord>> {
        let tree = self.tree(table)?;
        tree.iter()
            .map(|res| {
                let (k, v) = res.map_err(to_store_error)?;
                decode(table, &k, &v)
            })
            .collect()
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn latest_key_with_prefix(&self, table: Table, prefix: &str) -> Result<Option<String>> {
        let tree = self.tree(table)?;
        match tree.scan_prefix(prefix.as_bytes()).next_back() {
            Some(res) => {
                let (k, _) = res.map_err(to_store_error)?;
                String::from_utf8(k.to_vec())
                    .map(Some)
                    .map_err(to_store_error)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_store() -> (tempfile::TempDir, SledRecordStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = sled::open(dir.path()).expect("open sled");
        (dir, SledRecordStore::new(db))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_keys() {
        let (_dir, store) = temp_store();
        store
            .insert(Table::Customer, "2400", json!({ "given_name": "Lucy" }))
            .await
            .expect("first insert");

        let err = store
            .insert(Table::Customer, "2400", json!({ "given_name": "Edmund" }))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, Error::Conflict));

        let stored = store
            .get(Table::Customer, "2400")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.payload, json!({ "given_name": "Lucy" }));
    }

    #[tokio::test]
    async fn versioned_update_and_prefix_scan() {
        let (_dir, store) = temp_store();
        for key in ["202406190003", "202406200001", "202406200002"] {
            store
                .insert(Table::Ticket, key, json!({}))
                .await
                .expect("insert");
        }

        let latest = store
            .latest_key_with_prefix(Table::Ticket, "20240620")
            .await
            .expect("scan");
        assert_eq!(latest.as_deref(), Some("202406200002"));

        let updated = store
            .update(Table::Ticket, "202406200001", Some(1), json!({ "total_cost": 5 }))
            .await
            .expect("update");
        assert_eq!(updated.version, 2);

        let err = store
            .update(Table::Ticket, "202406200001", Some(1), json!({}))
            .await
            .expect_err("stale");
        assert!(matches!(err, Error::Conflict));

        let all = store.list(Table::Ticket).await.expect("list");
        assert_eq!(all.len(), 3);
    }
}
