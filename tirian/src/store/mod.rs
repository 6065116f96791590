//! The store module contains the implementations of the record store.

use std::sync::Arc;

use crate::{
    Error, RecordStore, Result,
    config::{Config, StorageBackend},
};

// The in-memory implementation is compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory record store.
pub mod in_memory;

// The persistent `sled` implementation is compiled when the `sled-storage`
// feature is enabled.
#[cfg(feature = "sled-storage")]
/// A persistent record store using `sled`.
pub mod sled;

// SQLx / Postgres implementation compiled when the `postgres-storage` feature
// is enabled.
#[cfg(feature = "postgres-storage")]
pub mod sqlx_postgres;

/// Opens the store selected by `config`.
///
/// Fails with [`Error::Config`] when the backend was not compiled in.
pub async fn open(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match config.storage {
        StorageBackend::Memory => open_in_memory(),
        StorageBackend::Sled => open_sled(config),
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "in-memory")]
fn open_in_memory() -> Result<Arc<dyn RecordStore>> {
    Ok(Arc::new(in_memory::InMemoryRecordStore::default()))
}

#[cfg(not(feature = "in-memory"))]
fn open_in_memory() -> Result<Arc<dyn RecordStore>> {
    Err(Error::Config("built without the `in-memory` feature".into()))
}

#[cfg(feature = "sled-storage")]
fn open_sled(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let db = ::sled::open(&config.sled_path).map_err(|e| Error::Store(e.to_string()))?;
    Ok(Arc::new(self::sled::SledRecordStore::new(db)))
}

#[cfg(not(feature = "sled-storage"))]
fn open_sled(_config: &Config) -> Result<Arc<dyn RecordStore>> {
    Err(Error::Config("built without the `sled-storage` feature".into()))
}

#[cfg(feature = "postgres-storage")]
async fn open_postgres(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| Error::Config("DATABASE_URL is required for postgres storage".into()))?;
    let pool = sqlx::PgPool::connect(url)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    let store = sqlx_postgres::SqlxRecordStore::new(pool);
    store
        .setup()
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres-storage"))]
async fn open_postgres(_config: &Config) -> Result<Arc<dyn RecordStore>> {
    Err(Error::Config(
        "built without the `postgres-storage` feature".into(),
    ))
}
