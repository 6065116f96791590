//! # Tirian Trains ticketing core
//!
//! `tirian` owns the parts of the ticketing system that must stay correct
//! under concurrent callers: minting human-readable sequential identifiers
//! and keeping derived values (trip duration, ticket total cost) consistent
//! with the fields they are computed from.
//!
//! ## Core Concepts
//!
//! - **[`RecordStore`]**: a transactional key/record store with uniqueness
//!   enforcement. Backends live in [`store`].
//! - **[`Record`]**: an entity persisted in one [`Table`] of the store.
//! - **[`ids`]**: the sequential identifier minter with its
//!   retry-on-conflict loop.
//! - **[`derived`]**: pure duration and total-cost calculations.
//! - **[`hooks::EntityHooks`]**: explicit assign-then-persist orchestration
//!   per entity type.
//! - **[`reactor::TicketTrips`]**: every change to a ticket's trip set,
//!   settled together with the recomputed total.
//! - **[`booking::BookingService`]**: the purchase flow.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::{NaiveDate, NaiveTime};
//! use tirian::{
//!     booking::{BookingRequest, BookingService},
//!     clock::SystemClock,
//!     hooks::EntityHooks,
//!     model::{Customer, Trip, TripType},
//!     notify::TracingSink,
//!     store::in_memory::InMemoryRecordStore,
//! };
//!
//! async fn book_a_trip() -> tirian::Result<()> {
//!     let store = Arc::new(InMemoryRecordStore::default());
//!     let hooks = EntityHooks::new(store.clone(), Arc::new(SystemClock));
//!
//!     let birth = NaiveDate::from_ymd_opt(1998, 3, 14).unwrap();
//!     let customer = hooks
//!         .register_customer(Customer::new("Pevensie", "Lucy", birth))
//!         .await?;
//!
//!     let day = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
//!     let trip = Trip::new("20240620L001", day, 150, TripType::Local).with_times(
//!         NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
//!         NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
//!     );
//!     hooks.save_trip(trip).await?;
//!
//!     let booking = BookingService::new(hooks, Arc::new(TracingSink));
//!     let ticket = booking
//!         .purchase(BookingRequest::new(customer.key(), day, ["20240620L001"]))
//!         .await?;
//!     assert_eq!(ticket.record().total_cost(), 150);
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

// Lets `#[derive(Event)]` expand to `tirian::Event` inside this crate too.
extern crate self as tirian;

use std::{fmt::Debug, sync::Arc};

pub use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub mod booking;
pub mod clock;
pub mod cloudevent;
pub mod config;
pub mod derived;
pub mod hooks;
pub mod ids;
pub mod jobs;
pub mod model;
pub mod notify;
pub mod reactor;
pub mod repository;
pub mod seed;
pub mod store;
pub mod telemetry;

pub use cloudevent::CloudEvent;
pub use tirian_derive::Event;

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// A write collided with an existing key or an unexpected record version.
    ///
    /// The minter and the trip reactor retry on this; callers only see it
    /// when a retry budget runs out.
    #[error("record conflict")]
    Conflict,
    /// Occurs when a record could not be found.
    #[error("record not found")]
    NotFound,
    /// Every sequence number of an identifier partition is taken.
    #[error("sequence space exhausted for {namespace} partition {partition}")]
    CapacityExceeded {
        /// The namespace being minted in.
        namespace: Table,
        /// The exhausted partition key.
        partition: String,
    },
    /// A ticket's trip set changed but the recomputed total could not be
    /// persisted, so the change did not settle.
    #[error("trip association for ticket {ticket_id} did not settle: {source}")]
    AssociationInconsistency {
        /// The ticket whose association change failed.
        ticket_id: String,
        /// The underlying store failure.
        source: Box<Error>,
    },
    /// Wraps an error from the underlying record store.
    #[error("record store error: {0}")]
    Store(String),
    /// Occurs when an input fails a validation rule.
    #[error("validation error: {0}")]
    Validation(String),
    /// A domain event could not be handed to the notification layer.
    #[error("notification error: {0}")]
    Notify(String),
    /// Invalid or unsupported configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict | Self::Store(_) | Self::Notify(_) => true,
            Self::AssociationInconsistency { source, .. } => source.is_retryable(),
            Self::CapacityExceeded { .. }
            | Self::NotFound
            | Self::Validation(_)
            | Self::Config(_) => false,
        }
    }

    /// The message shown to end users. Store internals never leak here.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound => "The requested record does not exist.",
            Self::Validation(_) => "The request was rejected because some of its details are invalid.",
            _ => "The request could not be completed. Please try again later.",
        }
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The namespaces of the record store. Each one is an independent key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Customers, keyed by `YYNN` customer id.
    Customer,
    /// Trips, keyed by their externally assigned trip id.
    Trip,
    /// Tickets, keyed by `YYYYMMDDNNNN` ticket id.
    Ticket,
    /// Maintenance logs, keyed by `YYYYMMDDNNNN` log id.
    MaintenanceLog,
    /// Trains, keyed by train id.
    Train,
}

impl Table {
    /// The storage name of the namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customers",
            Self::Trip => "trips",
            Self::Ticket => "tickets",
            Self::MaintenanceLog => "maintenance_logs",
            Self::Train => "trains",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A marker trait for domain events handed to the notification layer.
///
/// The `Event` derive macro implements this trait for enums.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync {
    /// Returns a static string slice representing the type of the event.
    fn event_type(&self) -> &'static str;

    /// Returns the version of the event's schema.
    fn event_version(&self) -> u16;

    /// Returns the CloudEvent `source` URI associated with this event.
    fn event_source(&self) -> &'static str;
}

/// An entity persisted in one [`Table`] of a [`RecordStore`].
pub trait Record: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// The namespace this record lives in.
    const TABLE: Table;

    /// The primary key, or `None` while it has not been assigned yet.
    fn record_key(&self) -> Option<&str>;
}

/// A record as the store holds it: untyped JSON payload plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// The namespace of the record.
    pub table: Table,
    /// The primary key.
    pub key: String,
    /// Incremented by every successful write, starting at 1.
    pub version: i64,
    /// The record payload.
    pub payload: Value,
}

/// A typed record together with its key and stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct StoredRecord<R> {
    key: String,
    version: i64,
    record: R,
}

impl<R> StoredRecord<R> {
    /// Creates a new stored record.
    pub fn new(key: String, version: i64, record: R) -> Self {
        Self {
            key,
            version,
            record,
        }
    }

    /// Returns the primary key.
    pub fn key(&self) -> &str {
        &self.key
    }
    /// Returns the stored version.
    pub fn version(&self) -> i64 {
        self.version
    }
    /// Returns the record itself.
    pub fn record(&self) -> &R {
        &self.record
    }
    /// Consumes the stored record and returns the record.
    pub fn into_record(self) -> R {
        self.record
    }
}

/// The trait for record stores.
///
/// Every method is one atomic operation against the store: either it takes
/// effect completely or not at all.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record at version 1.
    ///
    /// Must fail with [`Error::Conflict`] when `key` already exists in
    /// `table`. This is the uniqueness guarantee the identifier minter
    /// relies on.
    async fn insert(&self, table: Table, key: &str, payload: Value) -> Result<RawRecord>;

    /// Replaces the payload of an existing record and bumps its version.
    ///
    /// With `Some(expected_version)` the write fails with
    /// [`Error::Conflict`] unless the stored version matches. A missing
    /// record is [`Error::NotFound`].
    async fn update(
        &self,
        table: Table,
        key: &str,
        expected_version: Option<i64>,
        payload: Value,
    ) -> Result<RawRecord>;

    /// Removes a record. Removing a missing record is [`Error::NotFound`].
    async fn delete(&self, table: Table, key: &str) -> Result<()>;

    /// Loads a single record.
    async fn get(&self, table: Table, key: &str) -> Result<Option<RawRecord>>;

    /// Loads every record of a namespace, ordered by key.
    async fn list(&self, table: Table) -> Result<Vec<RawRecord>>;

    /// Returns the greatest key in `table` that starts with `prefix`.
    async fn latest_key_with_prefix(&self, table: Table, prefix: &str) -> Result<Option<String>>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    async fn insert(&self, table: Table, key: &str, payload: Value) -> Result<RawRecord> {
        (**self).insert(table, key, payload).await
    }

    async fn update(
        &self,
        table: Table,
        key: &str,
        expected_version: Option<i64>,
        payload: Value,
    ) -> Result<RawRecord> {
        (**self).update(table, key, expected_version, payload).await
    }

    async fn delete(&self, table: Table, key: &str) -> Result<()> {
        (**self).delete(table, key).await
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<RawRecord>> {
        (**self).get(table, key).await
    }

    async fn list(&self, table: Table) -> Result<Vec<RawRecord>> {
        (**self).list(table).await
    }

    async fn latest_key_with_prefix(&self, table: Table, prefix: &str) -> Result<Option<String>> {
        (**self).latest_key_with_prefix(table, prefix).await
    }
}
