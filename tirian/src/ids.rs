//! Sequential identifier minting.
//!
//! Identifiers are `partition + zero-padded sequence`, e.g. customer `2400`
//! (birth year `24`, sequence `00`) or ticket `202406200001` (purchase date,
//! sequence `0001`). The next sequence is derived from the highest key
//! already in the store; the durable insert is what claims it. Two callers
//! can derive the same candidate, so the insert is retried with the next
//! number whenever the store reports the key as taken. Nothing is cached in
//! process: every mint starts from the store's current state, which keeps
//! the scheme correct across processes and hosts.

use std::future::Future;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, instrument};

use crate::{
    Error, Record, RecordStore, Result, Table,
    model::{Customer, MaintenanceLog, Ticket},
};

/// How identifiers of one namespace are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpec {
    /// The namespace minted in.
    pub namespace: Table,
    /// Zero-padded digits reserved for the sequence.
    pub width: u32,
    /// The first sequence number of a fresh partition.
    pub start: u32,
}

impl SequenceSpec {
    /// `YYNN`: two-digit birth year, sequences `00`-`99`.
    pub const CUSTOMER: Self = Self {
        namespace: Table::Customer,
        width: 2,
        start: 0,
    };

    /// `YYYYMMDDNNNN`: purchase date, sequences `0001`-`9999`.
    pub const TICKET: Self = Self {
        namespace: Table::Ticket,
        width: 4,
        start: 1,
    };

    /// `YYYYMMDDNNNN`: log date, sequences `0001`-`9999`.
    pub const MAINTENANCE_LOG: Self = Self {
        namespace: Table::MaintenanceLog,
        width: 4,
        start: 1,
    };

    /// Number of sequence values a partition can hold, `10^width`.
    pub fn capacity(&self) -> u32 {
        10u32.pow(self.width)
    }

    /// Formats the identifier for `sequence` in `partition`.
    pub fn format(&self, partition: &str, sequence: u32) -> String {
        format!("{partition}{sequence:0width$}", width = self.width as usize)
    }

    /// The first candidate after `latest`, the highest key in the partition.
    ///
    /// No key, or a suffix that is not a number, starts the partition fresh.
    pub fn next_sequence(&self, partition: &str, latest: Option<&str>) -> u32 {
        latest
            .and_then(|key| key.strip_prefix(partition))
            .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|suffix| suffix.parse::<u32>().ok())
            .map_or(self.start, |last| last.saturating_add(1).max(self.start))
    }

    /// Checks that `id` is a well-formed identifier of `partition`.
    pub fn validate(&self, partition: &str, id: &str) -> Result<()> {
        let well_formed = id.strip_prefix(partition).is_some_and(|suffix| {
            suffix.len() == self.width as usize && suffix.bytes().all(|b| b.is_ascii_digit())
        });
        if well_formed {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "{} id {id:?} does not match partition {partition:?} with {} sequence digits",
                self.namespace, self.width
            )))
        }
    }
}

/// The customer partition: last two digits of the birth year.
pub fn customer_partition(birth_date: NaiveDate) -> String {
    format!("{:02}", birth_date.year().rem_euclid(100))
}

/// The ticket and maintenance-log partition: `YYYYMMDD`.
pub fn date_partition(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Mints the next free identifier of `partition` and claims it.
///
/// `insert` must perform the durable insert of the record under the given
/// identifier as one atomic operation, returning [`Error::Conflict`] when the
/// identifier is already taken. Conflicts move on to the next sequence
/// number; once the partition is full the mint fails with
/// [`Error::CapacityExceeded`]. Any other error is returned as is.
#[instrument(skip(store, insert), fields(namespace = %spec.namespace))]
pub async fn mint<S, F, Fut, T>(
    store: &S,
    spec: SequenceSpec,
    partition: &str,
    mut insert: F,
) -> Result<T>
where
    S: RecordStore + ?Sized,
    F: FnMut(String) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    let latest = store
        .latest_key_with_prefix(spec.namespace, partition)
        .await?;
    let mut sequence = spec.next_sequence(partition, latest.as_deref());

    loop {
        if sequence >= spec.capacity() {
            return Err(Error::CapacityExceeded {
                namespace: spec.namespace,
                partition: partition.to_owned(),
            });
        }

        let candidate = spec.format(partition, sequence);
        match insert(candidate.clone()).await {
            Ok(claimed) => {
                info!(id = %candidate, "minted identifier");
                return Ok(claimed);
            }
            Err(Error::Conflict) => {
                debug!(id = %candidate, "identifier taken, trying next sequence");
                sequence += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Records whose primary key comes from [`mint`].
pub(crate) trait Minted: Record {
    const SEQUENCE: SequenceSpec;

    /// Sets the identifier unless one is already present.
    fn assign_identifier(&mut self, id: String);
}

impl Minted for Customer {
    const SEQUENCE: SequenceSpec = SequenceSpec::CUSTOMER;

    fn assign_identifier(&mut self, id: String) {
        self.assign_id(id);
    }
}

impl Minted for Ticket {
    const SEQUENCE: SequenceSpec = SequenceSpec::TICKET;

    fn assign_identifier(&mut self, id: String) {
        self.assign_id(id);
    }
}

impl Minted for MaintenanceLog {
    const SEQUENCE: SequenceSpec = SequenceSpec::MAINTENANCE_LOG;

    fn assign_identifier(&mut self, id: String) {
        self.assign_id(id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::store::in_memory::InMemoryRecordStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn partitions() {
        assert_eq!(customer_partition(date(2024, 2, 29)), "24");
        assert_eq!(customer_partition(date(2000, 1, 1)), "00");
        assert_eq!(customer_partition(date(1907, 5, 1)), "07");
        assert_eq!(date_partition(date(2024, 6, 20)), "20240620");
    }

    #[test]
    fn next_sequence_follows_latest_key() {
        let spec = SequenceSpec::TICKET;
        assert_eq!(spec.next_sequence("20240620", None), 1);
        assert_eq!(spec.next_sequence("20240620", Some("202406200041")), 42);
        assert_eq!(spec.next_sequence("20240620", Some("20240620abcd")), 1);
        assert_eq!(spec.next_sequence("20240620", Some("20240620")), 1);
        assert_eq!(spec.next_sequence("20240620", Some("202406200000")), 1);

        let spec = SequenceSpec::CUSTOMER;
        assert_eq!(spec.next_sequence("24", None), 0);
        assert_eq!(spec.next_sequence("24", Some("2400")), 1);
    }

    #[test]
    fn format_pads_to_width() {
        assert_eq!(SequenceSpec::CUSTOMER.format("24", 0), "2400");
        assert_eq!(SequenceSpec::TICKET.format("20240620", 1), "202406200001");
        assert_eq!(SequenceSpec::MAINTENANCE_LOG.format("20240620", 9999), "202406209999");
    }

    #[test]
    fn validate_checks_prefix_and_width() {
        let spec = SequenceSpec::CUSTOMER;
        assert!(spec.validate("00", "0000").is_ok());
        assert!(matches!(spec.validate("01", "0000"), Err(Error::Validation(_))));
        assert!(matches!(spec.validate("00", "000"), Err(Error::Validation(_))));
        assert!(matches!(spec.validate("00", "00x1"), Err(Error::Validation(_))));
    }

    async fn mint_key(store: &InMemoryRecordStore, spec: SequenceSpec, partition: &str) -> Result<String> {
        mint(store, spec, partition, |id| async move {
            store.insert(spec.namespace, &id, json!({})).await.map(|raw| raw.key)
        })
        .await
    }

    #[tokio::test]
    async fn first_identifiers_per_namespace() {
        let store = InMemoryRecordStore::default();
        assert_eq!(mint_key(&store, SequenceSpec::CUSTOMER, "24").await.unwrap(), "2400");
        assert_eq!(mint_key(&store, SequenceSpec::CUSTOMER, "24").await.unwrap(), "2401");
        assert_eq!(
            mint_key(&store, SequenceSpec::TICKET, "20240620").await.unwrap(),
            "202406200001"
        );
        assert_eq!(
            mint_key(&store, SequenceSpec::MAINTENANCE_LOG, "20240620").await.unwrap(),
            "202406200001"
        );
    }

    #[tokio::test]
    async fn conflicts_advance_to_the_next_sequence() {
        let store = InMemoryRecordStore::default();
        let attempts = AtomicUsize::new(0);

        // Simulate two concurrent winners claiming 0001 and 0002 after the
        // lookup but before our insert.
        let id = mint(&store, SequenceSpec::TICKET, "20240620", |id| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let store = &store;
            async move {
                if attempt < 2 {
                    return Err(Error::Conflict);
                }
                store
                    .insert(Table::Ticket, &id, json!({}))
                    .await
                    .map(|raw| raw.key)
            }
        })
        .await
        .expect("mint");

        assert_eq!(id, "202406200003");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let store = InMemoryRecordStore::default();
        let attempts = AtomicUsize::new(0);

        let err = mint(&store, SequenceSpec::TICKET, "20240620", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Store("connection reset".into())) }
        })
        .await
        .expect_err("store failure");

        assert!(matches!(err, Error::Store(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn customer_partition_holds_one_hundred_ids() {
        let store = InMemoryRecordStore::default();
        for expected in 0..100 {
            let id = mint_key(&store, SequenceSpec::CUSTOMER, "24").await.unwrap();
            assert_eq!(id, format!("24{expected:02}"));
        }

        let err = mint_key(&store, SequenceSpec::CUSTOMER, "24")
            .await
            .expect_err("partition is full");
        assert!(matches!(
            err,
            Error::CapacityExceeded { namespace: Table::Customer, ref partition } if partition == "24"
        ));
    }

    #[tokio::test]
    async fn ticket_partition_is_full_after_9999() {
        let store = InMemoryRecordStore::default();
        store
            .insert(Table::Ticket, "202406209999", json!({}))
            .await
            .unwrap();

        let err = mint_key(&store, SequenceSpec::TICKET, "20240620")
            .await
            .expect_err("partition is full");
        assert!(matches!(err, Error::CapacityExceeded { namespace: Table::Ticket, .. }));

        // Other days are unaffected.
        assert_eq!(
            mint_key(&store, SequenceSpec::TICKET, "20240621").await.unwrap(),
            "202406210001"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mints_are_distinct_and_gapless() {
        let store = Arc::new(InMemoryRecordStore::default());
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    mint_key(&store, SequenceSpec::TICKET, "20240620").await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("join").expect("mint"));
        }
        ids.sort();

        let expected: Vec<_> = (1..=64)
            .map(|n| SequenceSpec::TICKET.format("20240620", n))
            .collect();
        assert_eq!(ids, expected);
    }
}
