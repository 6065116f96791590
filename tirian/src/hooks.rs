//! Write-path orchestration per entity type.
//!
//! New customers, tickets and maintenance logs go through two explicit
//! steps: pick the identifier partition (defaulting dates from the clock
//! first), then [`ids::mint`] claims an identifier by persisting the record
//! under it. Records that already carry an identifier are written in place
//! and never re-minted. Trips get their duration recomputed before every
//! write.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::{
    Error, Record, RecordStore, Result, StoredRecord,
    clock::Clock,
    ids::{self, Minted, SequenceSpec},
    model::{Customer, MaintenanceLog, Ticket, Train, Trip},
    repository::Repository,
};

/// Upper bound on optimistic write attempts against one record.
pub(crate) const MAX_WRITE_ATTEMPTS: usize = 8;

/// Persists entities, assigning identifiers and derived fields on the way.
pub struct EntityHooks<S: RecordStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore + ?Sized> Clone for EntityHooks<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: RecordStore + ?Sized> EntityHooks<S> {
    /// Creates hooks writing to `store`, with date defaults from `clock`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The clock used for date defaults.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A typed repository over the same store. Its writes are crate-private.
    pub fn repository<R: Record>(&self) -> Repository<R, S> {
        Repository::new(self.store.clone())
    }

    /// Registers a new customer under a freshly minted `YYNN` id.
    ///
    /// A customer that already has an id is saved as is.
    #[instrument(skip(self, customer), fields(birth_date = %customer.birth_date))]
    pub async fn register_customer(&self, customer: Customer) -> Result<StoredRecord<Customer>> {
        match customer.customer_id() {
            Some(_) => self.save_customer(customer).await,
            None => {
                let partition = ids::customer_partition(customer.birth_date);
                self.mint_and_persist(customer, &partition).await
            }
        }
    }

    /// Saves a customer. The identifier, once assigned, never changes, even
    /// when the birth date is edited.
    pub async fn save_customer(&self, customer: Customer) -> Result<StoredRecord<Customer>> {
        let Some(id) = customer.customer_id().map(str::to_owned) else {
            let partition = ids::customer_partition(customer.birth_date);
            return self.mint_and_persist(customer, &partition).await;
        };
        let partition = ids::customer_partition(customer.birth_date);
        self.write_in_place(&id, &customer, || SequenceSpec::CUSTOMER.validate(&partition, &id))
            .await
    }

    /// Persists an empty ticket shell under a freshly minted id, defaulting
    /// the purchase date to today.
    ///
    /// Trips are attached afterwards through
    /// [`TicketTrips`](crate::reactor::TicketTrips).
    #[instrument(skip(self, ticket), fields(customer_id = %ticket.customer_id))]
    pub async fn open_ticket(&self, mut ticket: Ticket) -> Result<StoredRecord<Ticket>> {
        let purchase_date = ticket.default_purchase_date(self.clock.today());
        if ticket.ticket_id().is_some() {
            return self.save_ticket(ticket).await;
        }
        ticket.settle_trips(Default::default(), 0);
        let partition = ids::date_partition(purchase_date);
        self.mint_and_persist(ticket, &partition).await
    }

    /// Saves a ticket's own fields.
    ///
    /// The trip set and total are owned by the trip reactor: whatever the
    /// passed value holds, the stored association is kept.
    pub async fn save_ticket(&self, mut ticket: Ticket) -> Result<StoredRecord<Ticket>> {
        let purchase_date = ticket.default_purchase_date(self.clock.today());
        let Some(id) = ticket.ticket_id().map(str::to_owned) else {
            ticket.settle_trips(Default::default(), 0);
            let partition = ids::date_partition(purchase_date);
            return self.mint_and_persist(ticket, &partition).await;
        };
        let repo = self.repository::<Ticket>();

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let result = match repo.find(&id).await? {
                Some(stored) => {
                    ticket.adopt_association(stored.record());
                    repo.update(&id, Some(stored.version()), &ticket).await
                }
                None => {
                    SequenceSpec::TICKET.validate(&ids::date_partition(purchase_date), &id)?;
                    ticket.settle_trips(Default::default(), 0);
                    repo.insert(&id, &ticket).await
                }
            };
            match result {
                Err(Error::Conflict) => continue,
                other => return other,
            }
        }
        Err(Error::Conflict)
    }

    /// Records a maintenance event under a freshly minted id, defaulting the
    /// date to today.
    #[instrument(skip(self, log), fields(train_id = %log.train_id))]
    pub async fn record_maintenance(&self, mut log: MaintenanceLog) -> Result<StoredRecord<MaintenanceLog>> {
        let date = log.default_date(self.clock.today());
        if log.log_id().is_some() {
            return self.save_maintenance_log(log).await;
        }
        let partition = ids::date_partition(date);
        self.mint_and_persist(log, &partition).await
    }

    /// Saves a maintenance log. The identifier never changes.
    pub async fn save_maintenance_log(&self, mut log: MaintenanceLog) -> Result<StoredRecord<MaintenanceLog>> {
        let date = log.default_date(self.clock.today());
        let Some(id) = log.log_id().map(str::to_owned) else {
            let partition = ids::date_partition(date);
            return self.mint_and_persist(log, &partition).await;
        };
        let partition = ids::date_partition(date);
        self.write_in_place(&id, &log, || SequenceSpec::MAINTENANCE_LOG.validate(&partition, &id))
            .await
    }

    /// Saves a trip, recomputing its duration from the current times.
    #[instrument(skip(self, trip), fields(trip_id = %trip.trip_id))]
    pub async fn save_trip(&self, mut trip: Trip) -> Result<StoredRecord<Trip>> {
        trip.refresh_duration();
        let id = trip.trip_id.clone();
        self.write_in_place(&id, &trip, || Ok(())).await
    }

    /// Saves a train.
    pub async fn save_train(&self, train: Train) -> Result<StoredRecord<Train>> {
        let id = train.train_id.clone();
        self.write_in_place(&id, &train, || Ok(())).await
    }

    /// Overwrites the record under `id`, inserting it when missing.
    ///
    /// `check_new` runs before a first insert. Losing an insert race, or a
    /// store-level swap, retries on the fresh state.
    async fn write_in_place<R, F>(&self, id: &str, record: &R, check_new: F) -> Result<StoredRecord<R>>
    where
        R: Record,
        F: Fn() -> Result<()>,
    {
        let repo = self.repository::<R>();
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let result = match repo.update(id, None, record).await {
                Err(Error::NotFound) => {
                    check_new()?;
                    repo.insert(id, record).await
                }
                other => other,
            };
            match result {
                Err(Error::Conflict) => debug!(table = %R::TABLE, id, attempt, "concurrent write, retrying"),
                other => return other,
            }
        }
        Err(Error::Conflict)
    }

    async fn mint_and_persist<R: Minted>(&self, record: R, partition: &str) -> Result<StoredRecord<R>> {
        let repo = self.repository::<R>();
        let stored = ids::mint(&*self.store, R::SEQUENCE, partition, |id| {
            let mut record = record.clone();
            let repo = repo.clone();
            async move {
                record.assign_identifier(id.clone());
                repo.insert(&id, &record).await
            }
        })
        .await?;
        info!(table = %R::TABLE, id = stored.key(), "persisted new record");
        Ok(stored)
    }
}
