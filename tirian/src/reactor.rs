//! Changes to a ticket's trip set.
//!
//! Every change is one logical operation ending in exactly one settle
//! point: the new trip set and the total recomputed from it are written to
//! the ticket together, in a single versioned update. The total is always
//! recomputed from the full current set, never patched by a delta.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use crate::{
    Error, RecordStore, Result, StoredRecord,
    derived::compute_total_cost,
    hooks::{EntityHooks, MAX_WRITE_ATTEMPTS},
    model::{Ticket, Trip},
    repository::Repository,
};

/// One logical change to a ticket's trip set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripChange {
    /// Replace the whole set.
    Set(BTreeSet<String>),
    /// Add trips; ones already present are ignored.
    Add(BTreeSet<String>),
    /// Remove trips; ones not present are ignored.
    Remove(BTreeSet<String>),
    /// Remove every trip.
    Clear,
}

impl TripChange {
    fn apply(&self, trips: &mut BTreeSet<String>) {
        match self {
            Self::Set(new) => trips.clone_from(new),
            Self::Add(added) => trips.extend(added.iter().cloned()),
            Self::Remove(removed) => trips.retain(|id| !removed.contains(id)),
            Self::Clear => trips.clear(),
        }
    }

    fn touched(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Set(ids) | Self::Add(ids) => Some(ids),
            Self::Remove(_) | Self::Clear => None,
        }
    }
}

fn collect_ids<I>(trips: I) -> BTreeSet<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    trips.into_iter().map(Into::into).collect()
}

/// Mutates ticket trip sets and keeps `total_cost` in step.
pub struct TicketTrips<S: RecordStore + ?Sized> {
    tickets: Repository<Ticket, S>,
    trips: Repository<Trip, S>,
}

impl<S: RecordStore + ?Sized> Clone for TicketTrips<S> {
    fn clone(&self) -> Self {
        Self {
            tickets: self.tickets.clone(),
            trips: self.trips.clone(),
        }
    }
}

impl<S: RecordStore + ?Sized> TicketTrips<S> {
    /// Creates the reactor over the store behind `hooks`.
    pub fn new(hooks: &EntityHooks<S>) -> Self {
        Self {
            tickets: hooks.repository(),
            trips: hooks.repository(),
        }
    }

    /// Replaces the ticket's trips and persists the recomputed total.
    pub async fn set_trips_and_recompute<I>(&self, ticket_id: &str, trips: I) -> Result<StoredRecord<Ticket>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.settle(ticket_id, TripChange::Set(collect_ids(trips))).await
    }

    /// Adds trips to the ticket.
    pub async fn add_trips<I>(&self, ticket_id: &str, trips: I) -> Result<StoredRecord<Ticket>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.settle(ticket_id, TripChange::Add(collect_ids(trips))).await
    }

    /// Removes trips from the ticket.
    pub async fn remove_trips<I>(&self, ticket_id: &str, trips: I) -> Result<StoredRecord<Ticket>>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.settle(ticket_id, TripChange::Remove(collect_ids(trips))).await
    }

    /// Removes every trip; the total drops to 0.
    pub async fn clear_trips(&self, ticket_id: &str) -> Result<StoredRecord<Ticket>> {
        self.settle(ticket_id, TripChange::Clear).await
    }

    /// Applies `change` and writes the trip set with its recomputed total.
    ///
    /// A concurrent change to the same ticket is detected by version and the
    /// change is reapplied on the fresh state. Unknown trips reject the
    /// change before anything is written. A failed write is reported as
    /// [`Error::AssociationInconsistency`].
    #[instrument(skip(self))]
    pub async fn settle(&self, ticket_id: &str, change: TripChange) -> Result<StoredRecord<Ticket>> {
        if let Some(ids) = change.touched() {
            self.trip_costs(ids).await?;
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let stored = self.tickets.load(ticket_id).await?;
            let version = stored.version();
            let mut ticket = stored.into_record();

            let mut trip_ids = ticket.trip_ids().clone();
            change.apply(&mut trip_ids);
            let total = compute_total_cost(self.trip_costs(&trip_ids).await?);
            ticket.settle_trips(trip_ids, total);

            match self.tickets.update(ticket_id, Some(version), &ticket).await {
                Ok(settled) => {
                    info!(
                        trips = settled.record().trip_ids().len(),
                        total_cost = total,
                        "ticket trips settled"
                    );
                    return Ok(settled);
                }
                Err(Error::Conflict) => {
                    debug!(attempt, "ticket changed concurrently, reapplying");
                }
                Err(e) => {
                    return Err(Error::AssociationInconsistency {
                        ticket_id: ticket_id.to_owned(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Err(Error::AssociationInconsistency {
            ticket_id: ticket_id.to_owned(),
            source: Box::new(Error::Conflict),
        })
    }

    async fn trip_costs(&self, ids: &BTreeSet<String>) -> Result<Vec<i64>> {
        let mut costs = Vec::with_capacity(ids.len());
        for id in ids {
            let trip = self
                .trips
                .find(id)
                .await?
                .ok_or_else(|| Error::Validation(format!("unknown trip {id}")))?;
            costs.push(trip.record().trip_cost);
        }
        Ok(costs)
    }
}
