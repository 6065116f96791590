//! The purchase flow.
//!
//! A booking opens a ticket shell under a freshly minted id, attaches the
//! selected trips in one settle, and then announces the finalized ticket.
//! A shell whose settle fails is removed again.

use std::{collections::BTreeSet, sync::Arc};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    Error, RecordStore, Result, StoredRecord,
    hooks::EntityHooks,
    model::{Customer, Ticket, Trip},
    notify::{BookingEvent, EventSink},
    reactor::TicketTrips,
};

/// A validated booking request from an authenticated customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// The purchasing customer.
    pub customer_id: String,
    /// Defaults to today.
    pub purchase_date: Option<NaiveDate>,
    /// The day of travel.
    pub trip_date: NaiveDate,
    /// The selected trips. Must not be empty.
    pub trip_ids: BTreeSet<String>,
}

impl BookingRequest {
    /// A request for `trips` on `trip_date`.
    pub fn new<I>(customer_id: impl Into<String>, trip_date: NaiveDate, trips: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            customer_id: customer_id.into(),
            purchase_date: None,
            trip_date,
            trip_ids: trips.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets an explicit purchase date.
    pub fn with_purchase_date(mut self, purchase_date: NaiveDate) -> Self {
        self.purchase_date = Some(purchase_date);
        self
    }
}

/// Books tickets for customers.
pub struct BookingService<S: RecordStore + ?Sized> {
    hooks: EntityHooks<S>,
    trips: TicketTrips<S>,
    sink: Arc<dyn EventSink>,
}

impl<S: RecordStore + ?Sized> Clone for BookingService<S> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
            trips: self.trips.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S: RecordStore + ?Sized> BookingService<S> {
    /// Creates the service; finalized tickets are announced to `sink`.
    pub fn new(hooks: EntityHooks<S>, sink: Arc<dyn EventSink>) -> Self {
        let trips = TicketTrips::new(&hooks);
        Self { hooks, trips, sink }
    }

    /// The hooks the service writes through.
    pub fn hooks(&self) -> &EntityHooks<S> {
        &self.hooks
    }

    /// Books the requested trips on one new ticket.
    ///
    /// The customer and every trip must exist before anything is written.
    /// If the trips cannot be attached the ticket is removed and the error
    /// returned. A failed announcement is logged and does not undo the
    /// ticket.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, trips = request.trip_ids.len()))]
    pub async fn purchase(&self, request: BookingRequest) -> Result<StoredRecord<Ticket>> {
        let BookingRequest {
            customer_id,
            purchase_date,
            trip_date,
            trip_ids,
        } = request;

        if trip_ids.is_empty() {
            return Err(Error::Validation("a ticket needs at least one trip".into()));
        }
        if self.hooks.repository::<Customer>().find(&customer_id).await?.is_none() {
            return Err(Error::Validation(format!("unknown customer {customer_id}")));
        }
        let trips = self.hooks.repository::<Trip>();
        for id in &trip_ids {
            if trips.find(id).await?.is_none() {
                return Err(Error::Validation(format!("unknown trip {id}")));
            }
        }

        let mut shell = Ticket::new(customer_id, trip_date);
        if let Some(date) = purchase_date {
            shell.set_purchase_date(date);
        }
        let opened = self.hooks.open_ticket(shell).await?;
        let ticket = match self.trips.set_trips_and_recompute(opened.key(), trip_ids).await {
            Ok(ticket) => ticket,
            Err(e) => {
                if let Err(cleanup) = self.hooks.repository::<Ticket>().remove(opened.key()).await {
                    warn!(ticket_id = opened.key(), error = %cleanup, "failed to remove unsettled ticket");
                }
                return Err(e);
            }
        };

        let event = BookingEvent::TicketFinalized {
            ticket_id: ticket.key().to_owned(),
        };
        if let Err(e) = self.sink.publish(event).await {
            warn!(ticket_id = ticket.key(), error = %e, "failed to announce finalized ticket");
        }
        info!(ticket_id = ticket.key(), total_cost = ticket.record().total_cost(), "ticket booked");
        Ok(ticket)
    }

    /// The customer's tickets, most recent purchase first.
    pub async fn tickets_for_customer(&self, customer_id: &str) -> Result<Vec<StoredRecord<Ticket>>> {
        let mut tickets: Vec<_> = self
            .hooks
            .repository::<Ticket>()
            .list()
            .await?
            .into_iter()
            .filter(|t| t.record().customer_id == customer_id)
            .collect();
        tickets.sort_by(|a, b| {
            b.record()
                .purchase_date()
                .cmp(&a.record().purchase_date())
                .then_with(|| b.key().cmp(a.key()))
        });
        Ok(tickets)
    }
}
