//! Events handed to the notification layer.
//!
//! Delivery is out of band: a failed publish is logged by the caller and
//! never undoes the ticket it reports on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    CloudEvent, Error, Event, RecordStore, Result,
    cloudevent::source_url,
    hooks::EntityHooks,
    model::{Customer, Ticket},
};

/// Domain events emitted by the booking flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Event)]
#[event(version = 1, source = "urn:tirian:booking")]
pub enum BookingEvent {
    /// A ticket's trips and total cost are final.
    TicketFinalized {
        /// The finalized ticket.
        ticket_id: String,
    },
}

impl BookingEvent {
    /// The ticket this event is about.
    pub fn ticket_id(&self) -> &str {
        match self {
            Self::TicketFinalized { ticket_id } => ticket_id,
        }
    }
}

impl TryFrom<BookingEvent> for CloudEvent {
    type Error = Error;

    fn try_from(event: BookingEvent) -> Result<Self> {
        let source = source_url(&event)?;
        let subject = event.ticket_id().to_owned();
        CloudEvent::from_event_with_source(event, source, Some(subject))
    }
}

/// Receives booking events for out-of-band processing.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hands `event` over. Must not block on delivery.
    async fn publish(&self, event: BookingEvent) -> Result<()>;
}

/// Logs events instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, event: BookingEvent) -> Result<()> {
        info!(event_type = event.event_type(), ticket_id = event.ticket_id(), "booking event");
        Ok(())
    }
}

/// Forwards events as CloudEvents into a channel drained by a notifier
/// task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CloudEvent>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end for the notifier.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CloudEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: BookingEvent) -> Result<()> {
        let ce = CloudEvent::try_from(event)?;
        self.tx
            .send(ce)
            .map_err(|_| Error::Notify("notifier is gone".into()))
    }
}

/// The confirmation message sent to a customer for a finalized ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationNotice {
    /// Mail subject.
    pub subject: String,
    /// Mail body.
    pub body: String,
}

impl ConfirmationNotice {
    /// Renders the notice for `ticket` bought by `customer`.
    pub fn for_ticket(ticket_id: &str, ticket: &Ticket, customer: &Customer) -> Self {
        Self {
            subject: format!("Tirian Trains: Ticket Confirmation #{ticket_id}"),
            body: format!(
                "Hello {},\n\nYour ticket for {} has been confirmed. Total cost: {} Lion Coins.\n\nSafe travels!",
                customer.given_name,
                ticket.trip_date,
                ticket.total_cost()
            ),
        }
    }

    /// Loads the ticket and its owner and renders their notice.
    pub async fn load<S>(hooks: &EntityHooks<S>, ticket_id: &str) -> Result<Self>
    where
        S: RecordStore + ?Sized,
    {
        let ticket = hooks.repository::<Ticket>().load(ticket_id).await?;
        let customer = hooks
            .repository::<Customer>()
            .load(&ticket.record().customer_id)
            .await?;
        Ok(Self::for_ticket(ticket.key(), ticket.record(), customer.record()))
    }
}
