//! CloudEvent conversion utilities.
//!
//! This module provides a lightweight [`CloudEvent`] newtype that wraps a
//! [`cloudevents_sdk::Event`] so domain events can be handed to an
//! out-of-band transport.
//!
//! # Example
//!
//! ```rust
//! use tirian::{cloudevent::CloudEvent, notify::BookingEvent};
//!
//! let event = BookingEvent::TicketFinalized {
//!     ticket_id: "202406200001".into(),
//! };
//! let ce = CloudEvent::try_from(event).unwrap();
//! assert_eq!(ce.subject(), Some("202406200001"));
//! ```
//!
//! A random UUID is generated for the CloudEvent `id` field. If you need more
//! control build the underlying event manually via the `into_inner` method.

use crate::{Error, Event, Result};
use cloudevents::event::{AttributesReader, Data, Event as CeEvent, EventBuilder, EventBuilderV10};
use serde::Serialize;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

/// Newtype wrapper around `cloudevents_sdk::Event`.
#[derive(Debug, Clone)]
pub struct CloudEvent(pub CeEvent);

impl CloudEvent {
    /// Returns the inner [`cloudevents_sdk::Event`].
    #[must_use]
    pub fn into_inner(self) -> CeEvent {
        self.0
    }

    /// The CloudEvent `type` attribute.
    pub fn ty(&self) -> &str {
        self.0.ty()
    }

    /// The CloudEvent `subject` attribute, if any.
    pub fn subject(&self) -> Option<&str> {
        self.0.subject()
    }

    /// Builds a [`CloudEvent`] from an `Event`, an explicit [`Url`] source and
    /// an optional subject.
    #[instrument(skip(event))]
    pub fn from_event_with_source<E>(event: E, source: Url, subject: Option<String>) -> Result<Self>
    where
        E: Event + Serialize,
    {
        let id = Uuid::new_v4().to_string();

        let data_json = serde_json::to_vec(&event)
            .map_err(|e| Error::Notify(format!("failed to serialise event: {e}")))?;

        let mut builder = EventBuilderV10::new()
            .id(id)
            .ty(event.event_type())
            .source(source)
            .data("application/json", Data::from(data_json));
        if let Some(subject) = subject {
            builder = builder.subject(subject);
        }

        let ce = builder
            .build()
            .map_err(|e| Error::Notify(format!("failed to build CloudEvent: {e}")))?;

        Ok(Self(ce))
    }
}

/// Parses an event's source URI.
pub(crate) fn source_url<E: Event>(event: &E) -> Result<Url> {
    Url::parse(event.event_source())
        .map_err(|e| Error::Notify(format!("invalid event source {:?}: {e}", event.event_source())))
}
