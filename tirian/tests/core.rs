//! Integration tests for the ticketing core: identifiers, derived values and
//! the booking flow, end to end over the in-memory store.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use pretty_assertions::assert_eq;
use rstest::rstest;

use tirian::{
    Error,
    booking::{BookingRequest, BookingService},
    clock::FixedClock,
    hooks::EntityHooks,
    model::{Customer, MaintenanceLog, Ticket, Trip, TripType},
    notify::{ConfirmationNotice, TracingSink},
    reactor::TicketTrips,
    store::in_memory::InMemoryRecordStore,
};

type Hooks = EntityHooks<InMemoryRecordStore>;

fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 20).expect("valid date")
}

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

fn now() -> NaiveDateTime {
    test_date().and_time(at(10, 0))
}

/// A customer `0000` and two trips: a standard 14:00-16:30 trip costing 150
/// and an overnight 23:00-01:00 trip costing 200.
async fn setup() -> Hooks {
    let hooks = EntityHooks::new(Arc::new(InMemoryRecordStore::default()), Arc::new(FixedClock(now())));

    let birth = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date");
    hooks
        .register_customer(Customer::new("Dela Cruz", "Juan", birth).with_id("0000"))
        .await
        .expect("customer");

    hooks
        .save_trip(Trip::new("20240620L001", test_date(), 150, TripType::Local).with_times(at(14, 0), at(16, 30)))
        .await
        .expect("standard trip");
    hooks
        .save_trip(Trip::new("20240620L002", test_date(), 200, TripType::Local).with_times(at(23, 0), at(1, 0)))
        .await
        .expect("overnight trip");
    hooks
}

#[rstest]
#[case::standard("20240620L001", 2 * 3600 + 30 * 60)]
#[case::overnight("20240620L002", 2 * 3600)]
#[tokio::test]
async fn trip_duration_calculation(#[case] trip_id: &str, #[case] seconds: i64) {
    let hooks = setup().await;
    let trip = hooks.repository::<Trip>().load(trip_id).await.expect("trip");
    assert_eq!(trip.record().duration().map(|d| d.as_seconds()), Some(seconds));
}

#[tokio::test]
async fn duration_follows_time_edits() {
    let hooks = setup().await;
    let trips = hooks.repository::<Trip>();

    let mut trip = trips.load("20240620L001").await.expect("trip").into_record();
    trip.arrival_time = Some(at(18, 0));
    let saved = hooks.save_trip(trip).await.expect("save");
    assert_eq!(saved.record().duration().map(|d| d.to_string()), Some("4h00m".to_owned()));

    let mut trip = saved.into_record();
    trip.departure_time = None;
    let saved = hooks.save_trip(trip).await.expect("save");
    assert_eq!(saved.record().duration(), None);
}

#[tokio::test]
async fn ticket_total_cost_calculation() {
    let hooks = setup().await;
    let ticket = hooks
        .open_ticket(Ticket::new("0000", test_date()).with_purchase_date(test_date()))
        .await
        .expect("ticket");
    let reactor = TicketTrips::new(&hooks);

    reactor
        .add_trips(ticket.key(), ["20240620L001", "20240620L002"])
        .await
        .expect("add");
    let fresh = hooks.repository::<Ticket>().load(ticket.key()).await.expect("reload");
    assert_eq!(fresh.record().total_cost(), 350);

    reactor.remove_trips(ticket.key(), ["20240620L002"]).await.expect("remove");
    let fresh = hooks.repository::<Ticket>().load(ticket.key()).await.expect("reload");
    assert_eq!(fresh.record().total_cost(), 150);
}

#[test_log::test(tokio::test)]
async fn ticket_sales_flow() {
    let hooks = setup().await;
    let booking = BookingService::new(hooks, Arc::new(TracingSink));

    booking
        .purchase(BookingRequest::new("0000", test_date(), ["20240620L001"]))
        .await
        .expect("purchase");

    let tickets = booking.tickets_for_customer("0000").await.expect("tickets");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].key(), "202406200001");
    assert_eq!(tickets[0].record().total_cost(), 150);
}

#[tokio::test]
async fn first_identifiers_per_partition() {
    let hooks = setup().await;

    let customer = hooks
        .register_customer(Customer::new("Pevensie", "Lucy", NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")))
        .await
        .expect("customer");
    assert_eq!(customer.key(), "2400");
    assert_eq!(customer.record().customer_id(), Some("2400"));

    let ticket = hooks.open_ticket(Ticket::new("2400", test_date())).await.expect("ticket");
    assert_eq!(ticket.key(), "202406200001");

    let log = hooks
        .record_maintenance(MaintenanceLog::new("100001", "Good"))
        .await
        .expect("log");
    assert_eq!(log.key(), "202406200001");
}

#[tokio::test]
async fn dates_default_to_today() {
    let hooks = setup().await;

    let ticket = hooks.open_ticket(Ticket::new("0000", test_date())).await.expect("ticket");
    assert_eq!(ticket.record().purchase_date(), Some(test_date()));

    let log = hooks
        .record_maintenance(MaintenanceLog::new("100001", "Good"))
        .await
        .expect("log");
    assert_eq!(log.record().date(), Some(test_date()));

    let earlier = NaiveDate::from_ymd_opt(2024, 1, 2).expect("date");
    let ticket = hooks
        .open_ticket(Ticket::new("0000", test_date()).with_purchase_date(earlier))
        .await
        .expect("ticket");
    assert_eq!(ticket.key(), "202401020001");
}

#[tokio::test]
async fn identifiers_survive_edits() {
    let hooks = setup().await;

    let mut customer = hooks.repository::<Customer>().load("0000").await.expect("customer").into_record();
    customer.birth_date = NaiveDate::from_ymd_opt(1999, 5, 5).expect("date");
    let saved = hooks.save_customer(customer).await.expect("save");
    assert_eq!(saved.key(), "0000");
    assert_eq!(saved.record().customer_id(), Some("0000"));

    let mut log = hooks
        .record_maintenance(MaintenanceLog::new("100001", "Fair"))
        .await
        .expect("log")
        .into_record();
    log.set_date(NaiveDate::from_ymd_opt(2024, 7, 1).expect("date"));
    let saved = hooks.save_maintenance_log(log).await.expect("save");
    assert_eq!(saved.key(), "202406200001");
}

#[tokio::test]
async fn resaving_a_ticket_keeps_its_trips_and_total() {
    let hooks = setup().await;
    let booking = BookingService::new(hooks.clone(), Arc::new(TracingSink));
    let booked = booking
        .purchase(BookingRequest::new("0000", test_date(), ["20240620L001", "20240620L002"]))
        .await
        .expect("purchase");

    let mut ticket = booked.into_record();
    ticket.set_purchase_date(NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"));
    let saved = hooks.save_ticket(ticket).await.expect("save");
    assert_eq!(saved.key(), "202406200001");
    assert_eq!(saved.record().total_cost(), 350);

    // A bare value carrying only the id cannot wipe the association.
    let bare = Ticket::new("0000", test_date()).with_id("202406200001");
    let saved = hooks.save_ticket(bare).await.expect("save");
    assert_eq!(saved.record().trip_ids().len(), 2);
    assert_eq!(saved.record().total_cost(), 350);
}

/// Rewrites derived fields the way a client-supplied payload could.
fn forge<T: serde::Serialize + serde::de::DeserializeOwned>(value: &T, fields: serde_json::Value) -> T {
    let mut json = serde_json::to_value(value).expect("serialize");
    if let (Some(target), Some(fields)) = (json.as_object_mut(), fields.as_object()) {
        target.extend(fields.clone());
    }
    serde_json::from_value(json).expect("deserialize")
}

#[tokio::test]
async fn derived_fields_only_come_from_the_calculator() {
    let hooks = setup().await;
    let booking = BookingService::new(hooks.clone(), Arc::new(TracingSink));
    let booked = booking
        .purchase(BookingRequest::new("0000", test_date(), ["20240620L001"]))
        .await
        .expect("purchase");

    let fake = serde_json::json!({ "total_cost": 999_999, "trip_ids": ["20240620L001", "20240620L002"] });
    let saved = hooks.save_ticket(forge(booked.record(), fake.clone())).await.expect("save");
    assert_eq!(saved.record().total_cost(), 150);
    assert_eq!(saved.record().trip_ids().len(), 1);

    let fresh = forge(&Ticket::new("0000", test_date()), fake);
    let opened = hooks.open_ticket(fresh).await.expect("open");
    assert_eq!(opened.record().total_cost(), 0);
    assert!(opened.record().trip_ids().is_empty());

    let trip = hooks.repository::<Trip>().load("20240620L001").await.expect("trip");
    let forged = forge(trip.record(), serde_json::json!({ "duration": 999_999 }));
    let saved = hooks.save_trip(forged).await.expect("save");
    assert_eq!(saved.record().duration().map(|d| d.as_seconds()), Some(2 * 3600 + 30 * 60));

    let stored = hooks.repository::<Ticket>().load(booked.key()).await.expect("reload");
    assert_eq!(stored.record().total_cost(), 150);
}

#[tokio::test]
async fn explicit_identifier_must_match_its_partition() {
    let hooks = setup().await;
    let birth = NaiveDate::from_ymd_opt(1987, 8, 9).expect("date");

    let err = hooks
        .register_customer(Customer::new("Tumnus", "Mr", birth).with_id("8800"))
        .await
        .expect_err("wrong year");
    assert!(matches!(err, Error::Validation(_)));

    let saved = hooks
        .register_customer(Customer::new("Tumnus", "Mr", birth).with_id("8742"))
        .await
        .expect("matching year");
    assert_eq!(saved.key(), "8742");

    let next = hooks
        .register_customer(Customer::new("Tumnus", "Mrs", birth))
        .await
        .expect("minted");
    assert_eq!(next.key(), "8743");
}

#[tokio::test]
async fn confirmation_for_booked_ticket() {
    let hooks = setup().await;
    let booking = BookingService::new(hooks.clone(), Arc::new(TracingSink));
    let ticket = booking
        .purchase(BookingRequest::new("0000", test_date(), ["20240620L002"]))
        .await
        .expect("purchase");

    let notice = ConfirmationNotice::load(&hooks, ticket.key()).await.expect("notice");
    assert_eq!(notice.subject, "Tirian Trains: Ticket Confirmation #202406200001");
    assert_eq!(
        notice.body,
        "Hello Juan,\n\nYour ticket for 2024-06-20 has been confirmed. Total cost: 200 Lion Coins.\n\nSafe travels!"
    );
}

#[test]
fn store_failures_have_a_generic_message() {
    let err = Error::AssociationInconsistency {
        ticket_id: "202406200001".into(),
        source: Box::new(Error::Store("connection reset".into())),
    };
    assert!(err.is_retryable());
    assert!(!err.public_message().contains("connection"));

    let full = Error::CapacityExceeded {
        namespace: tirian::Table::Ticket,
        partition: "20240620".into(),
    };
    assert!(!full.is_retryable());
}
