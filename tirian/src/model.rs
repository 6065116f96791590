//! The entities persisted by the ticketing core.
//!
//! Primary identifiers and derived values (`Trip::duration`,
//! `Ticket::total_cost`) are private: identifiers are assigned by the
//! persistence hooks, derived values only by the calculator path.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{Record, Table, derived};

/// A registered customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    customer_id: Option<String>,
    /// Family name.
    pub last_name: String,
    /// Given name.
    pub given_name: String,
    /// Letter followed by a period, e.g. `X.`.
    pub middle_initial: Option<String>,
    /// Date of birth; its year picks the identifier partition.
    pub birth_date: NaiveDate,
    /// Free-form gender, if given.
    pub gender: Option<String>,
}

impl Customer {
    /// A customer without an identifier yet.
    pub fn new(last_name: impl Into<String>, given_name: impl Into<String>, birth_date: NaiveDate) -> Self {
        Self {
            customer_id: None,
            last_name: last_name.into(),
            given_name: given_name.into(),
            middle_initial: None,
            birth_date,
            gender: None,
        }
    }

    /// Pre-assigns an identifier, e.g. when importing existing customers.
    ///
    /// The hooks validate it against the birth year before the first write.
    pub fn with_id(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Sets the middle initial.
    pub fn with_middle_initial(mut self, initial: impl Into<String>) -> Self {
        self.middle_initial = Some(initial.into());
        self
    }

    /// Sets the gender.
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    /// The `YYNN` identifier, once assigned.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.customer_id.get_or_insert(id);
    }
}

impl Record for Customer {
    const TABLE: Table = Table::Customer;

    fn record_key(&self) -> Option<&str> {
        self.customer_id()
    }
}

/// Whether a trip stays within one town or connects two.
///
/// Older records stored this as a one-letter code, with both `I` and `T`
/// used for inter-town; all of them read back as the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    /// Local service.
    #[serde(alias = "L")]
    Local,
    /// Inter-town service.
    #[serde(alias = "I", alias = "T")]
    InterTown,
}

impl TripType {
    /// The one-letter code used in trip ids.
    pub fn code(&self) -> char {
        match self {
            Self::Local => 'L',
            Self::InterTown => 'I',
        }
    }
}

/// The time a trip takes, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripDuration(i64);

impl TripDuration {
    /// A duration of `seconds`.
    pub fn from_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Whole seconds.
    pub fn as_seconds(&self) -> i64 {
        self.0
    }

    /// The duration as a chrono `TimeDelta`.
    pub fn as_time_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.0)
    }
}

impl std::fmt::Display for TripDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        write!(f, "{hours}h{minutes:02}m")
    }
}

/// Origin and destination station names of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Departure station.
    pub origin: String,
    /// Arrival station.
    pub destination: String,
}

/// A scheduled trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    /// Externally assigned id, e.g. `20240620L001`.
    pub trip_id: String,
    /// Departure time of day.
    pub departure_time: Option<NaiveTime>,
    /// Arrival time of day. Earlier than departure means the trip crosses
    /// midnight.
    pub arrival_time: Option<NaiveTime>,
    /// The day the trip runs.
    pub schedule_day: NaiveDate,
    /// Fare in Lion Coins.
    #[serde(default)]
    pub trip_cost: i64,
    /// Local or inter-town.
    pub trip_type: TripType,
    /// The train running the trip.
    #[serde(default)]
    pub train_id: Option<String>,
    /// Stations served.
    #[serde(default)]
    pub route: Option<Route>,
    /// Set once the trip has arrived.
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    duration: Option<TripDuration>,
}

impl Trip {
    /// A trip without times yet.
    pub fn new(trip_id: impl Into<String>, schedule_day: NaiveDate, trip_cost: i64, trip_type: TripType) -> Self {
        Self {
            trip_id: trip_id.into(),
            departure_time: None,
            arrival_time: None,
            schedule_day,
            trip_cost,
            trip_type,
            train_id: None,
            route: None,
            is_archived: false,
            duration: None,
        }
    }

    /// Sets departure and arrival times.
    pub fn with_times(mut self, departure: NaiveTime, arrival: NaiveTime) -> Self {
        self.departure_time = Some(departure);
        self.arrival_time = Some(arrival);
        self
    }

    /// Sets the train.
    pub fn with_train(mut self, train_id: impl Into<String>) -> Self {
        self.train_id = Some(train_id.into());
        self
    }

    /// Sets the route.
    pub fn with_route(mut self, origin: impl Into<String>, destination: impl Into<String>) -> Self {
        self.route = Some(Route {
            origin: origin.into(),
            destination: destination.into(),
        });
        self
    }

    /// The travel time as of the last write; `None` while either time is
    /// missing.
    pub fn duration(&self) -> Option<TripDuration> {
        self.duration
    }

    pub(crate) fn refresh_duration(&mut self) {
        self.duration = derived::compute_trip_duration(self.departure_time, self.arrival_time);
    }
}

impl Record for Trip {
    const TABLE: Table = Table::Trip;

    fn record_key(&self) -> Option<&str> {
        Some(&self.trip_id)
    }
}

/// A purchased ticket covering one or more trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    ticket_id: Option<String>,
    /// The purchasing customer.
    pub customer_id: String,
    purchase_date: Option<NaiveDate>,
    /// The date the trips are taken.
    pub trip_date: NaiveDate,
    #[serde(default)]
    trip_ids: BTreeSet<String>,
    #[serde(default)]
    total_cost: i64,
}

impl Ticket {
    /// An empty ticket shell for `customer_id`.
    pub fn new(customer_id: impl Into<String>, trip_date: NaiveDate) -> Self {
        Self {
            ticket_id: None,
            customer_id: customer_id.into(),
            purchase_date: None,
            trip_date,
            trip_ids: BTreeSet::new(),
            total_cost: 0,
        }
    }

    /// Sets the purchase date; otherwise it defaults to today when persisted.
    pub fn with_purchase_date(mut self, purchase_date: NaiveDate) -> Self {
        self.purchase_date = Some(purchase_date);
        self
    }

    /// Pre-assigns an identifier.
    pub fn with_id(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    /// The `YYYYMMDDNNNN` identifier, once assigned.
    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket_id.as_deref()
    }

    /// The purchase date, once set or defaulted.
    pub fn purchase_date(&self) -> Option<NaiveDate> {
        self.purchase_date
    }

    /// Changes the purchase date. The identifier is unaffected.
    pub fn set_purchase_date(&mut self, purchase_date: NaiveDate) {
        self.purchase_date = Some(purchase_date);
    }

    /// The ids of the trips on this ticket.
    pub fn trip_ids(&self) -> &BTreeSet<String> {
        &self.trip_ids
    }

    /// Sum of the current trips' costs.
    pub fn total_cost(&self) -> i64 {
        self.total_cost
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.ticket_id.get_or_insert(id);
    }

    pub(crate) fn default_purchase_date(&mut self, today: NaiveDate) -> NaiveDate {
        *self.purchase_date.get_or_insert(today)
    }

    /// Replaces the trip set together with its total.
    pub(crate) fn settle_trips(&mut self, trip_ids: BTreeSet<String>, total_cost: i64) {
        self.trip_ids = trip_ids;
        self.total_cost = total_cost;
    }

    /// Takes the association and total from the stored copy, so a re-save
    /// of a stale value cannot roll them back.
    pub(crate) fn adopt_association(&mut self, stored: &Ticket) {
        self.trip_ids = stored.trip_ids.clone();
        self.total_cost = stored.total_cost;
    }
}

impl Record for Ticket {
    const TABLE: Table = Table::Ticket;

    fn record_key(&self) -> Option<&str> {
        self.ticket_id()
    }
}

/// A maintenance event recorded against a train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceLog {
    log_id: Option<String>,
    date: Option<NaiveDate>,
    /// The serviced train.
    pub train_id: String,
    /// Condition after the maintenance, e.g. `Good`.
    pub condition: String,
    /// What was done.
    pub tasks: Option<String>,
}

impl MaintenanceLog {
    /// A log entry without identifier; the date defaults to today.
    pub fn new(train_id: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            log_id: None,
            date: None,
            train_id: train_id.into(),
            condition: condition.into(),
            tasks: None,
        }
    }

    /// Sets the maintenance date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Describes the work done.
    pub fn with_tasks(mut self, tasks: impl Into<String>) -> Self {
        self.tasks = Some(tasks.into());
        self
    }

    /// The `YYYYMMDDNNNN` identifier, once assigned.
    pub fn log_id(&self) -> Option<&str> {
        self.log_id.as_deref()
    }

    /// The maintenance date, once set or defaulted.
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// Changes the maintenance date. The identifier is unaffected.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = Some(date);
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.log_id.get_or_insert(id);
    }

    pub(crate) fn default_date(&mut self, today: NaiveDate) -> NaiveDate {
        *self.date.get_or_insert(today)
    }
}

impl Record for MaintenanceLog {
    const TABLE: Table = Table::MaintenanceLog;

    fn record_key(&self) -> Option<&str> {
        self.log_id()
    }
}

/// A train in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Train {
    /// Fleet id, e.g. `100001`.
    pub train_id: String,
    /// Public number, e.g. `S1001`.
    pub train_number: String,
    /// Rolling-stock model, e.g. `S-001`.
    pub model_name: Option<String>,
}

impl Train {
    /// A train of unspecified model.
    pub fn new(train_id: impl Into<String>, train_number: impl Into<String>) -> Self {
        Self {
            train_id: train_id.into(),
            train_number: train_number.into(),
            model_name: None,
        }
    }

    /// Sets the model name.
    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }
}

impl Record for Train {
    const TABLE: Table = Table::Train;

    fn record_key(&self) -> Option<&str> {
        Some(&self.train_id)
    }
}
