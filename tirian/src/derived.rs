//! Pure calculations for derived fields. No I/O.

use chrono::{NaiveTime, TimeDelta};

use crate::model::TripDuration;

/// Travel time from `departure` to `arrival`, both times of day.
///
/// An arrival earlier than the departure is on the next day, so 24 hours are
/// added. The result is always in `[0, 24h)`.
pub fn compute_duration(departure: NaiveTime, arrival: NaiveTime) -> TripDuration {
    let delta = arrival.signed_duration_since(departure);
    let delta = if arrival < departure {
        delta + TimeDelta::days(1)
    } else {
        delta
    };
    TripDuration::from_seconds(delta.num_seconds())
}

/// Like [`compute_duration`], but `None` until both times are known.
pub fn compute_trip_duration(
    departure: Option<NaiveTime>,
    arrival: Option<NaiveTime>,
) -> Option<TripDuration> {
    Some(compute_duration(departure?, arrival?))
}

/// Sum of trip costs; an empty set costs nothing.
pub fn compute_total_cost<I>(trip_costs: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    trip_costs.into_iter().sum()
}
