//! Demo network: the Narnia lines, their trains and three days of trips.
//!
//! Seeding is idempotent. Trains and trips that already exist are kept as
//! they are.

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    RecordStore, Result,
    hooks::EntityHooks,
    model::{Train, Trip, TripType},
};

/// Stations of the local line, in line order.
pub const LOCAL_STATIONS: [&str; 6] = [
    "Lantern Waste",
    "Beaversdam",
    "Beruna",
    "Dancing Lawn",
    "Aslan's How",
    "Cair Paravel (Local)",
];

/// Stations of the inter-town line, in line order.
pub const INTER_TOWN_STATIONS: [&str; 5] = [
    "Cair Paravel (Inter)",
    "Anvard",
    "Tashbaan",
    "Azim Balda",
    "Mezreel",
];

const SEEDED_DAYS: usize = 3;
const TRIPS_PER_ROUTE: usize = 2;

/// How trips of one service are laid out.
struct Service {
    trip_type: TripType,
    stations: &'static [&'static str],
    first_hour: u32,
    last_hour: u32,
    minutes: &'static [u32],
    length: TimeDelta,
    costs: &'static [i64],
}

const LOCAL: Service = Service {
    trip_type: TripType::Local,
    stations: &LOCAL_STATIONS,
    first_hour: 6,
    last_hour: 20,
    minutes: &[0, 15, 30, 45],
    length: TimeDelta::minutes(45),
    costs: &[15, 20, 25],
};

const INTER_TOWN: Service = Service {
    trip_type: TripType::InterTown,
    stations: &INTER_TOWN_STATIONS,
    first_hour: 5,
    last_hour: 21,
    minutes: &[0, 30],
    length: TimeDelta::hours(2),
    costs: &[50, 75, 100],
};

/// What a seeding run wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    /// Trains written.
    pub trains: usize,
    /// Trips written.
    pub trips: usize,
}

fn fleet(series: char, prefix: u32, model: &str) -> Vec<Train> {
    (1..=3)
        .map(|i| Train::new(format!("{prefix}0000{i}"), format!("{series}{prefix}00{i}")).with_model(model))
        .collect()
}

/// Both directions between consecutive stations.
fn routes(stations: &[&'static str]) -> Vec<(&'static str, &'static str)> {
    stations
        .windows(2)
        .flat_map(|pair| [(pair[0], pair[1]), (pair[1], pair[0])])
        .collect()
}

fn pick<'a, T, R: Rng>(rng: &mut R, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

/// Seeds the demo network starting on `today`.
///
/// Trip ids are `YYYYMMDD`, the trip type code, and a three-digit counter
/// running across the whole run.
#[instrument(skip(hooks, rng))]
pub async fn seed_network<S, R>(hooks: &EntityHooks<S>, today: NaiveDate, rng: &mut R) -> Result<SeedSummary>
where
    S: RecordStore + ?Sized,
    R: Rng,
{
    let mut summary = SeedSummary::default();
    let s_series = fleet('S', 1, "S-001");
    let a_series = fleet('A', 2, "A-001");

    let trains = hooks.repository::<Train>();
    for train in s_series.iter().chain(&a_series) {
        if trains.find(&train.train_id).await?.is_none() {
            hooks.save_train(train.clone()).await?;
            summary.trains += 1;
        }
    }

    let trips = hooks.repository::<Trip>();
    let mut counter = 1;
    for day in today.iter_days().take(SEEDED_DAYS) {
        for (service, fleet) in [(&LOCAL, &s_series), (&INTER_TOWN, &a_series)] {
            for (origin, destination) in routes(service.stations) {
                for _ in 0..TRIPS_PER_ROUTE {
                    let trip_id = format!("{}{}{counter:03}", day.format("%Y%m%d"), service.trip_type.code());
                    counter += 1;

                    let hour = rng.gen_range(service.first_hour..=service.last_hour);
                    let minute = *pick(rng, service.minutes);
                    let cost = *pick(rng, service.costs);
                    let train = pick(rng, fleet.as_slice());
                    if trips.find(&trip_id).await?.is_some() {
                        continue;
                    }

                    let Some(departure) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let (arrival, _) = departure.overflowing_add_signed(service.length);
                    let trip = Trip::new(trip_id, day, cost, service.trip_type)
                        .with_times(departure, arrival)
                        .with_train(train.train_id.clone())
                        .with_route(origin, destination);
                    hooks.save_trip(trip).await?;
                    summary.trips += 1;
                }
            }
        }
    }

    info!(trains = summary.trains, trips = summary.trips, "seeded demo network");
    Ok(summary)
}
