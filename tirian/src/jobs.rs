//! Periodic housekeeping jobs.

use std::collections::HashMap;

use chrono::{Days, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    RecordStore, Result,
    hooks::EntityHooks,
    model::{MaintenanceLog, Train, Trip},
};

/// When `trip` arrives, if it has an arrival time. An arrival earlier than
/// the departure lands on the following day.
pub fn arrives_at(trip: &Trip) -> Option<NaiveDateTime> {
    let arrival = trip.arrival_time?;
    let overnight = trip.departure_time.is_some_and(|departure| arrival < departure);
    let day = if overnight {
        trip.schedule_day.checked_add_days(Days::new(1))?
    } else {
        trip.schedule_day
    };
    Some(day.and_time(arrival))
}

/// Whether `trip` has arrived by `now`.
///
/// A trip with an arrival time has arrived once that instant is in the
/// past. One without has arrived once its day is over.
pub fn has_arrived(trip: &Trip, now: NaiveDateTime) -> bool {
    match arrives_at(trip) {
        Some(arrival) => arrival < now,
        None => trip.schedule_day < now.date(),
    }
}

/// Archives every trip that has arrived by `now` and returns how many were
/// archived. Already archived trips are left alone.
#[instrument(skip(hooks))]
pub async fn archive_past_trips<S>(hooks: &EntityHooks<S>, now: NaiveDateTime) -> Result<usize>
where
    S: RecordStore + ?Sized,
{
    let mut archived = 0;
    for stored in hooks.repository::<Trip>().list().await? {
        let mut trip = stored.into_record();
        if trip.is_archived || !has_arrived(&trip, now) {
            continue;
        }
        trip.is_archived = true;
        hooks.save_trip(trip).await?;
        archived += 1;
    }
    info!(archived, "archived past trips");
    Ok(archived)
}

/// A train with the condition from its most recent maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainCondition {
    /// The train.
    pub train_id: String,
    /// Its public number.
    pub train_number: String,
    /// Condition reported by the latest log.
    pub condition: String,
    /// The latest log.
    pub log_id: String,
}

/// Reports each train's current condition: the one from its latest
/// maintenance log, by date and then by log id. Trains never serviced are
/// left out.
#[instrument(skip(hooks))]
pub async fn refresh_train_conditions<S>(hooks: &EntityHooks<S>) -> Result<Vec<TrainCondition>>
where
    S: RecordStore + ?Sized,
{
    let mut latest: HashMap<String, MaintenanceLog> = HashMap::new();
    for stored in hooks.repository::<MaintenanceLog>().list().await? {
        let log = stored.into_record();
        let newer = latest
            .get(&log.train_id)
            .is_none_or(|current| (log.date(), log.log_id()) > (current.date(), current.log_id()));
        if newer {
            latest.insert(log.train_id.clone(), log);
        }
    }

    let conditions: Vec<_> = hooks
        .repository::<Train>()
        .list()
        .await?
        .into_iter()
        .filter_map(|stored| {
            let train = stored.into_record();
            let log = latest.remove(&train.train_id)?;
            Some(TrainCondition {
                log_id: log.log_id().unwrap_or_default().to_owned(),
                condition: log.condition,
                train_id: train.train_id,
                train_number: train.train_number,
            })
        })
        .collect();
    info!(trains = conditions.len(), "refreshed train conditions");
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveTime};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{clock::FixedClock, model::TripType, store::in_memory::InMemoryRecordStore};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).expect("date")
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("time")
    }

    fn hooks(now: NaiveDateTime) -> EntityHooks<InMemoryRecordStore> {
        EntityHooks::new(Arc::new(InMemoryRecordStore::default()), Arc::new(FixedClock(now)))
    }

    #[test]
    fn arrival_rules() {
        let now = date(20).and_time(time(12, 0));
        let trip = |day, arrival: Option<NaiveTime>| {
            let mut trip = Trip::new("t", date(day), 10, TripType::Local);
            trip.arrival_time = arrival;
            trip
        };
        assert!(has_arrived(&trip(19, None), now));
        assert!(has_arrived(&trip(20, Some(time(11, 0))), now));
        assert!(!has_arrived(&trip(20, Some(time(12, 0))), now));
        assert!(!has_arrived(&trip(20, None), now));
        assert!(!has_arrived(&trip(21, Some(time(1, 0))), now));
    }

    #[test]
    fn overnight_trips_arrive_the_next_day() {
        let overnight = |day| Trip::new("t", date(day), 10, TripType::Local).with_times(time(23, 0), time(1, 0));

        assert_eq!(arrives_at(&overnight(20)), Some(date(21).and_time(time(1, 0))));
        assert!(!has_arrived(&overnight(20), date(20).and_time(time(12, 0))));
        assert!(!has_arrived(&overnight(19), date(20).and_time(time(0, 30))));
        assert!(has_arrived(&overnight(19), date(20).and_time(time(1, 30))));
    }

    #[tokio::test]
    async fn archives_only_arrived_trips() {
        let now = date(20).and_time(time(12, 0));
        let hooks = hooks(now);
        for trip in [
            Trip::new("past", date(19), 10, TripType::Local).with_times(time(9, 0), time(10, 0)),
            Trip::new("done", date(20), 10, TripType::Local).with_times(time(9, 0), time(10, 0)),
            Trip::new("running", date(20), 10, TripType::Local).with_times(time(11, 0), time(13, 0)),
            Trip::new("later", date(21), 10, TripType::Local).with_times(time(9, 0), time(10, 0)),
            Trip::new("tonight", date(20), 10, TripType::Local).with_times(time(23, 0), time(1, 0)),
        ] {
            hooks.save_trip(trip).await.unwrap();
        }

        assert_eq!(archive_past_trips(&hooks, now).await.unwrap(), 2);
        assert_eq!(archive_past_trips(&hooks, now).await.unwrap(), 0);

        let trips = hooks.repository::<Trip>();
        let past = trips.load("past").await.unwrap();
        assert!(past.record().is_archived);
        assert_eq!(past.record().duration().map(|d| d.as_seconds()), Some(3600));
        assert!(!trips.load("running").await.unwrap().record().is_archived);
        assert!(!trips.load("tonight").await.unwrap().record().is_archived);
    }

    #[tokio::test]
    async fn latest_log_sets_the_condition() {
        let hooks = hooks(date(20).and_time(time(8, 0)));
        hooks.save_train(Train::new("100001", "S1001")).await.unwrap();
        hooks.save_train(Train::new("100002", "S1002")).await.unwrap();

        hooks
            .record_maintenance(MaintenanceLog::new("100001", "Fair").with_date(date(18)))
            .await
            .unwrap();
        hooks
            .record_maintenance(MaintenanceLog::new("100001", "Poor").with_date(date(19)))
            .await
            .unwrap();
        hooks
            .record_maintenance(MaintenanceLog::new("100001", "Good").with_date(date(19)))
            .await
            .unwrap();

        let conditions = refresh_train_conditions(&hooks).await.unwrap();
        assert_eq!(
            conditions,
            vec![TrainCondition {
                train_id: "100001".into(),
                train_number: "S1001".into(),
                condition: "Good".into(),
                log_id: "202406190002".into(),
            }]
        );
    }
}
