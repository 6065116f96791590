//! `tirian` command-line front end over the configured record store.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use tirian::{
    CloudEvent, RecordStore,
    booking::{BookingRequest, BookingService},
    clock::{Clock, SystemClock},
    config::Config,
    hooks::EntityHooks,
    jobs,
    model::{Customer, MaintenanceLog, Trip, TripType},
    notify::{ChannelSink, ConfirmationNotice, TracingSink},
    seed, store, telemetry,
};

#[derive(Parser, Debug)]
#[command(name = "tirian")]
#[command(about = "Tirian Trains ticketing core")]
#[command(version)]
/// Command-line arguments.
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Trip service kind.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Service {
    /// Local service.
    Local,
    /// Inter-town service.
    InterTown,
}

impl From<Service> for TripType {
    fn from(service: Service) -> Self {
        match service {
            Service::Local => TripType::Local,
            Service::InterTown => TripType::InterTown,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Register a customer under a new id
    RegisterCustomer {
        /// Family name.
        #[arg(long)]
        last_name: String,
        /// Given name.
        #[arg(long)]
        given_name: String,
        /// Date of birth, `YYYY-MM-DD`.
        #[arg(long)]
        birth_date: NaiveDate,
        /// Middle initial, e.g. `X.`.
        #[arg(long)]
        middle_initial: Option<String>,
        /// Gender.
        #[arg(long)]
        gender: Option<String>,
    },
    /// Create or update a trip
    RecordTrip {
        /// Trip id, e.g. `20240620L001`.
        #[arg(long)]
        trip_id: String,
        /// Day the trip runs.
        #[arg(long)]
        day: NaiveDate,
        /// Fare in Lion Coins.
        #[arg(long)]
        cost: i64,
        /// Service kind.
        #[arg(long, value_enum)]
        service: Service,
        /// Departure time, `HH:MM:SS`.
        #[arg(long, requires = "arrival")]
        departure: Option<NaiveTime>,
        /// Arrival time, `HH:MM:SS`.
        #[arg(long, requires = "departure")]
        arrival: Option<NaiveTime>,
        /// Train running the trip.
        #[arg(long)]
        train: Option<String>,
    },
    /// Book trips on a new ticket
    Book {
        /// Purchasing customer id.
        #[arg(long)]
        customer: String,
        /// Day of travel.
        #[arg(long)]
        trip_date: NaiveDate,
        /// Trip ids; repeat for several.
        #[arg(long = "trip", required = true)]
        trips: Vec<String>,
        /// Purchase date; defaults to today.
        #[arg(long)]
        purchase_date: Option<NaiveDate>,
    },
    /// List a customer's tickets, most recent first
    Tickets {
        /// Customer id.
        #[arg(long)]
        customer: String,
    },
    /// Record a maintenance event
    RecordMaintenance {
        /// Serviced train.
        #[arg(long)]
        train: String,
        /// Condition after servicing.
        #[arg(long)]
        condition: String,
        /// Work done.
        #[arg(long)]
        tasks: Option<String>,
        /// Maintenance date; defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Archive trips that have arrived
    ArchiveTrips,
    /// Report each train's latest condition
    RefreshTrainConditions,
    /// Seed the demo network starting today
    Seed {
        /// RNG seed for reproducible schedules.
        #[arg(long)]
        rng_seed: Option<u64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Renders confirmations for finalized tickets until every sink is gone.
async fn deliver_confirmations(hooks: EntityHooks<dyn RecordStore>, mut rx: UnboundedReceiver<CloudEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(ticket_id) = event.subject().map(str::to_owned) else {
            continue;
        };
        match ConfirmationNotice::load(&hooks, &ticket_id).await {
            Ok(notice) => info!(ticket_id = %ticket_id, subject = %notice.subject, body = %notice.body, "confirmation ready"),
            Err(e) => warn!(ticket_id = %ticket_id, error = %e, "could not render confirmation"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = Config::from_env().wrap_err("loading configuration")?;
    telemetry::init(&config.log)?;

    let store = store::open(&config)
        .await
        .wrap_err_with(|| format!("opening {:?} store", config.storage))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hooks = EntityHooks::new(store, clock.clone());

    match cli.command {
        Command::RegisterCustomer {
            last_name,
            given_name,
            birth_date,
            middle_initial,
            gender,
        } => {
            let mut customer = Customer::new(last_name, given_name, birth_date);
            customer.middle_initial = middle_initial;
            customer.gender = gender;
            print_json(&hooks.register_customer(customer).await?)?;
        }
        Command::RecordTrip {
            trip_id,
            day,
            cost,
            service,
            departure,
            arrival,
            train,
        } => {
            let mut trip = Trip::new(trip_id, day, cost, service.into());
            trip.departure_time = departure;
            trip.arrival_time = arrival;
            trip.train_id = train;
            print_json(&hooks.save_trip(trip).await?)?;
        }
        Command::Book {
            customer,
            trip_date,
            trips,
            purchase_date,
        } => {
            let (sink, rx) = ChannelSink::new();
            let notifier = tokio::spawn(deliver_confirmations(hooks.clone(), rx));
            let booking = BookingService::new(hooks, Arc::new(sink));

            let mut request = BookingRequest::new(customer, trip_date, trips);
            request.purchase_date = purchase_date;
            let ticket = booking.purchase(request).await;

            drop(booking);
            notifier.await?;
            print_json(&ticket?)?;
        }
        Command::Tickets { customer } => {
            let booking = BookingService::new(hooks, Arc::new(TracingSink));
            print_json(&booking.tickets_for_customer(&customer).await?)?;
        }
        Command::RecordMaintenance {
            train,
            condition,
            tasks,
            date,
        } => {
            let mut log = MaintenanceLog::new(train, condition);
            log.tasks = tasks;
            if let Some(date) = date {
                log.set_date(date);
            }
            print_json(&hooks.record_maintenance(log).await?)?;
        }
        Command::ArchiveTrips => {
            let archived = jobs::archive_past_trips(&hooks, clock.now()).await?;
            print_json(&serde_json::json!({ "archived": archived }))?;
        }
        Command::RefreshTrainConditions => {
            print_json(&jobs::refresh_train_conditions(&hooks).await?)?;
        }
        Command::Seed { rng_seed } => {
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            print_json(&seed::seed_network(&hooks, clock.today(), &mut rng).await?)?;
        }
    }

    Ok(())
}
