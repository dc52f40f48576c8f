pub mod bus;
pub mod config;
pub mod db;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod fanout;
pub mod ingestion;
pub mod models;
pub mod pubsub;
pub mod rate_limit;
pub mod retention;
pub mod routes;
pub mod status;
pub mod token;

use bus::Bus;
use config::Config;
use db::Db;
use pubsub::PubSub;
use rate_limit::RateLimiter;
use rocket_cors::CorsOptions;
use std::sync::Arc;

/// Build the process: open the store, wire up the bus/pub-sub, spawn one
/// task per partition for each of the four pipeline workers (F/G/H/I), start
/// the retention sweep, and return the Rocket instance fronting the ingress
/// HTTP surface (K) and the socket gateway (J).
///
/// Mirrors the reference service's `rocket()` / `build_rocket()` split: a
/// thin env-driven entry point plus an inner builder that tests can call
/// with an explicit database path.
pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    build_rocket(config)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env();
    config.db_path = db_path.to_string();
    build_rocket(config)
}

pub fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(&config.db_path);
    let bus = Arc::new(Bus::new(config.bus_partitions));
    let pubsub = Arc::new(PubSub::new());
    let rate_limiter = RateLimiter::new();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let worker_bus = bus.clone();
    let worker_pubsub = pubsub.clone();
    let worker_db_path = config.db_path.clone();
    let dlq_max_retries = config.dlq_max_retries;

    let retention_db_path = config.db_path.clone();
    let ttl_days = config.message_ttl_days;
    let retention_interval_secs = config.retention_interval_secs;

    rocket::build()
        .manage(db)
        .manage(bus)
        .manage(pubsub)
        .manage(rate_limiter)
        .manage(config)
        .attach(cors)
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::create_conversation,
                routes::add_identity,
                routes::submit,
                routes::submit_status,
                routes::get_user_conversations,
                routes::get_inbox,
                routes::gateway_stream,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Pipeline Workers",
            move |_rocket| {
                Box::pin(async move {
                    ingestion::spawn(worker_bus.clone(), worker_db_path.clone(), dlq_max_retries);
                    fanout::spawn(worker_bus.clone(), worker_db_path.clone(), dlq_max_retries);
                    delivery::spawn(
                        worker_bus.clone(),
                        worker_pubsub.clone(),
                        worker_db_path.clone(),
                        dlq_max_retries,
                    );
                    status::spawn(worker_bus, worker_pubsub, worker_db_path, dlq_max_retries);
                    println!("pipeline: ingestion/fanout/delivery/status workers started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Message Retention",
            move |_rocket| {
                Box::pin(async move {
                    retention::spawn_retention_task(
                        retention_db_path,
                        ttl_days,
                        retention_interval_secs,
                    );
                    println!("retention: sweep task started");
                })
            },
        ))
}
