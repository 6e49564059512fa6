//! subscriberd - uamesh PubSub subscriber daemon
//!
//! Binds the configured reception transports, drives the select loop and
//! logs every dataset update delivered by the configured readers.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subscriberd::config::Config;
use subscriberd::scheduler::{SubScheduler, TargetUpdate};

struct LogTarget;

impl subscriberd::scheduler::SubTargetVariable for LogTarget {
    fn set_target_variables(&self, update: TargetUpdate) -> bool {
        for (name, value) in &update.fields {
            info!(
                publisher = %update.publisher_id,
                group = update.writer_group_id,
                writer = update.writer_id,
                field = %name,
                ?value,
                "dataset update"
            );
        }
        true
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("subscriberd=info".parse().unwrap()))
        .init();

    let config = Config::parse();

    info!(
        "subscriberd v{} - uamesh PubSub subscriber",
        env!("CARGO_PKG_VERSION")
    );

    let subscriber = match config.load_subscriber_config() {
        Ok(subscriber) => subscriber,
        Err(e) => {
            error!("failed to load subscriber configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let key_sets = match config.load_key_sets(&subscriber) {
        Ok(key_sets) => key_sets,
        Err(e) => {
            error!("failed to load security keys: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let scheduler = SubScheduler::new(subscriber, Arc::new(LogTarget), Arc::new(key_sets))
        .with_state_callback(Box::new(|state| info!(?state, "subscriber state")))
        .with_gap_callback(Box::new(|gap| {
            tracing::warn!(
                publisher = %gap.publisher_id,
                writer = gap.writer_id,
                previous = gap.previous,
                received = gap.received,
                "dataset sequence number gap"
            );
        }));

    if let Err(e) = scheduler.start().await {
        error!(%e, "subscriber start failed");
        return ExitCode::FAILURE;
    }

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
    scheduler.stop().await;

    ExitCode::SUCCESS
}
