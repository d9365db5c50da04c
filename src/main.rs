//! MySQL binlog to Pub/Sub relay
//!
//! Streams row-level changes from a MySQL server's binary log, normalizes each
//! changed row into a canonical JSON record and delivers it, in commit order,
//! to the terminal (development) or a Pub/Sub topic (production).

mod core;
mod events;
mod pipeline;
mod replication;
mod utils;

use crate::core::{Environment, RelayConfig, RelayResult, RuntimeContext};
use crate::events::SinkDispatcher;
use crate::pipeline::RelayPipeline;
use crate::replication::{PositionStore, StreamSupervisor};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "binlog2pubsub",
    about = "MySQL binlog change data capture relay to Pub/Sub",
    version
)]
struct Args {
    /// Environment to run in: dev or prod (overrides ENVIRONMENT)
    #[arg(long = "env")]
    environment: Option<String>,

    /// Path of the persisted binlog position (overrides POSITION_FILE)
    #[arg(long)]
    position_file: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => {
            info!("CDC relay stopped");
            Ok(())
        }
        Err(e) => {
            error!("CDC relay failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run(args: Args) -> RelayResult<()> {
    let environment = Environment::resolve(args.environment.as_deref())?;
    let mut config = RelayConfig::from_env(environment)?;
    if let Some(path) = args.position_file {
        config.position_file = path;
    }

    info!("Running in {} mode", config.environment);
    info!(
        "Source database {}:{}/{} (server id {})",
        config.database.host, config.database.port, config.database.database, config.server_id
    );

    let context = RuntimeContext::build(config)?;
    if let Some(topic) = context.topic() {
        info!("Publishing to {}", topic);
    }

    let positions = PositionStore::new(&context.config().position_file);
    let start = positions.load()?;
    info!("Starting CDC from {} ({})", start, positions.path().display());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping after the current record"),
            Err(e) => warn!("Failed to listen for the shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let dispatcher = SinkDispatcher::new(context.create_sink());
    info!("Delivering records via the {} sink", dispatcher.sink_type());
    let mut pipeline = RelayPipeline::new(dispatcher, positions, shutdown.clone());

    let connector = connector(&context)?;
    let mut supervisor = StreamSupervisor::new(
        connector,
        context.config().reconnect_delay,
        shutdown,
    );
    supervisor.run(start, &mut pipeline).await
}

#[cfg(feature = "mysql")]
fn connector(context: &RuntimeContext) -> RelayResult<replication::MysqlBinlogConnector> {
    let config = context.config();
    Ok(replication::MysqlBinlogConnector::new(
        config.database.clone(),
        config.server_id,
    ))
}

#[cfg(not(feature = "mysql"))]
fn connector(_context: &RuntimeContext) -> RelayResult<UnavailableConnector> {
    Err(crate::core::RelayError::config(
        "Built without the `mysql` feature; no binlog client is available",
    ))
}

/// Stand-in connector type for builds without a binlog client
#[cfg(not(feature = "mysql"))]
struct UnavailableConnector;

#[cfg(not(feature = "mysql"))]
#[async_trait::async_trait]
impl replication::supervisor::ChangeStreamConnector for UnavailableConnector {
    async fn connect(
        &self,
        _start: &replication::position::StartPosition,
    ) -> RelayResult<Box<dyn replication::supervisor::ChangeStream>> {
        Err(crate::core::RelayError::config("No binlog client available"))
    }
}
