//! tally-node: runs a local Tally chain.
//!
//! Drives a block clock on a Tokio interval. Every tick executes one
//! block against the SQLite store and publishes the block's events once
//! it has committed.

use std::time::Duration;

use anyhow::Context as _;
use tally_node::{Chain, EventBus, NodeConfig};
use tally_store::SqliteStore;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = NodeConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_directive().parse()?),
        )
        .init();

    info!("Tally node starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    // 2. Open store
    let db_path = data_dir.join("tally.db");
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening store {}", db_path.display()))?;

    // 3. Wire modules and apply genesis
    let mut chain = Chain::new(store, &config)?;
    if chain.init_genesis(&config)? {
        info!("Fresh chain initialized");
    }
    info!(height = chain.height(), "Resuming at committed height");

    // 4. Event bus, with a logging subscriber
    let event_bus = EventBus::new(1000);
    let mut events = event_bus.subscribe_filtered(config.logging.events.clone());
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                event_type = ?event.event_type,
                height = event.height,
                payload = %event.payload,
                "event"
            );
        }
    });

    // 5. Block clock
    let mut ticker = tokio::time::interval(Duration::from_secs(config.chain.block_time_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                match chain.execute_block(now, Vec::new()) {
                    Ok(outcome) => {
                        for transition in &outcome.transitions {
                            info!(height = outcome.height, ?transition, "epoch transition");
                        }
                        event_bus.publish(outcome.events);
                    }
                    Err(e) => {
                        error!(height = chain.next_height(), error = %e, "block failed, stopping");
                        return Err(e.into());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    info!(height = chain.height(), "Node stopped");
    Ok(())
}
