use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};

use starry_sync::config::Config;
use starry_sync::reporter::TracingReporter;
use starry_sync::store::PgSyncStore;
use starry_sync::sync::{GuildId, SyncEngine};
use starry_sync::updater::HttpMemberUpdater;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    // Deployments provide a .env file; its absence is fine.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    if config.guilds_to_update.is_empty() {
        println!(
            "No guilds to update, please add the proper environment variable to \
             look like this:\nGUILDS_TO_UPDATE=[\"123821047347744788\",\"808885156490133514\"]"
        );
        return Ok(());
    }

    info!("Starting guild member sync");

    let store = PgSyncStore::connect(&config.database, config.tables.clone()).await?;
    store.migrate().await?;

    let updater = HttpMemberUpdater::new(
        &config.backend_url,
        config.backend_port,
        config.request_timeout,
    );

    let guilds: Vec<GuildId> = config
        .guilds_to_update
        .iter()
        .map(|g| GuildId::from(g.as_str()))
        .collect();

    let mut engine = SyncEngine::new(
        guilds,
        Arc::new(store),
        Arc::new(updater),
        Arc::new(TracingReporter),
        config.tick_period,
    );
    engine.run().await?;

    info!("Guild sync run complete");

    Ok(())
}
