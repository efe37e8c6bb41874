use std::sync::Arc;
use std::time::Duration;

use marketplace_core::config::{get_config, init_config};
use marketplace_core::remote::PostgrestClient;
use marketplace_core::services::lifecycle_service::AcceptPolicy;
use marketplace_core::CoreState;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let remote = Arc::new(PostgrestClient::new(
        &config.api_base_url,
        config.api_key.clone(),
        config.request_timeout(),
    )?);
    let state = CoreState::new(remote, AcceptPolicy::RejectSiblings);

    info!("Priming local cache");
    let users = state.sync.refresh_users().await?;
    let jobs = state.sync.refresh_jobs().await?;
    info!(users, jobs, "Initial refresh complete");

    {
        let sync = state.sync.clone();
        let interval = Duration::from_secs(config.refresh_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match sync.refresh_jobs().await {
                    Ok(count) => {
                        info!(count, "Refreshed job collection");
                    }
                    Err(e) => {
                        error!(error = ?e, "Job refresh worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
