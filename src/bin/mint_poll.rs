use std::time::Duration;

use candlesync::{
    init_logging, log_app_start, logging_config_from_env, run_poller, DuneRegistryClient,
    RedisStore, RegistryConfig,
};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10_800; // 3 hours

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("mint_poll", &logging);

    let api_key = require_env("DUNE_POLL_API_KEY")?;
    let query_url = require_env("MINT_QUERY_URL")?;
    let redis_url = require_env("REDIS_URL")?;
    let interval_secs = poll_interval_secs()?;

    let store = RedisStore::connect(&redis_url).await?;
    let client = DuneRegistryClient::new(RegistryConfig::new(query_url, api_key))?;

    run_poller(&client, &store, Duration::from_secs(interval_secs)).await;

    Ok(())
}

fn require_env(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("missing required environment variable {name}"))
}

fn poll_interval_secs() -> Result<u64, String> {
    match std::env::var("CANDLESYNC_POLL_INTERVAL_SECS") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| "CANDLESYNC_POLL_INTERVAL_SECS must be an integer".to_string()),
        Err(_) => Ok(DEFAULT_POLL_INTERVAL_SECS),
    }
}
