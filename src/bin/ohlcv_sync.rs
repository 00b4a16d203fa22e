use chrono::NaiveDate;

use candlesync::{
    init_logging, log_app_start, logging_config_from_env, run_sync, BirdeyeConfig,
    BirdeyeProvider, DuneConfig, DuneWarehouse, RedisStore, SyncConfig, WarehouseSink,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("ohlcv_sync", &logging);

    let birdeye_api_key = require_env("BIRDEYE_API_KEY")?;
    let redis_url = require_env("REDIS_URL")?;
    let start_date = parse_start_date()?;
    let publish = env_flag("CANDLESYNC_PUBLISH", true);

    let store = RedisStore::connect(&redis_url).await?;
    let provider = BirdeyeProvider::new(BirdeyeConfig::new(birdeye_api_key))?;

    let warehouse = if publish {
        let dune_api_key = require_env("DUNE_API_KEY")?;
        let namespace = require_env("CANDLESYNC_DUNE_NAMESPACE")?;
        let table_name = std::env::var("CANDLESYNC_DUNE_TABLE")
            .unwrap_or_else(|_| "prices".to_string());
        let sink = DuneWarehouse::new(DuneConfig::new(dune_api_key, namespace, table_name))?;

        // table creation is a one-time setup step, opt-in
        if env_flag("CANDLESYNC_CREATE_TABLE", false) {
            sink.create_table().await?;
        }
        Some(sink)
    } else {
        None
    };

    let cfg = SyncConfig { start_date };
    let sink = warehouse.as_ref().map(|sink| sink as &dyn WarehouseSink);
    run_sync(&store, &provider, sink, &cfg).await?;

    Ok(())
}

fn require_env(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("missing required environment variable {name}"))
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn parse_start_date() -> Result<NaiveDate, String> {
    if let Ok(raw) = std::env::var("CANDLESYNC_START_DATE") {
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| "CANDLESYNC_START_DATE must be YYYY-MM-DD".to_string())
    } else {
        Ok(SyncConfig::default().start_date)
    }
}
