//! Hourly OHLCV ingestion for tracked token mints.
//!
//! Implemented scope:
//! - registry polling keeps the tracked-mint set current in the store
//! - the sync engine plans per-(mint, month) windows, fetches hourly
//!   OHLCV, classifies complete vs incomplete periods, and reconciles
//!   stored period records against a per-mint checkpoint
//! - completed periods are republished to the analytics warehouse as CSV

mod checkpoint;
mod engine;
mod observability;
mod period;
mod planner;
mod provider;
mod registry;
mod store;
mod warehouse;

pub use checkpoint::{CheckpointMap, CHECKPOINTS_KEY};
pub use engine::{
    classify, latest_elapsed_hour, retain_settled_points, run_sync, run_sync_at, Classification,
    SyncConfig, SyncError, SyncReport,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use period::{
    complete_exists, complete_key, delete_incomplete, incomplete_key, PeriodRecord,
};
pub use planner::{
    month_window, months_between, next_month, plan_window, MonthWindow, SkipReason, WindowPlan,
    HOUR_SECS, MIN_SWAP_COUNT,
};
pub use provider::{
    BirdeyeConfig, BirdeyeProvider, FetchWindow, OhlcvPoint, OhlcvProvider, ProviderError,
    BIRDEYE_OHLCV_URL,
};
pub use registry::{
    load_tracked_mints, poll_once, run_poller, save_tracked_mints, DuneRegistryClient, MintEntry,
    PollOutcome, RegistryClient, RegistryConfig, RegistryError, MINTS_KEY,
    REGISTRY_MIN_SWAP_COUNT_EXCLUSIVE,
};
pub use store::{KvStore, MemoryStore, RedisStore, StoreError};
pub use warehouse::{
    format_block_time, price_rows, rows_to_csv, DuneConfig, DuneWarehouse, PriceRow,
    WarehouseError, WarehouseSink, DUNE_API_BASE_URL, WAREHOUSE_CSV_HEADERS,
};
