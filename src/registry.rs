//! Tracked-mint registry: discovery query client and the poll state machine.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{KvStore, StoreError};

pub const MINTS_KEY: &str = "mints";

/// Registry-side activity gate. The planner applies its own `>= 200`
/// check, so both thresholds must hold independently.
pub const REGISTRY_MIN_SWAP_COUNT_EXCLUSIVE: u64 = 200;

const EARLIEST_TRANSFER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f UTC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEntry {
    pub mint: String,
    #[serde(with = "earliest_transfer_format")]
    pub earliest_transfer: DateTime<Utc>,
    pub swap_count: u64,
}

mod earliest_transfer_format {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(EARLIEST_TRANSFER_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_earliest_transfer(&raw).map_err(de::Error::custom)
    }
}

fn parse_earliest_transfer(raw: &str) -> Result<DateTime<Utc>, String> {
    // Registry rows usually carry millisecond precision; tolerate plain
    // seconds as well.
    let parsed = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f UTC")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S UTC"))
        .map_err(|err| format!("invalid earliest_transfer '{raw}': {err}"))?;
    Ok(parsed.and_utc())
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for mint query: {0}")]
    HttpRequest(String),
    #[error("malformed registry payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns eligible mint rows, filtered to `swap_count > 200`.
    async fn fetch_eligible_mints(&self) -> Result<Vec<MintEntry>, RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub query_url: String,
    pub api_key: String,
    pub http_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn new(query_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            query_url: query_url.into(),
            api_key: api_key.into(),
            http_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    rows: Vec<MintEntry>,
}

pub struct DuneRegistryClient {
    client: reqwest::Client,
    cfg: RegistryConfig,
}

impl DuneRegistryClient {
    pub fn new(cfg: RegistryConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|err| RegistryError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }
}

#[async_trait]
impl RegistryClient for DuneRegistryClient {
    async fn fetch_eligible_mints(&self) -> Result<Vec<MintEntry>, RegistryError> {
        let response = self
            .client
            .get(&self.cfg.query_url)
            .header("X-Dune-API-Key", &self.cfg.api_key)
            .send()
            .await
            .map_err(|err| RegistryError::HttpRequest(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::HttpRequest(format!(
                "unexpected HTTP status {status}"
            )));
        }

        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?;

        let mut rows = payload.result.rows;
        rows.retain(|row| row.swap_count > REGISTRY_MIN_SWAP_COUNT_EXCLUSIVE);
        Ok(rows)
    }
}

pub async fn load_tracked_mints(
    store: &dyn KvStore,
) -> Result<Option<Vec<MintEntry>>, StoreError> {
    match store.get(MINTS_KEY).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                key: MINTS_KEY.to_string(),
                message: err.to_string(),
            }),
        None => Ok(None),
    }
}

pub async fn save_tracked_mints(
    store: &dyn KvStore,
    entries: &[MintEntry],
) -> Result<(), StoreError> {
    store.set(MINTS_KEY, &serde_json::to_string(entries)?).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Initialized { count: usize },
    Unchanged,
    Changed { new_entries: Vec<MintEntry> },
}

/// One poller tick: fetch the eligible set, compare against the stored
/// set, and replace it wholesale on change. The fetched list is
/// authoritative; there is no incremental merge.
pub async fn poll_once(
    client: &dyn RegistryClient,
    store: &dyn KvStore,
) -> Result<PollOutcome, RegistryError> {
    let fetched = client.fetch_eligible_mints().await?;

    match load_tracked_mints(store).await? {
        None => {
            save_tracked_mints(store, &fetched).await?;
            info!(
                component = "registry_poller",
                event = "registry.poll.initialized",
                count = fetched.len()
            );
            Ok(PollOutcome::Initialized {
                count: fetched.len(),
            })
        }
        Some(stored) if stored == fetched => {
            info!(
                component = "registry_poller",
                event = "registry.poll.unchanged",
                count = stored.len()
            );
            Ok(PollOutcome::Unchanged)
        }
        Some(stored) => {
            let new_entries = new_entries(&stored, &fetched);
            info!(
                component = "registry_poller",
                event = "registry.poll.changed",
                stored = stored.len(),
                fetched = fetched.len(),
                new_entries = new_entries.len()
            );
            save_tracked_mints(store, &fetched).await?;
            Ok(PollOutcome::Changed { new_entries })
        }
    }
}

/// Fetched entries that match no stored entry by (mint, earliest_transfer).
fn new_entries(stored: &[MintEntry], fetched: &[MintEntry]) -> Vec<MintEntry> {
    fetched
        .iter()
        .filter(|candidate| {
            !stored.iter().any(|existing| {
                existing.mint == candidate.mint
                    && existing.earliest_transfer == candidate.earliest_transfer
            })
        })
        .cloned()
        .collect()
}

/// Drives `poll_once` on a fixed interval forever. Tick failures are
/// logged and leave the stored set untouched; the next tick retries.
pub async fn run_poller(client: &dyn RegistryClient, store: &dyn KvStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(err) = poll_once(client, store).await {
            warn!(
                component = "registry_poller",
                event = "registry.poll.error",
                error = %err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    struct ScriptedClient {
        rows: Vec<MintEntry>,
        fail: bool,
    }

    #[async_trait]
    impl RegistryClient for ScriptedClient {
        async fn fetch_eligible_mints(&self) -> Result<Vec<MintEntry>, RegistryError> {
            if self.fail {
                return Err(RegistryError::HttpRequest("simulated outage".to_string()));
            }
            Ok(self.rows.clone())
        }
    }

    fn entry(mint: &str, transfer_ts: i64, swap_count: u64) -> MintEntry {
        MintEntry {
            mint: mint.to_string(),
            earliest_transfer: Utc
                .timestamp_opt(transfer_ts, 0)
                .single()
                .expect("valid test timestamp"),
            swap_count,
        }
    }

    #[test]
    fn earliest_transfer_parses_registry_format() {
        let raw = r#"{"mint": "m", "earliest_transfer": "2023-06-01 01:00:00.000 UTC", "swap_count": 500}"#;
        let parsed: MintEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.earliest_transfer.timestamp(), 1_685_581_200);

        let reencoded = serde_json::to_string(&parsed).unwrap();
        assert!(reencoded.contains("2023-06-01 01:00:00.000 UTC"));
    }

    #[test]
    fn earliest_transfer_rejects_garbage() {
        let raw = r#"{"mint": "m", "earliest_transfer": "yesterday", "swap_count": 500}"#;
        assert!(serde_json::from_str::<MintEntry>(raw).is_err());
    }

    #[test]
    fn new_entries_keys_on_mint_and_time() {
        let stored = vec![entry("a", 100, 300), entry("b", 200, 300)];
        let fetched = vec![
            entry("a", 100, 999), // same key, count change only
            entry("b", 250, 300), // same mint, new transfer time
            entry("c", 300, 300), // brand new
        ];

        let diff = new_entries(&stored, &fetched);
        let mints: Vec<&str> = diff.iter().map(|e| e.mint.as_str()).collect();
        assert_eq!(mints, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn first_poll_initializes_the_stored_set() {
        let store = MemoryStore::new();
        let client = ScriptedClient {
            rows: vec![entry("a", 100, 300)],
            fail: false,
        };

        let outcome = poll_once(&client, &store).await.unwrap();
        assert_eq!(outcome, PollOutcome::Initialized { count: 1 });
        assert_eq!(
            load_tracked_mints(&store).await.unwrap().unwrap(),
            client.rows
        );
    }

    #[tokio::test]
    async fn identical_fetch_leaves_store_untouched() {
        let store = MemoryStore::new();
        let rows = vec![entry("a", 100, 300), entry("b", 200, 400)];
        save_tracked_mints(&store, &rows).await.unwrap();
        let before = store.get(MINTS_KEY).await.unwrap();

        let client = ScriptedClient {
            rows,
            fail: false,
        };
        let outcome = poll_once(&client, &store).await.unwrap();
        assert_eq!(outcome, PollOutcome::Unchanged);
        assert_eq!(store.get(MINTS_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn changed_fetch_replaces_the_whole_set() {
        let store = MemoryStore::new();
        save_tracked_mints(&store, &[entry("a", 100, 300)])
            .await
            .unwrap();

        let client = ScriptedClient {
            rows: vec![entry("a", 100, 300), entry("b", 200, 400)],
            fail: false,
        };
        let outcome = poll_once(&client, &store).await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Changed {
                new_entries: vec![entry("b", 200, 400)]
            }
        );
        assert_eq!(
            load_tracked_mints(&store).await.unwrap().unwrap(),
            client.rows
        );
    }

    #[tokio::test]
    async fn failed_tick_preserves_previous_state() {
        let store = MemoryStore::new();
        let rows = vec![entry("a", 100, 300)];
        save_tracked_mints(&store, &rows).await.unwrap();

        let client = ScriptedClient {
            rows: Vec::new(),
            fail: true,
        };
        assert!(poll_once(&client, &store).await.is_err());
        assert_eq!(load_tracked_mints(&store).await.unwrap().unwrap(), rows);
    }
}
