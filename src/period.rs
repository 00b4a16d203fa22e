//! Storage key scheme and record payload for fetched periods.
//!
//! Incomplete periods are keyed by `{mint}_{start}`, complete periods by
//! `{mint}_{start}_{end}`. For a given `(mint, start)` at most one of the
//! two exists; a complete record is terminal and never rewritten.

use serde::{Deserialize, Serialize};

use crate::provider::OhlcvPoint;
use crate::store::{KvStore, StoreError};

pub fn complete_key(mint: &str, window_start: i64, window_end: i64) -> String {
    format!("{mint}_{window_start}_{window_end}")
}

pub fn incomplete_key(mint: &str, window_start: i64) -> String {
    format!("{mint}_{window_start}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub mint: String,
    pub window_start: i64,
    pub window_end: i64,
    pub items: Vec<OhlcvPoint>,
}

impl PeriodRecord {
    pub async fn save_complete(&self, store: &dyn KvStore) -> Result<(), StoreError> {
        let key = complete_key(&self.mint, self.window_start, self.window_end);
        store.set(&key, &serde_json::to_string(self)?).await
    }

    pub async fn save_incomplete(&self, store: &dyn KvStore) -> Result<(), StoreError> {
        let key = incomplete_key(&self.mint, self.window_start);
        store.set(&key, &serde_json::to_string(self)?).await
    }

    pub async fn load(store: &dyn KvStore, key: &str) -> Result<Option<Self>, StoreError> {
        match store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| StoreError::Corrupt {
                    key: key.to_string(),
                    message: err.to_string(),
                }),
            None => Ok(None),
        }
    }
}

pub async fn complete_exists(
    store: &dyn KvStore,
    mint: &str,
    window_start: i64,
    window_end: i64,
) -> Result<bool, StoreError> {
    store
        .exists(&complete_key(mint, window_start, window_end))
        .await
}

/// Removes a superseded incomplete record; returns whether one existed.
pub async fn delete_incomplete(
    store: &dyn KvStore,
    mint: &str,
    window_start: i64,
) -> Result<bool, StoreError> {
    let key = incomplete_key(mint, window_start);
    if !store.exists(&key).await? {
        return Ok(false);
    }
    store.delete(&key).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample_record() -> PeriodRecord {
        PeriodRecord {
            mint: "mint-a".to_string(),
            window_start: 1_685_581_200,
            window_end: 1_688_169_600,
            items: vec![OhlcvPoint {
                address: "mint-a".to_string(),
                unix_time: 1_685_581_200,
                o: 1.0,
                h: 1.0,
                l: 1.0,
                c: 1.0,
                v: 10.0,
            }],
        }
    }

    #[test]
    fn keys_follow_the_store_layout() {
        assert_eq!(
            complete_key("mint-a", 1_685_581_200, 1_688_169_600),
            "mint-a_1685581200_1688169600"
        );
        assert_eq!(incomplete_key("mint-a", 1_685_581_200), "mint-a_1685581200");
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store = MemoryStore::new();
        let record = sample_record();

        record.save_incomplete(&store).await.unwrap();
        let key = incomplete_key(&record.mint, record.window_start);
        let loaded = PeriodRecord::load(&store, &key).await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn delete_incomplete_reports_supersession() {
        let store = MemoryStore::new();
        let record = sample_record();

        assert!(!delete_incomplete(&store, &record.mint, record.window_start)
            .await
            .unwrap());

        record.save_incomplete(&store).await.unwrap();
        assert!(delete_incomplete(&store, &record.mint, record.window_start)
            .await
            .unwrap());
        assert!(!store
            .exists(&incomplete_key(&record.mint, record.window_start))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn complete_exists_only_matches_exact_window() {
        let store = MemoryStore::new();
        let record = sample_record();
        record.save_complete(&store).await.unwrap();

        assert!(complete_exists(
            &store,
            &record.mint,
            record.window_start,
            record.window_end
        )
        .await
        .unwrap());
        assert!(
            !complete_exists(&store, &record.mint, record.window_start + 3_600, record.window_end)
                .await
                .unwrap()
        );
    }
}
