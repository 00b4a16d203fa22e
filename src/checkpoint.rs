//! Per-mint fetch progress, persisted as a whole JSON snapshot.

use std::collections::HashMap;

use tracing::debug;

use crate::store::{KvStore, StoreError};

pub const CHECKPOINTS_KEY: &str = "checkpoints";

/// Mapping from mint to the unix timestamp of its last ingested point.
///
/// Absent mint = never fetched; the planner then starts at the month
/// boundary. The whole map is persisted after every mutation so a crash
/// never loses forward progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointMap {
    entries: HashMap<String, i64>,
}

impl CheckpointMap {
    pub async fn load(store: &dyn KvStore) -> Result<Self, StoreError> {
        match store.get(CHECKPOINTS_KEY).await? {
            Some(raw) => {
                let entries =
                    serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                        key: CHECKPOINTS_KEY.to_string(),
                        message: err.to_string(),
                    })?;
                Ok(Self { entries })
            }
            None => Ok(Self::default()),
        }
    }

    pub fn last_ingested(&self, mint: &str) -> Option<i64> {
        self.entries.get(mint).copied()
    }

    /// Advances the checkpoint for `mint`; never moves it backwards.
    pub fn advance(&mut self, mint: &str, last_ingested: i64) {
        let entry = self.entries.entry(mint.to_string()).or_insert(last_ingested);
        if *entry < last_ingested {
            *entry = last_ingested;
        }
        debug!(
            component = "engine",
            event = "ohlcv.checkpoint.advanced",
            mint,
            last_ingested = *entry
        );
    }

    pub async fn persist(&self, store: &dyn KvStore) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&self.entries)?;
        store.set(CHECKPOINTS_KEY, &raw).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn advance_never_moves_backwards() {
        let mut checkpoints = CheckpointMap::default();
        checkpoints.advance("mint-a", 1_000);
        checkpoints.advance("mint-a", 4_600);
        checkpoints.advance("mint-a", 2_000);

        assert_eq!(checkpoints.last_ingested("mint-a"), Some(4_600));
        assert_eq!(checkpoints.last_ingested("mint-b"), None);
    }

    #[tokio::test]
    async fn load_of_missing_snapshot_is_empty() {
        let store = MemoryStore::new();
        let checkpoints = CheckpointMap::load(&store).await.unwrap();
        assert!(checkpoints.is_empty());
    }

    #[tokio::test]
    async fn persist_and_reload_round_trips() {
        let store = MemoryStore::new();

        let mut checkpoints = CheckpointMap::default();
        checkpoints.advance("mint-a", 1_685_581_200);
        checkpoints.advance("mint-b", 1_688_169_600);
        checkpoints.persist(&store).await.unwrap();

        let reloaded = CheckpointMap::load(&store).await.unwrap();
        assert_eq!(reloaded, checkpoints);
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_typed_error() {
        let store = MemoryStore::new();
        store.set(CHECKPOINTS_KEY, "not json").await.unwrap();

        let err = CheckpointMap::load(&store).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
