use super::{RecordKind, RecordStore};
use async_trait::async_trait;
use dashmap::DashMap;
use log::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use strum::IntoEnumIterator;

/// One JSON file per entity kind under a data directory, each a flat
/// array of records. Writes flush the whole collection for that kind.
/// On load, id counters are seeded to `max(id) + 1`.
pub struct JsonFileStore {
    data_dir: PathBuf,
    collections: DashMap<RecordKind, BTreeMap<String, Value>>,
    sequences: DashMap<RecordKind, AtomicU64>,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            collections: DashMap::new(),
            sequences: DashMap::new(),
        }
    }

    fn file_path(&self, kind: RecordKind) -> PathBuf {
        self.data_dir.join(kind.file_name())
    }

    /// Id under which a record is keyed. Records carry their id in one
    /// of a few fields depending on kind.
    fn record_id(record: &Value) -> Option<String> {
        for key in ["id", "clientId", "fleetId", "missionId"] {
            match record.get(key) {
                Some(Value::String(s)) => return Some(s.clone()),
                Some(Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
        None
    }

    async fn flush_kind(&self, kind: RecordKind) {
        let records: Vec<Value> = self
            .collections
            .get(&kind)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        let json = match serde_json::to_vec_pretty(&records) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {} collection: {}", kind, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.data_dir).await {
            error!("Failed to create data dir {:?}: {}", self.data_dir, e);
            return;
        }
        if let Err(e) = tokio::fs::write(self.file_path(kind), json).await {
            error!("Failed to write {}: {}", kind.file_name(), e);
        }
    }

    async fn load_kind(&self, kind: RecordKind) {
        let path = self.file_path(kind);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                error!("Failed to read {}: {}", kind.file_name(), e);
                return;
            }
        };
        let records: Vec<Value> = match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to parse {}: {}", kind.file_name(), e);
                return;
            }
        };
        let mut collection = BTreeMap::new();
        let mut max_numeric_id: u64 = 0;
        for record in records {
            match Self::record_id(&record) {
                Some(id) => {
                    if let Ok(n) = id.parse::<u64>() {
                        max_numeric_id = max_numeric_id.max(n);
                    }
                    collection.insert(id, record);
                }
                None => warn!("Skipping {} record without an id field", kind),
            }
        }
        info!("Loaded {} {} records", collection.len(), kind);
        self.collections.insert(kind, collection);
        self.sequences
            .insert(kind, AtomicU64::new(max_numeric_id));
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn list(&self, kind: RecordKind) -> Vec<Value> {
        self.collections
            .get(&kind)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn get(&self, kind: RecordKind, id: &str) -> Option<Value> {
        self.collections.get(&kind)?.get(id).cloned()
    }

    async fn put(&self, kind: RecordKind, id: &str, record: Value) {
        self.collections
            .entry(kind)
            .or_default()
            .insert(id.to_string(), record);
        self.flush_kind(kind).await;
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> bool {
        let removed = match self.collections.get_mut(&kind) {
            Some(mut collection) => collection.remove(id).is_some(),
            None => false,
        };
        if removed {
            self.flush_kind(kind).await;
        }
        removed
    }

    async fn next_id(&self, kind: RecordKind) -> u64 {
        self.sequences
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    async fn save_world(&self) {
        for kind in RecordKind::iter() {
            self.flush_kind(kind).await;
        }
    }

    async fn load_world(&self) {
        for kind in RecordKind::iter() {
            self.load_kind(kind).await;
        }
    }

    async fn reset_world(&self) {
        self.collections.clear();
        self.reset_sequences().await;
        for kind in RecordKind::iter() {
            self.flush_kind(kind).await;
        }
    }

    async fn reset_sequences(&self) {
        self.sequences.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("smo-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_reset_load_round_trip() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir);
        store
            .put(RecordKind::Users, "1", json!({"id": 1, "username": "ada"}))
            .await;
        store
            .put(
                RecordKind::NpcFleets,
                "f-1",
                json!({"fleetId": "f-1", "shipCount": 3}),
            )
            .await;
        store.save_world().await;

        let reloaded = JsonFileStore::new(&dir);
        reloaded.load_world().await;
        assert_eq!(
            reloaded.get(RecordKind::Users, "1").await.unwrap()["username"],
            "ada"
        );
        assert_eq!(
            reloaded.get(RecordKind::NpcFleets, "f-1").await.unwrap()["shipCount"],
            3
        );
        // counter resumes past the highest numeric id
        assert_eq!(reloaded.next_id(RecordKind::Users).await, 2);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_reset_world_clears_files() {
        let dir = temp_dir();
        let store = JsonFileStore::new(&dir);
        store
            .put(RecordKind::Players, "9", json!({"id": 9}))
            .await;
        store.reset_world().await;
        assert!(store.list(RecordKind::Players).await.is_empty());

        let reloaded = JsonFileStore::new(&dir);
        reloaded.load_world().await;
        assert!(reloaded.list(RecordKind::Players).await.is_empty());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
