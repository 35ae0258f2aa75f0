mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use strum::{Display, EnumIter};
use tokio::sync::mpsc;

/// Entity kinds the store persists, one collection (and one JSON file)
/// per kind. The Display form is the file stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum RecordKind {
    #[strum(serialize = "users")]
    Users,
    #[strum(serialize = "celestialBodies")]
    CelestialBodies,
    #[strum(serialize = "npcShips")]
    NpcShips,
    #[strum(serialize = "npcFleets")]
    NpcFleets,
    #[strum(serialize = "players")]
    Players,
    #[strum(serialize = "areasOfInterest")]
    AreasOfInterest,
    #[strum(serialize = "serverLogs")]
    ServerLogs,
    #[strum(serialize = "serverStats")]
    ServerStats,
    #[strum(serialize = "settings")]
    Settings,
    #[strum(serialize = "shipTemplates")]
    ShipTemplates,
}

impl RecordKind {
    pub fn file_name(&self) -> String {
        format!("{}.json", self)
    }
}

/// Object-safe CRUD over persisted collections. The tick thread never
/// calls this directly; writes go through a `PersistQueue`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, kind: RecordKind) -> Vec<Value>;
    async fn get(&self, kind: RecordKind, id: &str) -> Option<Value>;
    async fn put(&self, kind: RecordKind, id: &str, record: Value);
    async fn delete(&self, kind: RecordKind, id: &str) -> bool;
    /// Next value of the per-kind monotonic id counter.
    async fn next_id(&self, kind: RecordKind) -> u64;
    async fn save_world(&self);
    async fn load_world(&self);
    async fn reset_world(&self);
    async fn reset_sequences(&self);
}

/// Typed convenience over the object-safe core.
#[async_trait]
pub trait TypedStore: RecordStore {
    async fn list_as<T: DeserializeOwned>(&self, kind: RecordKind) -> Vec<T> {
        self.list(kind)
            .await
            .into_iter()
            .filter_map(|v| match serde_json::from_value(v) {
                Ok(record) => Some(record),
                Err(e) => {
                    error!("Dropping malformed {} record: {}", kind, e);
                    None
                }
            })
            .collect()
    }

    async fn get_as<T: DeserializeOwned>(&self, kind: RecordKind, id: &str) -> Option<T> {
        let value = self.get(kind, id).await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("Malformed {} record {}: {}", kind, id, e);
                None
            }
        }
    }

    async fn put_record<T: Serialize + Sync>(&self, kind: RecordKind, id: &str, record: &T) {
        match serde_json::to_value(record) {
            Ok(value) => self.put(kind, id, value).await,
            Err(e) => error!("Failed to serialize {} record {}: {}", kind, id, e),
        }
    }
}

impl<S: RecordStore + ?Sized> TypedStore for S {}

pub type SharedStore = Arc<dyn RecordStore>;

#[derive(Debug)]
enum QueueMsg {
    Write {
        kind: RecordKind,
        id: String,
        record: Value,
    },
    Delete {
        kind: RecordKind,
        id: String,
    },
    Flush(tokio::sync::oneshot::Sender<()>),
}

/// Fire-and-forget write path. The simulation thread enqueues; a
/// background task drains into the store. Failures log and are dropped.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<QueueMsg>,
}

impl PersistQueue {
    pub fn start(store: SharedStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueMsg>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    QueueMsg::Write { kind, id, record } => store.put(kind, &id, record).await,
                    QueueMsg::Delete { kind, id } => {
                        store.delete(kind, &id).await;
                    }
                    QueueMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("persist queue drained, writer exiting");
        });
        Self { tx }
    }

    pub fn enqueue<T: Serialize>(&self, kind: RecordKind, id: &str, record: &T) {
        let record = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to serialize {} record {}: {}", kind, id, e);
                return;
            }
        };
        let msg = QueueMsg::Write {
            kind,
            id: id.to_string(),
            record,
        };
        if self.tx.send(msg).is_err() {
            warn!("persist queue closed, dropping {} write for {}", kind, id);
        }
    }

    pub fn enqueue_delete(&self, kind: RecordKind, id: &str) {
        let msg = QueueMsg::Delete {
            kind,
            id: id.to_string(),
        };
        if self.tx.send(msg).is_err() {
            warn!("persist queue closed, dropping {} delete for {}", kind, id);
        }
    }

    /// Waits until every write enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        if self.tx.send(QueueMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.list(RecordKind::Players).await.is_empty());

        store
            .put(RecordKind::Players, "1", json!({"id": 1, "username": "a"}))
            .await;
        store
            .put(RecordKind::Players, "2", json!({"id": 2, "username": "b"}))
            .await;
        assert_eq!(store.list(RecordKind::Players).await.len(), 2);
        assert_eq!(
            store.get(RecordKind::Players, "1").await.unwrap()["username"],
            "a"
        );
        assert!(store.delete(RecordKind::Players, "1").await);
        assert!(!store.delete(RecordKind::Players, "1").await);
        assert_eq!(store.list(RecordKind::Players).await.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_sequences() {
        let store = MemoryStore::new();
        assert_eq!(store.next_id(RecordKind::Players).await, 1);
        assert_eq!(store.next_id(RecordKind::Players).await, 2);
        assert_eq!(store.next_id(RecordKind::Users).await, 1);
        store.reset_sequences().await;
        assert_eq!(store.next_id(RecordKind::Players).await, 1);
    }

    #[tokio::test]
    async fn test_persist_queue_writes_through() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let queue = PersistQueue::start(store.clone());
        queue.enqueue(RecordKind::Users, "7", &json!({"id": 7}));
        // writer runs on the runtime; give it a beat
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.get(RecordKind::Users, "7").await.is_some());
    }
}
