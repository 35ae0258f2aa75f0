use super::{RecordKind, RecordStore};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keyed hash tables with monotonic id counters. No persistence;
/// `save_world`/`load_world` are no-ops.
pub struct MemoryStore {
    collections: DashMap<RecordKind, BTreeMap<String, Value>>,
    sequences: DashMap<RecordKind, AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            sequences: DashMap::new(),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
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
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> bool {
        match self.collections.get_mut(&kind) {
            Some(mut collection) => collection.remove(id).is_some(),
            None => false,
        }
    }

    async fn next_id(&self, kind: RecordKind) -> u64 {
        self.sequences
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    async fn save_world(&self) {}

    async fn load_world(&self) {}

    async fn reset_world(&self) {
        self.collections.clear();
        self.reset_sequences().await;
    }

    async fn reset_sequences(&self) {
        self.sequences.clear();
    }
}
