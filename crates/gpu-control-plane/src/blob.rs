//! A minimal in-process implementation of the blob-storage collaborator.
//! Real deployments point this at an object store; this one exists so the
//! binaries in this crate are runnable end to end without one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use gpu_sched_core::store::BlobStore;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Default)]
pub struct LocalBlobStore {
    blobs: Mutex<HashMap<String, JsonValue>>,
}

impl LocalBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn load_state(&self, pointer: &str) -> anyhow::Result<JsonValue> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .get(pointer)
            .cloned()
            .unwrap_or(JsonValue::Null))
    }

    async fn save_state(&self, state: &JsonValue) -> anyhow::Result<String> {
        let pointer = Uuid::new_v4().to_string();
        self.blobs.lock().unwrap().insert(pointer.clone(), state.clone());
        Ok(pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_pointer_loads_as_null() {
        let store = LocalBlobStore::new();
        let state = store.load_state("nope").await.unwrap();
        assert_eq!(state, JsonValue::Null);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = LocalBlobStore::new();
        let pointer = store
            .save_state(&serde_json::json!({"step": 3}))
            .await
            .unwrap();
        let loaded = store.load_state(&pointer).await.unwrap();
        assert_eq!(loaded["step"], 3);
    }
}
