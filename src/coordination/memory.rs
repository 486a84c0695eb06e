use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::Result;

use super::CoordinationStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Single-process stand-in for the Redis-backed coordination store, used in
/// tests and single-process/paper operation.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_value(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if self.live_value(key).await.is_some() {
            return Ok(false);
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).map(|e| e.expires_at > Instant::now()).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Instant::now() + ttl });
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).map(|e| e.value == expected).unwrap_or(false) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value: value.to_string(), expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.set_if_absent("leader:x", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_absent("leader:x", "b", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_only_releases_own_token() {
        let store = InMemoryCoordinationStore::new();
        store.set_if_absent("leader:x", "a", Duration::from_secs(60)).await.unwrap();
        assert!(!store.compare_and_delete("leader:x", "b").await.unwrap());
        assert!(store.compare_and_delete("leader:x", "a").await.unwrap());
        assert!(store.set_if_absent("leader:x", "c", Duration::from_secs(60)).await.unwrap());
    }
}
