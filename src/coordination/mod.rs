//! Distributed coordination store (§6.3): leader election, heartbeats, and
//! the TTL caches backing precision/ticker/user-config reads.

mod memory;
mod redis_backend;

pub use memory::InMemoryCoordinationStore;
pub use redis_backend::RedisCoordinationStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sets `key` to `value` only if absent, with a TTL. Returns `true` if
    /// this call won the race.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    /// Deletes `key` only if its current value equals `expected`. Used to
    /// release a lock without clobbering a lock acquired by someone else
    /// after this holder's lease expired.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Thin leader-election helper built on any [`CoordinationStore`]. A holder
/// renews its lease periodically; on renewal failure it must demote itself
/// (stop driving the background loops) since no split-brain supervision is
/// expected.
pub struct LeaderElection<C: CoordinationStore> {
    store: C,
    lock_key: String,
    holder_token: String,
    ttl: Duration,
}

impl<C: CoordinationStore> LeaderElection<C> {
    pub fn new(store: C, service_name: &str, holder_token: impl Into<String>, ttl: Duration) -> Self {
        Self { store, lock_key: format!("leader:{service_name}"), holder_token: holder_token.into(), ttl }
    }

    pub async fn try_acquire(&self) -> Result<bool> {
        self.store.set_if_absent(&self.lock_key, &self.holder_token, self.ttl).await
    }

    /// Re-asserts this holder's lease. Returns `false` (demote) if another
    /// holder's token now occupies the key.
    pub async fn renew(&self) -> Result<bool> {
        match self.store.get(&self.lock_key).await? {
            Some(current) if current == self.holder_token => {
                self.store.set(&self.lock_key, &self.holder_token, self.ttl).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn release(&self) -> Result<()> {
        self.store.compare_and_delete(&self.lock_key, &self.holder_token).await?;
        Ok(())
    }
}

pub async fn emit_heartbeat<C: CoordinationStore>(store: &C, service_name: &str, ttl: Duration) -> Result<()> {
    let key = format!("service_health:{service_name}");
    store.set(&key, "alive", ttl).await
}

pub async fn is_healthy<C: CoordinationStore>(store: &C, service_name: &str) -> Result<bool> {
    let key = format!("service_health:{service_name}");
    Ok(store.get(&key).await?.is_some())
}
