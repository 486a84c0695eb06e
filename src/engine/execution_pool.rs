//! Execution Pool Manager (§4.4): a purely advisory, per-user bounded count
//! of "active" position groups. Callers must consult it before dispatching
//! to the Position Creator; it does not itself gate any side effect.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::Id;

pub struct ExecutionPoolManager {
    max_active_per_user: u32,
    held: Mutex<HashMap<Id, u32>>,
}

impl ExecutionPoolManager {
    pub fn new(max_active_per_user: u32) -> Self {
        Self { max_active_per_user, held: Mutex::new(HashMap::new()) }
    }

    /// Request a slot for a new (non-continuation) group. Pyramid
    /// continuations on an already-held group should use
    /// [`ExecutionPoolManager::bypass`] instead when the configuration's
    /// `same_pair_timeframe_bypass` is enabled.
    pub async fn request_slot(&self, user_id: Id) -> bool {
        let mut held = self.held.lock().await;
        let count = held.entry(user_id).or_insert(0);
        if *count < self.max_active_per_user {
            *count += 1;
            debug!(%user_id, count = *count, "execution pool slot granted");
            true
        } else {
            debug!(%user_id, count = *count, "execution pool slot denied");
            false
        }
    }

    /// Grants implicit slot for a pyramid continuation without consuming
    /// pool capacity, mirroring the `same_pair_timeframe` bypass rule.
    pub fn bypass(&self) -> bool {
        true
    }

    pub async fn release_slot(&self, user_id: Id) {
        let mut held = self.held.lock().await;
        if let Some(count) = held.get_mut(&user_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub async fn active_count(&self, user_id: Id) -> u32 {
        *self.held.lock().await.get(&user_id).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_once_capacity_is_exhausted() {
        let pool = ExecutionPoolManager::new(2);
        let user = Id::new_v4();
        assert!(pool.request_slot(user).await);
        assert!(pool.request_slot(user).await);
        assert!(!pool.request_slot(user).await);
        pool.release_slot(user).await;
        assert!(pool.request_slot(user).await);
    }
}
