use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::*;
use crate::errors::{EngineError, Result};

use super::{GroupKey, GroupLockGuard, Store};

fn group_key_of(g: &PositionGroup) -> (Id, String, String, String, Side) {
    (g.user_id, g.exchange.clone(), g.symbol.clone(), g.timeframe.clone(), g.side)
}

fn signal_key_of(s: &QueuedSignal) -> (Id, String, String, String, Side) {
    (s.user_id, s.exchange.clone(), s.symbol.clone(), s.timeframe.clone(), s.side)
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Id, User>>,
    dca_configs: RwLock<HashMap<(Id, String, String, String), DCAConfiguration>>,
    groups: RwLock<HashMap<Id, PositionGroup>>,
    group_locks: RwLock<HashMap<Id, Arc<Mutex<()>>>>,
    pyramids: RwLock<HashMap<Id, Pyramid>>,
    orders: RwLock<HashMap<Id, DCAOrder>>,
    queued: RwLock<HashMap<Id, QueuedSignal>>,
    risk_actions: RwLock<HashMap<Id, RiskAction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, group_id: Id) -> Arc<Mutex<()>> {
        if let Some(lock) = self.group_locks.read().await.get(&group_id) {
            return lock.clone();
        }
        let mut locks = self.group_locks.write().await;
        locks.entry(group_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

struct MemoryGroupLockGuard(#[allow(dead_code)] OwnedMutexGuard<()>);
impl GroupLockGuard for MemoryGroupLockGuard {}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: Id) -> Result<User> {
        self.users.read().await.get(&id).cloned().ok_or_else(|| EngineError::user_not_found(id))
    }

    async fn put_user(&self, user: User) -> Result<()> {
        self.users.write().await.insert(user.id, user);
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<Id>> {
        Ok(self.users.read().await.keys().copied().collect())
    }

    async fn get_specific_dca_config(
        &self,
        user_id: Id,
        pair: &str,
        timeframe: &str,
        exchange: &str,
    ) -> Result<Option<DCAConfiguration>> {
        let key = (user_id, pair.to_string(), timeframe.to_string(), exchange.to_string());
        Ok(self.dca_configs.read().await.get(&key).cloned())
    }

    async fn put_dca_config(&self, config: DCAConfiguration) -> Result<()> {
        let key = (config.user_id, config.pair.clone(), config.timeframe.clone(), config.exchange.clone());
        self.dca_configs.write().await.insert(key, config);
        Ok(())
    }

    async fn lock_group(&self, group_id: Id) -> Box<dyn GroupLockGuard> {
        let lock = self.lock_for(group_id).await;
        let guard = lock.lock_owned().await;
        Box::new(MemoryGroupLockGuard(guard))
    }

    async fn get_group(&self, id: Id) -> Result<PositionGroup> {
        self.groups.read().await.get(&id).cloned().ok_or_else(|| EngineError::not_found(format!("group {id}")))
    }

    async fn get_active_group(&self, key: GroupKey<'_>) -> Result<Option<PositionGroup>> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .find(|g| {
                g.user_id == key.user_id
                    && g.exchange == key.exchange
                    && g.symbol == key.symbol
                    && g.timeframe == key.timeframe
                    && g.side == key.side
                    && !g.status.is_terminal()
            })
            .cloned())
    }

    async fn list_active_groups_for_user(&self, user_id: Id) -> Result<Vec<PositionGroup>> {
        Ok(self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.user_id == user_id && !g.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_all_active_groups(&self) -> Result<Vec<PositionGroup>> {
        Ok(self.groups.read().await.values().filter(|g| !g.status.is_terminal()).cloned().collect())
    }

    async fn insert_position_group(
        &self,
        group: PositionGroup,
        pyramid: Pyramid,
        orders: Vec<DCAOrder>,
    ) -> Result<()> {
        let mut groups = self.groups.write().await;
        let key = group_key_of(&group);
        let clash = groups.values().any(|g| group_key_of(g) == key && !g.status.is_terminal());
        if clash {
            return Err(EngineError::DuplicatePosition);
        }
        groups.insert(group.id, group);
        drop(groups);
        self.pyramids.write().await.insert(pyramid.id, pyramid);
        let mut all_orders = self.orders.write().await;
        for order in orders {
            all_orders.insert(order.id, order);
        }
        Ok(())
    }

    async fn update_group(&self, group: PositionGroup) -> Result<()> {
        self.groups.write().await.insert(group.id, group);
        Ok(())
    }

    async fn delete_group_cascade(&self, group_id: Id) -> Result<()> {
        self.groups.write().await.remove(&group_id);
        let pyramid_ids: Vec<Id> = {
            let pyramids = self.pyramids.read().await;
            pyramids.values().filter(|p| p.group_id == group_id).map(|p| p.id).collect()
        };
        self.pyramids.write().await.retain(|_, p| p.group_id != group_id);
        self.orders.write().await.retain(|_, o| o.group_id != group_id && !pyramid_ids.contains(&o.pyramid_id));
        self.group_locks.write().await.remove(&group_id);
        Ok(())
    }

    async fn get_pyramid(&self, id: Id) -> Result<Pyramid> {
        self.pyramids.read().await.get(&id).cloned().ok_or_else(|| EngineError::not_found(format!("pyramid {id}")))
    }

    async fn insert_pyramid(&self, pyramid: Pyramid, orders: Vec<DCAOrder>) -> Result<()> {
        self.pyramids.write().await.insert(pyramid.id, pyramid);
        let mut all_orders = self.orders.write().await;
        for order in orders {
            all_orders.insert(order.id, order);
        }
        Ok(())
    }

    async fn update_pyramid(&self, pyramid: Pyramid) -> Result<()> {
        self.pyramids.write().await.insert(pyramid.id, pyramid);
        Ok(())
    }

    async fn list_pyramids_for_group(&self, group_id: Id) -> Result<Vec<Pyramid>> {
        Ok(self.pyramids.read().await.values().filter(|p| p.group_id == group_id).cloned().collect())
    }

    async fn get_order(&self, id: Id) -> Result<DCAOrder> {
        self.orders.read().await.get(&id).cloned().ok_or_else(|| EngineError::not_found(format!("order {id}")))
    }

    async fn update_order(&self, order: DCAOrder) -> Result<()> {
        self.orders.write().await.insert(order.id, order);
        Ok(())
    }

    async fn list_orders_for_group(&self, group_id: Id) -> Result<Vec<DCAOrder>> {
        Ok(self.orders.read().await.values().filter(|o| o.group_id == group_id).cloned().collect())
    }

    async fn list_non_terminal_orders_for_user(&self, user_id: Id) -> Result<Vec<DCAOrder>> {
        let groups = self.groups.read().await;
        let user_group_ids: std::collections::HashSet<Id> =
            groups.values().filter(|g| g.user_id == user_id).map(|g| g.id).collect();
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| user_group_ids.contains(&o.group_id) && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_active_queued_signal(&self, key: GroupKey<'_>) -> Result<Option<QueuedSignal>> {
        let queued = self.queued.read().await;
        Ok(queued
            .values()
            .find(|s| {
                s.user_id == key.user_id
                    && s.exchange == key.exchange
                    && s.symbol == key.symbol
                    && s.timeframe == key.timeframe
                    && s.side == key.side
                    && s.status == QueuedSignalStatus::Queued
            })
            .cloned())
    }

    async fn upsert_queued_signal(&self, mut signal: QueuedSignal) -> Result<()> {
        let mut queued = self.queued.write().await;
        let key = signal_key_of(&signal);
        let existing = queued
            .values()
            .find(|s| signal_key_of(s) == key && s.status == QueuedSignalStatus::Queued)
            .map(|s| (s.id, s.queued_at, s.replacement_count));
        if let Some((existing_id, queued_at, replacement_count)) = existing {
            signal.id = existing_id;
            signal.queued_at = queued_at;
            signal.replacement_count = replacement_count + 1;
        }
        signal.status = QueuedSignalStatus::Queued;
        queued.insert(signal.id, signal);
        Ok(())
    }

    async fn update_queued_signal(&self, signal: QueuedSignal) -> Result<()> {
        self.queued.write().await.insert(signal.id, signal);
        Ok(())
    }

    async fn list_queued_signals(&self) -> Result<Vec<QueuedSignal>> {
        Ok(self
            .queued
            .read()
            .await
            .values()
            .filter(|s| s.status == QueuedSignalStatus::Queued)
            .cloned()
            .collect())
    }

    async fn remove_queued_signal(&self, id: Id) -> Result<()> {
        self.queued.write().await.remove(&id);
        Ok(())
    }

    async fn insert_risk_action(&self, action: RiskAction) -> Result<()> {
        self.risk_actions.write().await.insert(action.id, action);
        Ok(())
    }

    async fn list_risk_actions_for_user(&self, user_id: Id) -> Result<Vec<RiskAction>> {
        Ok(self.risk_actions.read().await.values().filter(|a| a.user_id == user_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn group(user_id: Id, status: PositionGroupStatus) -> PositionGroup {
        PositionGroup {
            id: Id::new_v4(),
            user_id,
            exchange: "mock".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "60".into(),
            side: Side::Long,
            status,
            total_dca_legs: 1,
            filled_dca_legs: 0,
            pyramid_count: 0,
            max_pyramids: 5,
            total_filled_quantity: Decimal::ZERO,
            weighted_avg_entry: Decimal::ZERO,
            total_invested_usd: Decimal::ZERO,
            unrealized_pnl_usd: Decimal::ZERO,
            unrealized_pnl_percent: Decimal::ZERO,
            realized_pnl_usd: Decimal::ZERO,
            tp_mode: TpMode::PerLeg,
            tp_aggregate_percent: Decimal::ZERO,
            tp_pyramid_percent: Decimal::ZERO,
            replacement_count: 0,
            risk_timer_start: None,
            risk_timer_expires: None,
            risk_eligible: false,
            risk_blocked: false,
            risk_skip_once: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
        }
    }

    fn pyramid(group_id: Id) -> Pyramid {
        Pyramid {
            id: Id::new_v4(),
            group_id,
            pyramid_index: 0,
            status: PyramidStatus::Pending,
            signal_id: None,
            total_quantity: Decimal::ZERO,
            entry_timestamp: None,
            closed_at: None,
            exit_price: None,
            realized_pnl_usd: Decimal::ZERO,
            tp_order_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_active_group_is_rejected() {
        let store = MemoryStore::new();
        let user_id = Id::new_v4();
        let g1 = group(user_id, PositionGroupStatus::Live);
        let p1 = pyramid(g1.id);
        store.insert_position_group(g1.clone(), p1, vec![]).await.unwrap();

        let mut g2 = group(user_id, PositionGroupStatus::Live);
        g2.symbol = g1.symbol.clone();
        g2.exchange = g1.exchange.clone();
        g2.timeframe = g1.timeframe.clone();
        g2.side = g1.side;
        let p2 = pyramid(g2.id);
        let err = store.insert_position_group(g2, p2, vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePosition));
    }

    #[tokio::test]
    async fn closed_group_frees_the_key() {
        let store = MemoryStore::new();
        let user_id = Id::new_v4();
        let mut g1 = group(user_id, PositionGroupStatus::Live);
        let p1 = pyramid(g1.id);
        store.insert_position_group(g1.clone(), p1, vec![]).await.unwrap();
        g1.status = PositionGroupStatus::Closed;
        store.update_group(g1.clone()).await.unwrap();

        let g2 = group(user_id, PositionGroupStatus::Live);
        let p2 = pyramid(g2.id);
        store.insert_position_group(g2, p2, vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn cascade_delete_removes_children() {
        let store = MemoryStore::new();
        let user_id = Id::new_v4();
        let g1 = group(user_id, PositionGroupStatus::Live);
        let p1 = pyramid(g1.id);
        let p1_id = p1.id;
        store.insert_position_group(g1.clone(), p1, vec![]).await.unwrap();
        store.delete_group_cascade(g1.id).await.unwrap();
        assert!(store.get_group(g1.id).await.is_err());
        assert!(store.get_pyramid(p1_id).await.is_err());
    }
}
