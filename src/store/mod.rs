//! Persistent store modeled as repository traits (§6.2).
//!
//! Schema migrations are out of scope; this crate ships a single in-memory
//! implementation that enforces every invariant a relational schema would
//! (partial-unique active-group/queue constraints, cascade delete, and
//! row-level locking for the group→orders mutation path). An embedder
//! wanting real persistence supplies another implementation of [`Store`].

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::domain::*;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey<'a> {
    pub user_id: Id,
    pub exchange: &'a str,
    pub symbol: &'a str,
    pub timeframe: &'a str,
    pub side: Side,
}

/// Guard representing a held row-level lock on a PositionGroup. Dropping it
/// releases the lock. Acquire group locks before order locks everywhere to
/// avoid the deadlock class described in the design notes.
pub trait GroupLockGuard: Send {}
impl<T: Send> GroupLockGuard for T {}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: Id) -> Result<User>;
    async fn put_user(&self, user: User) -> Result<()>;
    async fn list_user_ids(&self) -> Result<Vec<Id>>;

    async fn get_specific_dca_config(
        &self,
        user_id: Id,
        pair: &str,
        timeframe: &str,
        exchange: &str,
    ) -> Result<Option<DCAConfiguration>>;
    async fn put_dca_config(&self, config: DCAConfiguration) -> Result<()>;

    /// Row-level lock on a PositionGroup, emulating `SELECT ... FOR UPDATE`.
    /// Must be acquired before any order lock on the same group.
    async fn lock_group(&self, group_id: Id) -> Box<dyn GroupLockGuard>;

    async fn get_group(&self, id: Id) -> Result<PositionGroup>;
    async fn get_active_group(&self, key: GroupKey<'_>) -> Result<Option<PositionGroup>>;
    async fn list_active_groups_for_user(&self, user_id: Id) -> Result<Vec<PositionGroup>>;
    async fn list_all_active_groups(&self) -> Result<Vec<PositionGroup>>;

    /// Inserts a new PositionGroup together with its first Pyramid and
    /// DCAOrders as a single unit. Fails with [`crate::errors::EngineError::DuplicatePosition`]
    /// if an active group already exists for this key (the partial-unique
    /// index in a real schema).
    async fn insert_position_group(
        &self,
        group: PositionGroup,
        pyramid: Pyramid,
        orders: Vec<DCAOrder>,
    ) -> Result<()>;
    async fn update_group(&self, group: PositionGroup) -> Result<()>;
    /// Deletes a group and cascades to its pyramids and orders.
    async fn delete_group_cascade(&self, group_id: Id) -> Result<()>;

    async fn get_pyramid(&self, id: Id) -> Result<Pyramid>;
    async fn insert_pyramid(&self, pyramid: Pyramid, orders: Vec<DCAOrder>) -> Result<()>;
    async fn update_pyramid(&self, pyramid: Pyramid) -> Result<()>;
    async fn list_pyramids_for_group(&self, group_id: Id) -> Result<Vec<Pyramid>>;

    async fn get_order(&self, id: Id) -> Result<DCAOrder>;
    /// Single-statement update: callers must pass the complete new state,
    /// never a read-modify-write split across two calls while holding only
    /// a partial lock.
    async fn update_order(&self, order: DCAOrder) -> Result<()>;
    async fn list_orders_for_group(&self, group_id: Id) -> Result<Vec<DCAOrder>>;
    async fn list_non_terminal_orders_for_user(&self, user_id: Id) -> Result<Vec<DCAOrder>>;

    async fn get_active_queued_signal(&self, key: GroupKey<'_>) -> Result<Option<QueuedSignal>>;
    /// Replace-or-insert per the one-per-key queue invariant; preserves
    /// `queued_at` and bumps `replacement_count` on replace.
    async fn upsert_queued_signal(&self, signal: QueuedSignal) -> Result<()>;
    /// Overwrites a queued signal's fields (priority score, refreshed loss
    /// percent, promotion status) by id, without the replace semantics of
    /// [`Store::upsert_queued_signal`].
    async fn update_queued_signal(&self, signal: QueuedSignal) -> Result<()>;
    async fn list_queued_signals(&self) -> Result<Vec<QueuedSignal>>;
    async fn remove_queued_signal(&self, id: Id) -> Result<()>;

    async fn insert_risk_action(&self, action: RiskAction) -> Result<()>;
    async fn list_risk_actions_for_user(&self, user_id: Id) -> Result<Vec<RiskAction>>;
}
