//! Core aggregate types shared by every engine component.
//!
//! Children never hold a reference back to their parent aggregate, only its
//! id; callers navigate via the repositories in [`crate::store`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_action(action: &str) -> Side {
        if action.eq_ignore_ascii_case("buy") { Side::Long } else { Side::Short }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpMode {
    PerLeg,
    Aggregate,
    Hybrid,
    PyramidAggregate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub default_exchange: String,
    pub is_active: bool,
    pub risk_config: RiskEngineConfig,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    pub max_open_positions_global: u32,
    pub max_open_positions_per_symbol: u32,
    pub max_total_exposure_usd: Decimal,
    pub max_daily_loss_usd: Decimal,
    pub risk_per_position_percent: Decimal,
    pub risk_per_position_cap_usd: Decimal,
    pub loss_threshold_percent: Decimal,
    pub max_winners_to_combine: usize,
    pub require_full_pyramids: bool,
    pub use_trade_age_filter: bool,
    pub age_threshold_minutes: i64,
    pub timer_start_condition: TimerStartCondition,
    pub post_full_wait_minutes: i64,
    pub engine_paused_by_loss_limit: bool,
    pub engine_force_stopped: bool,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            max_open_positions_global: 10,
            max_open_positions_per_symbol: 2,
            max_total_exposure_usd: Decimal::new(10_000, 0),
            max_daily_loss_usd: Decimal::new(500, 0),
            risk_per_position_percent: Decimal::new(10, 0),
            risk_per_position_cap_usd: Decimal::new(1_000, 0),
            loss_threshold_percent: Decimal::new(-5, 0),
            max_winners_to_combine: crate::constants::DEFAULT_MAX_WINNERS_TO_COMBINE,
            require_full_pyramids: false,
            use_trade_age_filter: false,
            age_threshold_minutes: 0,
            timer_start_condition: TimerStartCondition::AfterAllDcaSubmitted,
            post_full_wait_minutes: 60,
            engine_paused_by_loss_limit: false,
            engine_force_stopped: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerStartCondition {
    AfterAllDcaSubmitted,
    AfterAllDcaFilled,
    After5Pyramids,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaLevel {
    pub gap_percent: Decimal,
    pub weight_percent: Decimal,
    pub tp_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DCAConfiguration {
    pub id: Id,
    pub user_id: Id,
    pub pair: String,
    pub timeframe: String,
    pub exchange: String,
    pub entry_order_type: EntryOrderType,
    pub levels: Vec<DcaLevel>,
    pub pyramid_specific_levels: std::collections::HashMap<u32, Vec<DcaLevel>>,
    pub tp_mode: TpMode,
    pub tp_aggregate_percent: Decimal,
    pub tp_pyramid_percent: Decimal,
    pub max_pyramids: u32,
    pub same_pair_timeframe_bypass: bool,
    pub cancel_dca_beyond_percent: Decimal,
}

impl DCAConfiguration {
    pub fn levels_for_pyramid(&self, pyramid_index: u32) -> &[DcaLevel] {
        self.pyramid_specific_levels
            .get(&pyramid_index)
            .map(|v| v.as_slice())
            .unwrap_or(&self.levels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionGroupStatus {
    Waiting,
    Live,
    PartiallyFilled,
    Active,
    Closing,
    Closed,
    Failed,
}

impl PositionGroupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PositionGroupStatus::Closed | PositionGroupStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionGroup {
    pub id: Id,
    pub user_id: Id,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub side: Side,
    pub status: PositionGroupStatus,
    pub total_dca_legs: u32,
    pub filled_dca_legs: u32,
    pub pyramid_count: u32,
    pub max_pyramids: u32,
    pub total_filled_quantity: Decimal,
    pub weighted_avg_entry: Decimal,
    pub total_invested_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub realized_pnl_usd: Decimal,
    pub tp_mode: TpMode,
    pub tp_aggregate_percent: Decimal,
    pub tp_pyramid_percent: Decimal,
    pub replacement_count: u32,
    pub risk_timer_start: Option<DateTime<Utc>>,
    pub risk_timer_expires: Option<DateTime<Utc>>,
    pub risk_eligible: bool,
    pub risk_blocked: bool,
    pub risk_skip_once: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionGroup {
    /// Quantity-weighted mean fill price over `fills`, recomputed from
    /// scratch rather than incrementally, to avoid compounding rounding
    /// error across many partial fills.
    pub fn recompute_aggregates(&mut self, fills: &[(Decimal, Decimal)]) {
        let mut total_qty = Decimal::ZERO;
        let mut total_cost = Decimal::ZERO;
        for (qty, price) in fills {
            total_qty += *qty;
            total_cost += *qty * *price;
        }
        self.total_filled_quantity = total_qty;
        self.weighted_avg_entry = if total_qty.is_zero() {
            Decimal::ZERO
        } else {
            total_cost / total_qty
        };
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PyramidStatus {
    Pending,
    Submitted,
    Filled,
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pyramid {
    pub id: Id,
    pub group_id: Id,
    pub pyramid_index: u32,
    pub status: PyramidStatus,
    pub signal_id: Option<Id>,
    pub total_quantity: Decimal,
    pub entry_timestamp: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub realized_pnl_usd: Decimal,
    pub tp_order_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DCAOrderStatus {
    Pending,
    TriggerPending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl DCAOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DCAOrderStatus::Filled | DCAOrderStatus::Cancelled | DCAOrderStatus::Failed)
    }

    pub fn is_open(self) -> bool {
        matches!(self, DCAOrderStatus::Open | DCAOrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DCAOrder {
    pub id: Id,
    pub pyramid_id: Id,
    pub group_id: Id,
    pub leg_index: u32,
    pub status: DCAOrderStatus,
    pub gap_percent: Decimal,
    pub weight_percent: Decimal,
    pub tp_percent: Decimal,
    pub price: Decimal,
    pub tp_price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub tp_hit: bool,
    pub tp_fill_price: Option<Decimal>,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub tp_executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedSignalStatus {
    Queued,
    Promoted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSignal {
    pub id: Id,
    pub user_id: Id,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub side: Side,
    pub status: QueuedSignalStatus,
    pub entry_price: Decimal,
    pub signal_payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub replacement_count: u32,
    pub current_loss_percent: Decimal,
    pub is_pyramid_continuation: bool,
    pub priority_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskActionType {
    OffsetLoss,
    ManualBlock,
    ManualSkip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerContribution {
    pub group_id: Id,
    pub pnl_usd: Decimal,
    pub quantity_closed: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAction {
    pub id: Id,
    pub user_id: Id,
    pub loser_group_id: Id,
    pub loser_pnl_usd: Decimal,
    pub winners: Vec<WinnerContribution>,
    pub action_type: RiskActionType,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}
