//! Orchestration layer wiring the Precision & Grid Calculator, Exchange
//! Connector, and Store into the four subsystems described in the design:
//! Signal Router & Queue Manager, Position/DCA Execution Engine, Order Fill
//! Monitor, and Risk Engine.

pub mod execution_pool;
pub mod fill_monitor;
pub mod order_service;
pub mod position_creator;
pub mod queue_manager;
pub mod risk_engine;
pub mod signal_router;
pub mod tp_evaluator;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalIntent {
    Entry,
    Exit,
}

/// The minimal payload the core depends on from the inbound webhook
/// contract (§6.4). Authentication and the surrounding HTTP layer live
/// outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingSignal {
    pub user_id: Id,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub action: String,
    pub entry_price: Decimal,
    pub intent: SignalIntent,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteOutcome {
    Accepted,
    Queued,
    Exited,
    NoActivePosition,
    Rejected(RouteRejected),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRejected {
    pub reason: String,
}
