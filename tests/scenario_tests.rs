//! End-to-end scenarios exercising the public API: Signal Router through
//! Order Fill Monitor with a resting second leg, Take-Profit close with
//! pool release, queue promotion under pool pressure, and a Risk Engine
//! hedge cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dca_trading_engine::domain::*;
use dca_trading_engine::engine::execution_pool::ExecutionPoolManager;
use dca_trading_engine::engine::fill_monitor::FillMonitor;
use dca_trading_engine::engine::order_service::OrderService;
use dca_trading_engine::engine::position_creator::PositionCreator;
use dca_trading_engine::engine::queue_manager::QueueManager;
use dca_trading_engine::engine::risk_engine::RiskEngine;
use dca_trading_engine::engine::signal_router::SignalRouter;
use dca_trading_engine::engine::tp_evaluator::TakeProfitEvaluator;
use dca_trading_engine::engine::{IncomingSignal, RouteOutcome, SignalIntent};
use dca_trading_engine::exchange::{ExchangeConnector, MockConnector};
use dca_trading_engine::grid::PrecisionRules;
use dca_trading_engine::store::{GroupKey, MemoryStore, Store};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn btc_precision() -> PrecisionRules {
    PrecisionRules { tick_size: dec!(0.01), step_size: dec!(0.0001), min_qty: dec!(0.0001), min_notional: dec!(10) }
}

fn two_leg_config(user_id: Id) -> DCAConfiguration {
    DCAConfiguration {
        id: Uuid::new_v4(),
        user_id,
        pair: "BTC/USDT".into(),
        timeframe: "60".into(),
        exchange: "mock".into(),
        entry_order_type: EntryOrderType::Limit,
        levels: vec![
            DcaLevel { gap_percent: dec!(0), weight_percent: dec!(50), tp_percent: dec!(1) },
            DcaLevel { gap_percent: dec!(-2), weight_percent: dec!(50), tp_percent: dec!(1) },
        ],
        pyramid_specific_levels: HashMap::new(),
        tp_mode: TpMode::PerLeg,
        tp_aggregate_percent: Decimal::ZERO,
        tp_pyramid_percent: Decimal::ZERO,
        max_pyramids: 1,
        same_pair_timeframe_bypass: false,
        cancel_dca_beyond_percent: dec!(5),
    }
}

fn user(id: Id) -> User {
    User { id, default_exchange: "mock".into(), is_active: true, risk_config: RiskEngineConfig::default(), created_at: Utc::now() }
}

#[tokio::test]
async fn entry_signal_routes_fills_first_leg_then_resting_second_on_retrace() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut precision = IndexMap::new();
    precision.insert("BTC/USDT".to_string(), btc_precision());
    let mock = Arc::new(MockConnector::new(precision));
    mock.set_price("BTC/USDT", dec!(50000)).await;
    mock.set_balance("USDT", dec!(10000)).await;
    let exchange: Arc<dyn ExchangeConnector> = mock.clone();

    let user_id = Uuid::new_v4();
    store.put_user(user(user_id)).await.unwrap();
    let config = two_leg_config(user_id);
    store.put_dca_config(config).await.unwrap();

    let pool = Arc::new(ExecutionPoolManager::new(5));
    let order_service = Arc::new(OrderService::new(exchange.clone(), store.clone()));
    let position_creator = Arc::new(PositionCreator::new(store.clone(), order_service.clone()));
    let queue = Arc::new(QueueManager::new(store.clone(), pool.clone()));
    let risk_engine = Arc::new(RiskEngine::new(store.clone(), pool.clone()));
    let router = SignalRouter::new(store.clone(), pool.clone(), queue, position_creator, order_service.clone(), risk_engine);

    let signal = IncomingSignal {
        user_id,
        exchange: "mock".into(),
        symbol: "BTC/USDT".into(),
        timeframe: "60".into(),
        action: "buy".into(),
        entry_price: dec!(50000),
        intent: SignalIntent::Entry,
        payload: serde_json::Value::Null,
    };
    let outcome = router.route(exchange.clone(), signal).await.unwrap();
    assert_eq!(outcome, RouteOutcome::Accepted);

    let key = GroupKey { user_id, exchange: "mock", symbol: "BTC/USDT", timeframe: "60", side: Side::Long };
    let group = store.get_active_group(key).await.unwrap().expect("group created");
    assert_eq!(group.status, PositionGroupStatus::Live);
    assert_eq!(group.total_dca_legs, 2);

    let pool2 = Arc::new(ExecutionPoolManager::new(5));
    let tp_evaluator = Arc::new(TakeProfitEvaluator::new(store.clone(), order_service.clone(), pool2.clone()));
    let monitor = FillMonitor::new(store.clone(), order_service.clone(), tp_evaluator, pool2, exchange.clone());

    monitor.run_cycle().await.unwrap();
    let group = store.get_group(group.id).await.unwrap();
    assert_eq!(group.status, PositionGroupStatus::PartiallyFilled);
    assert_eq!(group.filled_dca_legs, 1);

    let orders = store.list_orders_for_group(group.id).await.unwrap();
    let filled = orders.iter().find(|o| o.status == DCAOrderStatus::Filled).unwrap();
    assert!(filled.tp_order_id.is_some(), "per-leg take-profit should be armed on fill");

    mock.set_price("BTC/USDT", dec!(49000)).await;
    monitor.run_cycle().await.unwrap();
    let group = store.get_group(group.id).await.unwrap();
    assert_eq!(group.status, PositionGroupStatus::Active);
    assert_eq!(group.filled_dca_legs, 2);
}

#[tokio::test]
async fn aggregate_take_profit_closes_group_and_frees_pool_slot() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut precision = IndexMap::new();
    precision.insert("BTC/USDT".to_string(), btc_precision());
    let mock = Arc::new(MockConnector::new(precision));
    mock.set_price("BTC/USDT", dec!(50000)).await;
    let exchange: Arc<dyn ExchangeConnector> = mock.clone();

    let user_id = Uuid::new_v4();
    let mut config = two_leg_config(user_id);
    config.levels = vec![DcaLevel { gap_percent: dec!(0), weight_percent: dec!(100), tp_percent: dec!(0) }];
    config.tp_mode = TpMode::Aggregate;
    config.tp_aggregate_percent = dec!(2);

    let pool = Arc::new(ExecutionPoolManager::new(1));
    assert!(pool.request_slot(user_id).await);

    let order_service = Arc::new(OrderService::new(exchange.clone(), store.clone()));
    let position_creator = PositionCreator::new(store.clone(), order_service.clone());
    let group = position_creator
        .create_position_group_from_signal(
            exchange.clone(),
            user_id,
            "mock",
            "BTC/USDT",
            "60",
            Side::Long,
            dec!(50000),
            &config,
            dec!(1000),
            None,
        )
        .await
        .unwrap();

    let tp_evaluator = Arc::new(TakeProfitEvaluator::new(store.clone(), order_service.clone(), pool.clone()));
    let monitor = FillMonitor::new(store.clone(), order_service.clone(), tp_evaluator, pool.clone(), exchange.clone());
    monitor.run_cycle().await.unwrap();
    let group = store.get_group(group.id).await.unwrap();
    assert_eq!(group.status, PositionGroupStatus::Active);

    mock.set_price("BTC/USDT", dec!(51500)).await;
    monitor.run_cycle().await.unwrap();

    let group = store.get_group(group.id).await.unwrap();
    assert_eq!(group.status, PositionGroupStatus::Closed);
    assert_eq!(pool.active_count(user_id).await, 0, "closing the group must release its pool slot");
}

#[tokio::test]
async fn queue_promotion_waits_for_a_free_pool_slot() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let pool = Arc::new(ExecutionPoolManager::new(1));
    let user_id = Uuid::new_v4();
    assert!(pool.request_slot(user_id).await);

    let queue = QueueManager::new(store.clone(), pool.clone());
    let queued = QueuedSignal {
        id: Uuid::new_v4(),
        user_id,
        exchange: "mock".into(),
        symbol: "ETH/USDT".into(),
        timeframe: "60".into(),
        side: Side::Long,
        status: QueuedSignalStatus::Queued,
        entry_price: dec!(3000),
        signal_payload: serde_json::Value::Null,
        queued_at: Utc::now(),
        promoted_at: None,
        replacement_count: 0,
        current_loss_percent: Decimal::ZERO,
        is_pyramid_continuation: false,
        priority_score: 0.0,
    };
    queue.add_signal_to_queue(queued).await.unwrap();

    let exchanges: IndexMap<String, Arc<dyn ExchangeConnector>> = IndexMap::new();
    let mut promoted_count = 0;
    queue
        .run_promotion_cycle(&exchanges, |_signal| Box::pin(async move { Ok(()) }))
        .await
        .unwrap();
    let still_queued = store.list_queued_signals().await.unwrap();
    assert_eq!(still_queued.len(), 1, "denied promotion must leave the signal queued");

    pool.release_slot(user_id).await;
    queue
        .run_promotion_cycle(&exchanges, |_signal| {
            promoted_count += 1;
            Box::pin(async move { Ok(()) })
        })
        .await
        .unwrap();
    assert_eq!(promoted_count, 1);
    let still_queued = store.list_queued_signals().await.unwrap();
    assert!(still_queued.is_empty(), "promoted signal leaves queued status behind");
}

fn active_group(user_id: Id, symbol: &str, side: Side, entry: Decimal, qty: Decimal) -> PositionGroup {
    PositionGroup {
        id: Uuid::new_v4(),
        user_id,
        exchange: "mock".into(),
        symbol: symbol.into(),
        timeframe: "60".into(),
        side,
        status: PositionGroupStatus::Active,
        total_dca_legs: 1,
        filled_dca_legs: 1,
        pyramid_count: 0,
        max_pyramids: 1,
        total_filled_quantity: qty,
        weighted_avg_entry: entry,
        total_invested_usd: entry * qty,
        unrealized_pnl_usd: Decimal::ZERO,
        unrealized_pnl_percent: Decimal::ZERO,
        realized_pnl_usd: Decimal::ZERO,
        tp_mode: TpMode::Aggregate,
        tp_aggregate_percent: dec!(2),
        tp_pyramid_percent: Decimal::ZERO,
        replacement_count: 0,
        risk_timer_start: Some(Utc::now()),
        risk_timer_expires: Some(Utc::now()),
        risk_eligible: true,
        risk_blocked: false,
        risk_skip_once: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        closed_at: None,
    }
}

#[tokio::test]
async fn risk_engine_hedges_a_loser_against_a_winner() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.put_user(user(user_id)).await.unwrap();

    let loser = active_group(user_id, "BTC/USDT", Side::Long, dec!(50000), dec!(0.01));
    let winner = active_group(user_id, "ETH/USDT", Side::Long, dec!(3000), dec!(0.2));
    store.insert_position_group(loser.clone(), pyramid_for(loser.id), vec![]).await.unwrap();
    store.insert_position_group(winner.clone(), pyramid_for(winner.id), vec![]).await.unwrap();

    let mut precision = IndexMap::new();
    precision.insert("BTC/USDT".to_string(), btc_precision());
    precision.insert("ETH/USDT".to_string(), PrecisionRules { tick_size: dec!(0.01), step_size: dec!(0.0001), min_qty: dec!(0.0001), min_notional: dec!(10) });
    let mock = Arc::new(MockConnector::new(precision));
    mock.set_price("BTC/USDT", dec!(47000)).await; // loser: -30 usd, -6%
    mock.set_price("ETH/USDT", dec!(3200)).await; // winner: +40 usd

    let mut exchanges: IndexMap<String, Arc<dyn ExchangeConnector>> = IndexMap::new();
    exchanges.insert("mock".into(), mock.clone());

    let pool = Arc::new(ExecutionPoolManager::new(2));
    assert!(pool.request_slot(user_id).await);
    assert!(pool.request_slot(user_id).await);

    let risk_engine = RiskEngine::new(store.clone(), pool.clone());
    risk_engine.run_cycle(&exchanges).await.unwrap();

    let loser_after = store.get_group(loser.id).await.unwrap();
    assert_eq!(loser_after.status, PositionGroupStatus::Closed);
    assert!(loser_after.realized_pnl_usd < Decimal::ZERO);

    let winner_after = store.get_group(winner.id).await.unwrap();
    assert_eq!(winner_after.status, PositionGroupStatus::Active, "winner only partially closes");
    assert!(winner_after.total_filled_quantity < winner.total_filled_quantity);
    assert!(winner_after.realized_pnl_usd > Decimal::ZERO);

    assert_eq!(pool.active_count(user_id).await, 1, "only the loser's slot is released");

    let actions = store.list_risk_actions_for_user(user_id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].loser_group_id, loser.id);
}

fn pyramid_for(group_id: Id) -> Pyramid {
    Pyramid {
        id: Uuid::new_v4(),
        group_id,
        pyramid_index: 0,
        status: PyramidStatus::Filled,
        signal_id: None,
        total_quantity: Decimal::ZERO,
        entry_timestamp: Some(Utc::now()),
        closed_at: None,
        exit_price: None,
        realized_pnl_usd: Decimal::ZERO,
        tp_order_id: None,
    }
}
