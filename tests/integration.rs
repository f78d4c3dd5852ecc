mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use orderflow_engine::feed::ReplayFeed;
use orderflow_engine::models::{Direction, PlanStatus, PositionStatus, Timeframe};
use orderflow_engine::plans::{Condition, ConditionSet, PlanConditionEvaluator, PlanStore};
use orderflow_engine::scheduler::MonitoringScheduler;
use orderflow_engine::trading::PaperExecution;

use common::{flat_candles, plan_spec, test_config, trades_at};

const SYMBOL: &str = "BTC-USD";

async fn build_scheduler(
    feed: Arc<ReplayFeed>,
    store: orderflow_engine::plans::SharedPlanStore,
) -> MonitoringScheduler {
    MonitoringScheduler::new(
        test_config().shared(),
        feed,
        Box::new(PaperExecution::new(0.0, 0.0, 1.0)),
        store,
    )
    .await
}

/// Full lifecycle: a plan with an order-flow condition triggers on the fast
/// cadence, then a hard delta reversal force-closes the position.
#[tokio::test]
async fn trigger_then_flip_exit() {
    let feed = Arc::new(ReplayFeed::new());
    feed.load_bars(SYMBOL, Timeframe::M1, flat_candles(60, 50000.0));
    // Sustained buying: window delta positive, CVD rising
    feed.load_trades(SYMBOL, trades_at(SYMBOL, 0, &[5.0; 20]));
    feed.set_imbalance(SYMBOL, 0.2);

    let store = PlanStore::new().shared();
    let id = {
        let mut s = store.write().await;
        let mut spec = plan_spec(SYMBOL, Direction::Long, 50000.0, 200.0);
        spec.conditions = ConditionSet::new(vec![Condition::DeltaPositive]).unwrap();
        s.create_plan(spec).unwrap()
    };

    let mut sched = build_scheduler(feed.clone(), store.clone()).await;

    // Pass 1: pre-check passes, plan promotes and triggers
    sched.fast_pass().await;
    assert_eq!(
        store.read().await.get(&id).unwrap().status,
        PlanStatus::Triggered
    );
    assert_eq!(sched.open_positions().len(), 1);
    assert_eq!(sched.exit_rule_count(), 1);

    // Hard reversal: heavy selling appended after the entry window, then
    // let the cached snapshot expire
    feed.append_trades(SYMBOL, trades_at(SYMBOL, 120, &[-6.0; 20]));
    feed.set_imbalance(SYMBOL, -0.2);
    tokio::time::sleep(tokio::time::Duration::from_millis(1100)).await;

    sched.fast_pass().await;
    assert!(sched.open_positions().is_empty());
    assert_eq!(sched.exit_rule_count(), 0);
}

/// A plan far from price accrues cancellation risk and is auto-cancelled
/// after two consecutive slow passes above the boundary.
#[tokio::test]
async fn stale_far_plan_is_auto_cancelled() {
    let feed = Arc::new(ReplayFeed::new());
    feed.load_bars(SYMBOL, Timeframe::M1, flat_candles(60, 50000.0));

    let store = PlanStore::new().shared();
    let id = {
        let mut s = store.write().await;
        // Entry 2% away from price, no conditions
        let id = s
            .create_plan(plan_spec(SYMBOL, Direction::Long, 51000.0, 50.0))
            .unwrap();
        // Age the plan past the 24h ceiling
        s.get_mut(&id).unwrap().created_at = Utc::now() - Duration::hours(25);
        id
    };

    let mut sched = build_scheduler(feed, store.clone()).await;

    sched.slow_pass().await;
    {
        let store = store.read().await;
        let plan = store.get(&id).unwrap();
        // Flagged but not yet cancelled after one pass
        assert!(plan.cancellation.risk >= 0.8);
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    sched.slow_pass().await;
    assert_eq!(
        store.read().await.get(&id).unwrap().status,
        PlanStatus::Cancelled
    );
}

/// Operator API: status report, forced re-evaluation, manual cancel.
#[tokio::test]
async fn operator_lifecycle_via_store() {
    let store = PlanStore::new().shared();
    let evaluator = PlanConditionEvaluator::default();
    let now = Utc::now();

    let id = store
        .write()
        .await
        .create_plan(plan_spec(SYMBOL, Direction::Long, 50000.0, 200.0))
        .unwrap();

    let report = store
        .read()
        .await
        .plan_status(&id, Some(50100.0), &evaluator, now)
        .unwrap();
    assert_eq!(report.status, PlanStatus::Pending);
    assert!(report.zone.in_zone);
    assert!(report.re_eval.available);

    let re = store
        .write()
        .await
        .re_evaluate(&id, true, 50100.0, now, &evaluator)
        .unwrap();
    assert_eq!(re.action, "re_evaluated");

    store.write().await.cancel_plan(&id, "operator").unwrap();
    let report = store
        .read()
        .await
        .plan_status(&id, None, &evaluator, now)
        .unwrap();
    assert_eq!(report.status, PlanStatus::Cancelled);
}

/// A symbol that stops serving data degrades to "no update": the plan stays
/// Pending and other symbols keep evaluating.
#[tokio::test]
async fn dead_feed_degrades_to_no_update() {
    let feed = Arc::new(ReplayFeed::new());
    feed.load_bars(SYMBOL, Timeframe::M1, flat_candles(60, 50000.0));

    let store = PlanStore::new().shared();
    let (live, dead) = {
        let mut s = store.write().await;
        let live = s
            .create_plan(plan_spec(SYMBOL, Direction::Long, 50000.0, 200.0))
            .unwrap();
        let dead = s
            .create_plan(plan_spec("ETH-USD", Direction::Long, 3000.0, 10.0))
            .unwrap();
        (live, dead)
    };

    let mut sched = build_scheduler(feed, store.clone()).await;
    sched.slow_pass().await;

    let store = store.read().await;
    assert_eq!(store.get(&live).unwrap().status, PlanStatus::Triggered);
    assert_eq!(store.get(&dead).unwrap().status, PlanStatus::Pending);
    assert!(store.get(&dead).unwrap().zone_entry_time.is_none());
}

/// Triggered positions close as ClosedFlip in paper history.
#[tokio::test]
async fn paper_history_records_flip_close() {
    use orderflow_engine::trading::{ExecutionClient, OrderRequest};

    let mut exec = PaperExecution::new(0.0, 0.0, 1.0);
    let fill = exec
        .open(&OrderRequest {
            symbol: SYMBOL.to_string(),
            direction: Direction::Long,
            price: 50000.0,
            volume: 1.0,
            stop_loss: 49500.0,
            take_profit: 51000.0,
            plan_id: None,
        })
        .await
        .unwrap();

    let closed = exec
        .close(fill.ticket, 50200.0, PositionStatus::ClosedFlip)
        .await
        .unwrap();
    assert_eq!(closed.status, PositionStatus::ClosedFlip);
    assert!(closed.pnl > 0.0);
    assert_eq!(exec.closed_positions().len(), 1);
}
