use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::feed::{FeedError, MetricsSource};
use crate::flow::{
    FlowEngine, MetricsCache, OrderFlowSnapshot, PatternClassifier, SignalKind, SignalValue,
};
use crate::models::{CandleSeries, Direction, PlanStatus, PositionStatus};
use crate::plans::{
    EvalAction, PlanConditionEvaluator, SharedPlanStore, TradePlan, CANCEL_RISK_BOUNDARY,
};
use crate::structure::{StructureDetector, StructureSnapshot};
use crate::trading::{
    ExecutionClient, ExitDecision, ExitRule, ExitStateMachine, OrderRequest,
};

/// Everything fetched for one symbol in one pass. Collected up front so no
/// await happens while the plan store is locked.
struct SymbolData {
    price: f64,
    snapshot: Option<OrderFlowSnapshot>,
    structure: Option<StructureSnapshot>,
}

/// A trigger decided under the store lock, executed after it is released.
struct PendingExecution {
    plan_id: Uuid,
    order: OrderRequest,
    entry_delta: f64,
}

/// Dual-cadence monitoring loop: a fast pass over plans with order-flow
/// conditions plus open-position exits, and a slow pass over every pending
/// plan (full evaluation, expiry, cancellation scoring, re-evaluation).
pub struct MonitoringScheduler {
    config: SharedConfig,
    feed: Arc<dyn MetricsSource>,
    execution: Box<dyn ExecutionClient>,
    store: SharedPlanStore,

    flow: FlowEngine,
    cache: MetricsCache,
    evaluator: PlanConditionEvaluator,
    classifier: PatternClassifier,
    structure: StructureDetector,
    exits: ExitStateMachine,

    last_fast: Instant,
    last_slow: Instant,
    skip_fast: bool,
    skip_slow: bool,
    /// Last ingested trade timestamp per symbol, so re-fetched windows are
    /// not double-counted.
    last_trade_ts: HashMap<String, DateTime<Utc>>,
}

impl MonitoringScheduler {
    pub async fn new(
        config: SharedConfig,
        feed: Arc<dyn MetricsSource>,
        execution: Box<dyn ExecutionClient>,
        store: SharedPlanStore,
    ) -> Self {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("Order-flow engine starting up");
        info!(
            "Cadences: fast={}s slow={}s | window={} | cache ttl={}s",
            cfg.fast_interval_secs, cfg.slow_interval_secs, cfg.flow_window, cfg.cache_ttl_secs
        );
        info!("{}", "=".repeat(60));

        let flow = FlowEngine::new(
            cfg.flow_window,
            cfg.tick_capacity,
            cfg.absorption_volume_threshold,
            cfg.absorption_imbalance_threshold,
        );
        let cache = MetricsCache::new(cfg.cache_ttl_secs, cfg.cache_max_entries);
        let evaluator = PlanConditionEvaluator::new(cfg.evaluator.clone());
        let classifier =
            PatternClassifier::new(cfg.classifier_weights.clone(), cfg.classifier_threshold);
        let exits = ExitStateMachine::new(cfg.exit.clone());
        drop(cfg);

        let now = Instant::now();
        Self {
            config,
            feed,
            execution,
            store,
            flow,
            cache,
            evaluator,
            classifier,
            structure: StructureDetector::new(),
            exits,
            last_fast: now,
            last_slow: now,
            skip_fast: false,
            skip_slow: false,
            last_trade_ts: HashMap::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Scheduler running. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down...");
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    async fn tick(&mut self) {
        let (fast_interval, slow_interval) = {
            let cfg = self.config.read().await;
            (cfg.fast_interval_secs, cfg.slow_interval_secs)
        };

        if self.last_fast.elapsed().as_secs() >= fast_interval {
            if self.skip_fast {
                warn!("fast pass overran its interval; skipping this tick");
                self.skip_fast = false;
                self.last_fast = Instant::now();
            } else {
                let started = Instant::now();
                self.fast_pass().await;
                self.last_fast = Instant::now();
                if started.elapsed().as_secs() > fast_interval {
                    self.skip_fast = true;
                }
            }
        }

        if self.last_slow.elapsed().as_secs() >= slow_interval {
            if self.skip_slow {
                warn!("slow pass overran its interval; skipping this tick");
                self.skip_slow = false;
                self.last_slow = Instant::now();
            } else {
                let started = Instant::now();
                self.slow_pass().await;
                self.last_slow = Instant::now();
                if started.elapsed().as_secs() > slow_interval {
                    self.skip_slow = true;
                }
            }
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    pub fn open_positions(&self) -> Vec<crate::trading::Position> {
        self.execution.open_positions()
    }

    pub fn exit_rule_count(&self) -> usize {
        self.exits.len()
    }

    /// Fast cadence: order-flow plans and open-position exits.
    pub async fn fast_pass(&mut self) {
        let plans: Vec<(Uuid, String)> = {
            let store = self.store.read().await;
            store
                .order_flow_ids()
                .into_iter()
                .filter_map(|id| store.get(&id).map(|p| (id, p.symbol.clone())))
                .collect()
        };

        let mut symbols: Vec<String> = plans.iter().map(|(_, s)| s.clone()).collect();
        for pos in self.execution.open_positions() {
            symbols.push(pos.symbol);
        }
        symbols.sort();
        symbols.dedup();

        let data = self.fetch_all(&symbols).await;

        // Pre-check, then immediate promotion to a full evaluation
        let mut executions = Vec::new();
        {
            let mut store = self.store.write().await;
            let now = Utc::now();
            for (id, symbol) in &plans {
                let Some(sd) = data.get(symbol) else { continue };
                let Some(plan) = store.get_mut(id) else { continue };

                if !self.evaluator.check_order_flow_only(plan, sd.snapshot.as_ref()) {
                    continue;
                }
                debug!(plan = %id, "order-flow pre-check passed, promoting");
                if let Some(pending) = Self::apply_evaluation(
                    &self.evaluator,
                    plan,
                    sd,
                    now,
                ) {
                    executions.push(pending);
                }
            }
        }
        self.execute_all(executions).await;

        self.check_exits(&data).await;
    }

    /// Slow cadence: full evaluation of every pending plan, plus expiry,
    /// cancellation scoring and re-evaluation triggering.
    pub async fn slow_pass(&mut self) {
        let retention_hours = self.config.read().await.plan_retention_hours;
        let symbols = self.store.read().await.pending_symbols();
        let data = self.fetch_all(&symbols).await;

        for (symbol, sd) in &data {
            self.log_confluence(symbol, sd);
        }

        let mut executions = Vec::new();
        let mut cancellations: Vec<(Uuid, String)> = Vec::new();
        {
            let mut store = self.store.write().await;
            let now = Utc::now();
            let ids = store.pending_ids();
            for id in ids {
                let Some(plan) = store.get_mut(&id) else { continue };
                let Some(sd) = data.get(&plan.symbol) else {
                    debug!(plan = %id, symbol = %plan.symbol, "no data this pass");
                    continue;
                };

                if let Some(pending) =
                    Self::apply_evaluation(&self.evaluator, plan, sd, now)
                {
                    executions.push(pending);
                    continue;
                }
                if !plan.is_pending() {
                    continue;
                }

                // Re-evaluation triggering
                let decision = self.evaluator.should_re_evaluate(plan, sd.price, now, false);
                if decision.should_run {
                    self.evaluator.register_re_evaluation(plan, now);
                    debug!(
                        plan = %id,
                        reason = decision.reason.as_deref().unwrap_or("-"),
                        "re-evaluation"
                    );
                }

                // Cancellation: two consecutive slow passes above the
                // boundary before the plan is actually cancelled
                let previous_risk = plan.cancellation.risk;
                let scored = self.evaluator.score_cancellation(plan, sd.price, now);
                let confirmed =
                    scored.risk >= CANCEL_RISK_BOUNDARY && previous_risk >= CANCEL_RISK_BOUNDARY;
                plan.cancellation = scored;
                if confirmed {
                    let reason = plan
                        .cancellation
                        .reasons
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "cancellation risk above boundary".to_string());
                    cancellations.push((id, reason));
                }
            }

            for (id, reason) in &cancellations {
                if let Err(e) = store.cancel_plan(id, reason) {
                    warn!(plan = %id, "auto-cancel failed: {e:#}");
                }
            }

            store.prune_terminal(
                now,
                chrono::Duration::seconds((retention_hours * 3600.0) as i64),
            );
        }
        self.execute_all(executions).await;
    }

    /// Run a full evaluation and apply Hold/Expire in place. An Execute
    /// action is returned for the caller to run outside the store lock.
    fn apply_evaluation(
        evaluator: &PlanConditionEvaluator,
        plan: &mut TradePlan,
        sd: &SymbolData,
        now: DateTime<Utc>,
    ) -> Option<PendingExecution> {
        let evaluation = evaluator.evaluate(
            plan,
            sd.price,
            now,
            sd.snapshot.as_ref(),
            sd.structure.as_ref(),
        );

        match evaluation.action {
            EvalAction::Hold => None,
            EvalAction::Expire => {
                info!(plan = %plan.id, "plan expired");
                plan.mark_terminal(PlanStatus::Expired, now);
                None
            }
            EvalAction::Execute { level } => {
                let entry = &plan.entry_levels[level];
                let (stop_loss, take_profit) = match plan.direction {
                    Direction::Long => {
                        (entry.price - entry.stop_offset, entry.price + entry.target_offset)
                    }
                    Direction::Short => {
                        (entry.price + entry.stop_offset, entry.price - entry.target_offset)
                    }
                };
                plan.triggered_level = Some(level);
                Some(PendingExecution {
                    plan_id: plan.id,
                    order: OrderRequest {
                        symbol: plan.symbol.clone(),
                        direction: plan.direction,
                        price: sd.price,
                        volume: plan.volume,
                        stop_loss,
                        take_profit,
                        plan_id: Some(plan.id),
                    },
                    entry_delta: sd
                        .snapshot
                        .as_ref()
                        .map(|s| s.delta_volume)
                        .unwrap_or(0.0),
                })
            }
        }
    }

    /// Hand triggered plans to the execution client and seed exit rules.
    async fn execute_all(&mut self, executions: Vec<PendingExecution>) {
        for pending in executions {
            let outcome = self.execution.open(&pending.order).await;
            let mut store = self.store.write().await;
            let Some(plan) = store.get_mut(&pending.plan_id) else { continue };
            match outcome {
                Ok(fill) => {
                    info!(
                        plan = %pending.plan_id,
                        ticket = fill.ticket,
                        price = fill.price,
                        "plan triggered"
                    );
                    plan.mark_terminal(PlanStatus::Triggered, Utc::now());
                    self.exits.register(ExitRule::new(
                        fill.ticket,
                        &fill.symbol,
                        fill.direction,
                        pending.entry_delta,
                    ));
                }
                Err(e) => {
                    error!(plan = %pending.plan_id, "execution failed: {e:#}");
                    plan.mark_terminal(PlanStatus::Failed, Utc::now());
                }
            }
        }
    }

    /// Drive the exit state machine for every open position.
    async fn check_exits(&mut self, data: &HashMap<String, SymbolData>) {
        for position in self.execution.open_positions() {
            let Some(sd) = data.get(&position.symbol) else { continue };
            let min_distance = self.execution.min_stop_distance(&position.symbol);
            let decision =
                self.exits
                    .check(&position, sd.price, sd.snapshot.as_ref(), min_distance);

            match decision {
                ExitDecision::Hold => {}
                ExitDecision::ModifyStop { new_stop } => {
                    match self.execution.modify_stop(position.ticket, new_stop).await {
                        Ok(result) => {
                            debug!(ticket = position.ticket, new_stop, ?result, "stop update");
                        }
                        Err(e) => {
                            error!(ticket = position.ticket, "stop update failed: {e:#}");
                        }
                    }
                }
                ExitDecision::ForceClose { reason } => {
                    info!(ticket = position.ticket, reason, "force close");
                    match self
                        .execution
                        .close(position.ticket, sd.price, PositionStatus::ClosedFlip)
                        .await
                    {
                        Ok(closed) => {
                            info!(ticket = closed.ticket, pnl = closed.pnl, "position closed");
                            self.exits.remove(position.ticket);
                        }
                        Err(e) => {
                            error!(ticket = position.ticket, "close failed: {e:#}");
                        }
                    }
                }
            }
        }
    }

    /// Fetch price, bars and order flow for each symbol once per pass.
    /// Per-symbol failures degrade that symbol to "no update" without
    /// stalling the others.
    async fn fetch_all(&mut self, symbols: &[String]) -> HashMap<String, SymbolData> {
        let (tf, bars_limit, trades_limit, window) = {
            let cfg = self.config.read().await;
            (
                cfg.bars_timeframe,
                cfg.bars_limit,
                cfg.trades_limit,
                cfg.flow_window,
            )
        };

        let mut out = HashMap::new();
        for symbol in symbols {
            let price = match self.feed.current_price(symbol).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(symbol = %symbol, "price fetch failed: {e}");
                    continue;
                }
            };

            let bars = match self.feed.fetch_bars(symbol, tf, bars_limit).await {
                Ok(b) => Some(b),
                Err(e) => {
                    debug!(symbol = %symbol, "bars fetch: {e}");
                    None
                }
            };

            let snapshot = self
                .refresh_snapshot(symbol, bars.as_ref(), trades_limit, window)
                .await;
            let structure = bars.as_ref().map(|b| self.structure.analyze(b));

            out.insert(
                symbol.clone(),
                SymbolData {
                    price,
                    snapshot,
                    structure,
                },
            );
        }
        out
    }

    /// Serve the snapshot from the TTL cache, rebuilding it from fresh
    /// trades on a miss. Symbols without order-flow support yield None.
    async fn refresh_snapshot(
        &mut self,
        symbol: &str,
        bars: Option<&CandleSeries>,
        trades_limit: usize,
        window: usize,
    ) -> Option<OrderFlowSnapshot> {
        if !self.feed.supports_order_flow(symbol) {
            return None;
        }
        if let Some(cached) = self.cache.get(symbol, window) {
            return Some(cached.clone());
        }

        let trades = match self.feed.recent_trades(symbol, trades_limit).await {
            Ok(t) => t,
            Err(FeedError::Unsupported(_)) => return None,
            Err(e) => {
                warn!(symbol = %symbol, "trade fetch failed: {e}");
                return None;
            }
        };

        let cursor = self.last_trade_ts.get(symbol).copied();
        for trade in &trades {
            if matches!(cursor, Some(ts) if trade.timestamp <= ts) {
                continue;
            }
            self.flow.ingest(trade);
        }
        if let Some(last) = trades.last() {
            self.last_trade_ts
                .insert(symbol.to_string(), last.timestamp);
        }

        let bars = bars?;
        let imbalance = self.feed.book_imbalance(symbol).await.unwrap_or(0.0);
        let snapshot = self.flow.snapshot(symbol, bars, imbalance)?;
        self.cache.insert(window, snapshot.clone());
        Some(snapshot)
    }

    /// Observability: weighted-confluence readout per symbol on the slow
    /// cadence.
    fn log_confluence(&self, symbol: &str, sd: &SymbolData) {
        let Some(snap) = &sd.snapshot else { return };

        let sweep = sd
            .structure
            .as_ref()
            .map(|s| s.liquidity_sweep.is_some())
            .unwrap_or(false);
        let vwap_strength = sd
            .structure
            .as_ref()
            .map(|s| (s.vwap_deviation / 0.01).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let absorption = snap
            .strongest_zone()
            .map(|z| z.strength)
            .unwrap_or(0.0);

        let classification = self.classifier.classify(&[
            (SignalKind::Absorption, SignalValue::Strength(absorption)),
            (
                SignalKind::DeltaDivergence,
                SignalValue::Strength(snap.delta_divergence.strength),
            ),
            (SignalKind::LiquiditySweep, SignalValue::Present(sweep)),
            (
                SignalKind::CvdDivergence,
                SignalValue::Strength(snap.cvd_divergence.strength),
            ),
            (SignalKind::VwapDeviation, SignalValue::Strength(vwap_strength)),
        ]);

        if classification.meets_threshold {
            info!(
                symbol = %symbol,
                probability = format!("{:.1}", classification.probability),
                dominant = %classification
                    .dominant_pattern
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                "confluence threshold met"
            );
        } else {
            debug!(
                symbol = %symbol,
                probability = format!("{:.1}", classification.probability),
                "confluence"
            );
        }
    }
}
