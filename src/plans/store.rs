use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{Direction, PlanStatus};
use crate::plans::conditions::ConditionSet;
use crate::plans::evaluator::PlanConditionEvaluator;
use crate::plans::plan::{CancellationState, EntryLevel, ReEvalState, TradePlan};

/// The plan collection behind the scheduler's serialization point.
/// External callers (API handlers, operator tools) go through this same
/// lock; nothing mutates a plan directly.
pub type SharedPlanStore = Arc<RwLock<PlanStore>>;

/// Everything an external authoring collaborator supplies to create a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    pub symbol: String,
    pub direction: Direction,
    pub entry_levels: Vec<EntryLevel>,
    pub volume: f64,
    pub tolerance: f64,
    pub conditions: ConditionSet,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub in_zone: bool,
    pub entry_tracked: bool,
    pub entry_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReEvalStatus {
    pub last: Option<DateTime<Utc>>,
    pub count_today: u32,
    pub cooldown_remaining_secs: i64,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStatusReport {
    pub id: Uuid,
    pub symbol: String,
    pub status: PlanStatus,
    pub zone: ZoneStatus,
    pub cancellation: CancellationState,
    pub re_eval: ReEvalStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReEvalReport {
    pub action: String,
    pub recommendation: Option<String>,
    pub available: bool,
}

#[derive(Default)]
pub struct PlanStore {
    plans: HashMap<Uuid, TradePlan>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedPlanStore {
        Arc::new(RwLock::new(self))
    }

    /// Validate and register a new plan. Conditions were already validated
    /// structurally by ConditionSet; this checks the trade parameters.
    pub fn create_plan(&mut self, spec: PlanSpec) -> Result<Uuid> {
        if spec.entry_levels.is_empty() {
            bail!("plan needs at least one entry level");
        }
        for level in &spec.entry_levels {
            if !level.price.is_finite() || level.price <= 0.0 {
                bail!("invalid entry price {}", level.price);
            }
            if level.stop_offset <= 0.0 || level.target_offset <= 0.0 {
                bail!("stop and target offsets must be positive");
            }
        }
        if spec.volume <= 0.0 {
            bail!("volume must be positive");
        }
        if spec.tolerance < 0.0 {
            bail!("tolerance must be non-negative");
        }
        spec.conditions.validate().map_err(|e| anyhow!(e))?;
        let now = Utc::now();
        if matches!(spec.expires_at, Some(exp) if exp <= now) {
            bail!("expiry is in the past");
        }

        let plan = TradePlan {
            id: Uuid::new_v4(),
            symbol: spec.symbol,
            direction: spec.direction,
            entry_levels: spec.entry_levels,
            volume: spec.volume,
            tolerance: spec.tolerance,
            conditions: spec.conditions,
            status: PlanStatus::Pending,
            zone_entry_tracked: false,
            zone_entry_time: None,
            armed_level: None,
            triggered_level: None,
            cancellation: CancellationState::default(),
            re_eval: ReEvalState::default(),
            created_at: now,
            expires_at: spec.expires_at,
            terminated_at: None,
        };

        let id = plan.id;
        info!(
            plan = %id, symbol = %plan.symbol, direction = %plan.direction,
            levels = plan.entry_levels.len(),
            "plan created"
        );
        self.plans.insert(id, plan);
        Ok(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&TradePlan> {
        self.plans.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut TradePlan> {
        self.plans.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Ids of all pending plans.
    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.plans
            .values()
            .filter(|p| p.is_pending())
            .map(|p| p.id)
            .collect()
    }

    /// Ids of pending plans whose condition set includes at least one
    /// order-flow predicate (the fast-cadence population).
    pub fn order_flow_ids(&self) -> Vec<Uuid> {
        self.plans
            .values()
            .filter(|p| p.is_pending() && p.conditions.has_order_flow())
            .map(|p| p.id)
            .collect()
    }

    /// Distinct symbols across pending plans, for batched metrics fetches.
    pub fn pending_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .plans
            .values()
            .filter(|p| p.is_pending())
            .map(|p| p.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn plan_status(
        &self,
        id: &Uuid,
        current_price: Option<f64>,
        evaluator: &PlanConditionEvaluator,
        now: DateTime<Utc>,
    ) -> Option<PlanStatusReport> {
        let plan = self.plans.get(id)?;

        let in_zone = match (current_price, plan.armed_level) {
            (Some(price), Some(i)) => plan.entry_levels[i].zone_contains(plan.tolerance, price),
            (Some(price), None) => plan
                .entry_levels
                .iter()
                .any(|l| l.zone_contains(plan.tolerance, price)),
            _ => false,
        };

        let decision =
            evaluator.should_re_evaluate(plan, current_price.unwrap_or(0.0), now, false);

        Some(PlanStatusReport {
            id: plan.id,
            symbol: plan.symbol.clone(),
            status: plan.status,
            zone: ZoneStatus {
                in_zone,
                entry_tracked: plan.zone_entry_tracked,
                entry_time: plan.zone_entry_time,
            },
            cancellation: plan.cancellation.clone(),
            re_eval: ReEvalStatus {
                last: plan.re_eval.last_re_evaluation,
                count_today: plan.re_eval.count_today,
                cooldown_remaining_secs: decision.cooldown_remaining.num_seconds(),
                available: decision.available,
            },
        })
    }

    /// Operator-facing re-evaluation. Applies cooldown/cap unless forced;
    /// when it runs, refreshes the cancellation score and returns a
    /// recommendation string.
    pub fn re_evaluate(
        &mut self,
        id: &Uuid,
        force: bool,
        price: f64,
        now: DateTime<Utc>,
        evaluator: &PlanConditionEvaluator,
    ) -> Result<ReEvalReport> {
        let plan = self
            .plans
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown plan {id}"))?;

        if !plan.is_pending() {
            return Ok(ReEvalReport {
                action: "none".to_string(),
                recommendation: Some(format!("plan is {}", plan.status)),
                available: false,
            });
        }

        let decision = evaluator.should_re_evaluate(plan, price, now, force);
        if !decision.should_run {
            return Ok(ReEvalReport {
                action: "skipped".to_string(),
                recommendation: None,
                available: decision.available,
            });
        }

        evaluator.register_re_evaluation(plan, now);
        plan.cancellation = evaluator.score_cancellation(plan, price, now);
        plan.re_eval.last_eval_price = Some(price);

        let recommendation = if plan.cancellation.risk
            >= crate::plans::evaluator::CANCEL_RISK_BOUNDARY
        {
            Some("likely auto-cancel; consider cancelling or re-pricing".to_string())
        } else {
            Some("plan remains viable".to_string())
        };

        info!(
            plan = %id,
            risk = plan.cancellation.risk,
            reason = decision.reason.as_deref().unwrap_or("-"),
            "plan re-evaluated"
        );

        Ok(ReEvalReport {
            action: "re_evaluated".to_string(),
            recommendation,
            available: true,
        })
    }

    pub fn cancel_plan(&mut self, id: &Uuid, reason: &str) -> Result<()> {
        let plan = self
            .plans
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown plan {id}"))?;
        if plan.status.is_terminal() {
            bail!("plan {id} already {}", plan.status);
        }
        plan.mark_terminal(PlanStatus::Cancelled, Utc::now());
        plan.cancellation.reasons.push(reason.to_string());
        info!(plan = %id, reason, "plan cancelled");
        Ok(())
    }

    /// Drop terminal plans whose terminal transition is older than the
    /// retention window.
    pub fn prune_terminal(&mut self, now: DateTime<Utc>, retention: Duration) {
        let before = self.plans.len();
        self.plans.retain(|_, p| {
            let reference = p.terminated_at.unwrap_or(p.created_at);
            !(p.status.is_terminal() && now - reference > retention)
        });
        let pruned = before - self.plans.len();
        if pruned > 0 {
            info!(pruned, "terminal plans pruned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::conditions::Condition;
    use crate::test_helpers::make_plan_spec;

    fn store_with_plan() -> (PlanStore, Uuid) {
        let mut store = PlanStore::new();
        let id = store
            .create_plan(make_plan_spec("BTC-USD", Direction::Long, &[50000.0]))
            .unwrap();
        (store, id)
    }

    #[test]
    fn create_validates_inputs() {
        let mut store = PlanStore::new();

        let mut spec = make_plan_spec("BTC-USD", Direction::Long, &[50000.0]);
        spec.volume = 0.0;
        assert!(store.create_plan(spec).is_err());

        let mut spec = make_plan_spec("BTC-USD", Direction::Long, &[50000.0]);
        spec.entry_levels.clear();
        assert!(store.create_plan(spec).is_err());

        let mut spec = make_plan_spec("BTC-USD", Direction::Long, &[50000.0]);
        spec.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(store.create_plan(spec).is_err());

        let mut spec = make_plan_spec("BTC-USD", Direction::Long, &[50000.0]);
        spec.conditions =
            ConditionSet::new(vec![Condition::CvdRising]).unwrap();
        assert!(store.create_plan(spec).is_ok());
    }

    #[test]
    fn status_report_reflects_zone_and_reeval() {
        let (store, id) = store_with_plan();
        let ev = PlanConditionEvaluator::default();
        let report = store
            .plan_status(&id, Some(50050.0), &ev, Utc::now())
            .unwrap();
        assert_eq!(report.status, PlanStatus::Pending);
        assert!(report.zone.in_zone);
        assert!(!report.zone.entry_tracked);
        assert!(report.re_eval.available);
    }

    #[test]
    fn cancel_is_terminal_and_sticky() {
        let (mut store, id) = store_with_plan();
        store.cancel_plan(&id, "operator request").unwrap();
        assert_eq!(store.get(&id).unwrap().status, PlanStatus::Cancelled);
        assert!(store.cancel_plan(&id, "again").is_err());
    }

    #[test]
    fn re_evaluate_respects_gating() {
        let (mut store, id) = store_with_plan();
        let ev = PlanConditionEvaluator::default();
        let now = Utc::now();

        // Large price move: runs
        {
            let plan = store.get_mut(&id).unwrap();
            plan.re_eval.last_eval_price = Some(50000.0);
        }
        let report = store.re_evaluate(&id, false, 51000.0, now, &ev).unwrap();
        assert_eq!(report.action, "re_evaluated");

        // Immediately again: cooldown blocks
        let report = store
            .re_evaluate(&id, false, 52000.0, now + Duration::minutes(1), &ev)
            .unwrap();
        assert_eq!(report.action, "skipped");
        assert!(!report.available);

        // Forced: runs anyway
        let report = store
            .re_evaluate(&id, true, 52000.0, now + Duration::minutes(1), &ev)
            .unwrap();
        assert_eq!(report.action, "re_evaluated");
    }

    #[test]
    fn prune_drops_aged_terminal_plans() {
        let (mut store, id) = store_with_plan();
        let keep = store
            .create_plan(make_plan_spec("ETH-USD", Direction::Short, &[3000.0]))
            .unwrap();
        store.cancel_plan(&id, "operator request").unwrap();

        // Inside retention: still queryable
        store.prune_terminal(Utc::now(), Duration::hours(24));
        assert!(store.get(&id).is_some());

        // Past retention: dropped, pending plans untouched
        store.prune_terminal(Utc::now() + Duration::hours(25), Duration::hours(24));
        assert!(store.get(&id).is_none());
        assert!(store.get(&keep).is_some());
    }

    #[test]
    fn pending_filters_and_symbols() {
        let mut store = PlanStore::new();
        let a = store
            .create_plan(make_plan_spec("BTC-USD", Direction::Long, &[50000.0]))
            .unwrap();
        let mut spec = make_plan_spec("ETH-USD", Direction::Short, &[3000.0]);
        spec.conditions = ConditionSet::new(vec![Condition::DeltaNegative]).unwrap();
        let b = store.create_plan(spec).unwrap();

        assert_eq!(store.pending_ids().len(), 2);
        assert_eq!(store.order_flow_ids(), vec![b]);
        assert_eq!(store.pending_symbols(), vec!["BTC-USD", "ETH-USD"]);

        store.cancel_plan(&a, "test").unwrap();
        assert_eq!(store.pending_ids().len(), 1);
    }
}
