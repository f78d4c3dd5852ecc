use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::flow::OrderFlowSnapshot;
use crate::models::CancellationPriority;
use crate::plans::conditions::{Condition, ConditionOutcome, ConditionSet};
use crate::plans::plan::TradePlan;
use crate::structure::StructureSnapshot;

/// Risk score at which a plan becomes a likely auto-cancel.
pub const CANCEL_RISK_BOUNDARY: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Default entry-distance threshold as a fraction of price.
    pub distance_threshold_pct: f64,
    /// Per-symbol overrides for the distance threshold (tighter for FX-style
    /// symbols, wider for volatile crypto pairs).
    pub distance_overrides: HashMap<String, f64>,
    /// Plan age ceiling in hours for the age component of the risk score.
    pub max_age_hours: f64,
    /// Price-move fraction that triggers a re-evaluation.
    pub re_eval_price_move_pct: f64,
    /// Elapsed time that triggers a re-evaluation.
    pub re_eval_interval_hours: f64,
    pub re_eval_cooldown_mins: i64,
    pub re_eval_daily_cap: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            distance_threshold_pct: 0.005,
            distance_overrides: HashMap::new(),
            max_age_hours: 24.0,
            re_eval_price_move_pct: 0.002,
            re_eval_interval_hours: 4.0,
            re_eval_cooldown_mins: 60,
            re_eval_daily_cap: 6,
        }
    }
}

/// What the scheduler should do with the plan after this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalAction {
    /// Nothing fired; plan stays pending.
    Hold,
    /// All conditions met inside the armed level's zone.
    Execute { level: usize },
    /// Past its expiry timestamp.
    Expire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub action: EvalAction,
    pub outcomes: Vec<(Condition, ConditionOutcome)>,
    pub in_zone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReEvalDecision {
    pub should_run: bool,
    pub reason: Option<String>,
    /// Whether a (non-forced) re-evaluation is currently permitted.
    pub available: bool,
    pub cooldown_remaining: Duration,
}

/// Matches a plan's declared conditions against the current price and
/// snapshot pair, and owns zone arming, cancellation-risk scoring and
/// re-evaluation gating.
pub struct PlanConditionEvaluator {
    config: EvaluatorConfig,
}

impl PlanConditionEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Full evaluation. Mutates zone-tracking state on the plan; the caller
    /// applies the returned action (execution, expiry) itself.
    pub fn evaluate(
        &self,
        plan: &mut TradePlan,
        price: f64,
        now: DateTime<Utc>,
        flow: Option<&OrderFlowSnapshot>,
        structure: Option<&StructureSnapshot>,
    ) -> Evaluation {
        if !plan.is_pending() {
            // Terminal states are sticky — nothing re-arms
            return Evaluation {
                action: EvalAction::Hold,
                outcomes: Vec::new(),
                in_zone: false,
            };
        }

        if plan.is_expired_at(now) {
            return Evaluation {
                action: EvalAction::Expire,
                outcomes: Vec::new(),
                in_zone: false,
            };
        }

        let outcomes: Vec<(Condition, ConditionOutcome)> = plan
            .conditions
            .iter()
            .map(|c| (*c, ConditionSet::evaluate_one(c, price, flow, structure)))
            .collect();
        let all_met = outcomes.iter().all(|(_, o)| o.is_met());

        // Zone arming: the first level (array order) whose zone contains the
        // price wins and is latched; later levels are never considered again.
        let armed = match plan.armed_level {
            Some(i) => Some(i),
            None => {
                let hit = plan
                    .entry_levels
                    .iter()
                    .position(|l| l.zone_contains(plan.tolerance, price));
                if let Some(i) = hit {
                    plan.armed_level = Some(i);
                    if !plan.zone_entry_tracked {
                        plan.zone_entry_tracked = true;
                        plan.zone_entry_time = Some(now);
                        debug!(
                            plan = %plan.id,
                            level = i,
                            price,
                            "tolerance zone entered"
                        );
                    }
                }
                hit
            }
        };

        let in_zone = match armed {
            Some(i) => plan.entry_levels[i].zone_contains(plan.tolerance, price),
            None => false,
        };

        plan.re_eval.last_eval_price = Some(price);

        let action = match (armed, in_zone, all_met) {
            (Some(i), true, true) => EvalAction::Execute { level: i },
            _ => EvalAction::Hold,
        };

        Evaluation {
            action,
            outcomes,
            in_zone,
        }
    }

    /// Cheap pre-check over the order-flow predicates only, used by the fast
    /// cadence. True only when the plan has order-flow conditions and every
    /// one of them is currently met.
    pub fn check_order_flow_only(&self, plan: &TradePlan, flow: Option<&OrderFlowSnapshot>) -> bool {
        if !plan.conditions.has_order_flow() {
            return false;
        }
        plan.conditions
            .order_flow_conditions()
            .all(|c| ConditionSet::evaluate_one(c, 0.0, flow, None).is_met())
    }

    /// Score the likelihood the plan should be auto-cancelled: a distance
    /// component (price far from every entry) and an age component (old and
    /// far), each normalized against its ceiling.
    pub fn score_cancellation(
        &self,
        plan: &TradePlan,
        price: f64,
        now: DateTime<Utc>,
    ) -> crate::plans::plan::CancellationState {
        let threshold = self
            .config
            .distance_overrides
            .get(&plan.symbol)
            .copied()
            .unwrap_or(self.config.distance_threshold_pct);

        let mut reasons = Vec::new();

        let distance_pct = plan
            .nearest_level(price)
            .map(|l| (price - l.price).abs() / price.max(f64::EPSILON))
            .unwrap_or(0.0);

        // Distance saturates at 2x the symbol threshold
        let distance_score = (distance_pct / (threshold * 2.0)).clamp(0.0, 1.0);
        if distance_pct > threshold {
            reasons.push(format!(
                "price {:.2}% from entry (threshold {:.2}%)",
                distance_pct * 100.0,
                threshold * 100.0
            ));
        }

        let age_frac = (plan.age_hours(now) / self.config.max_age_hours).clamp(0.0, 1.0);
        // Age alone is not a cancel reason; it amplifies distance
        let age_score = age_frac * distance_score.max(0.25);
        if age_frac >= 1.0 {
            reasons.push(format!(
                "plan older than {:.0}h",
                self.config.max_age_hours
            ));
        }

        let risk = (0.7 * distance_score + 0.3 * age_score).clamp(0.0, 1.0);

        let priority = if risk >= CANCEL_RISK_BOUNDARY {
            CancellationPriority::High
        } else if risk >= 0.5 {
            CancellationPriority::Medium
        } else {
            CancellationPriority::Low
        };

        crate::plans::plan::CancellationState {
            risk,
            reasons,
            priority,
        }
    }

    /// Decide whether a re-evaluation should run now. `force` bypasses both
    /// the cooldown and the daily cap (operator-initiated path).
    pub fn should_re_evaluate(
        &self,
        plan: &TradePlan,
        price: f64,
        now: DateTime<Utc>,
        force: bool,
    ) -> ReEvalDecision {
        let cooldown = Duration::minutes(self.config.re_eval_cooldown_mins);

        let cooldown_remaining = match plan.re_eval.last_re_evaluation {
            Some(last) => (last + cooldown - now).max(Duration::zero()),
            None => Duration::zero(),
        };

        let count_today = if plan.re_eval.count_date == Some(now.date_naive()) {
            plan.re_eval.count_today
        } else {
            0
        };

        let available =
            cooldown_remaining == Duration::zero() && count_today < self.config.re_eval_daily_cap;

        if force {
            return ReEvalDecision {
                should_run: true,
                reason: Some("forced".to_string()),
                available,
                cooldown_remaining,
            };
        }

        if !available {
            return ReEvalDecision {
                should_run: false,
                reason: None,
                available,
                cooldown_remaining,
            };
        }

        // Trigger 1: price moved beyond the threshold since the last look
        if let Some(last_price) = plan.re_eval.last_eval_price {
            let moved = (price - last_price).abs() / last_price.max(f64::EPSILON);
            if moved > self.config.re_eval_price_move_pct {
                return ReEvalDecision {
                    should_run: true,
                    reason: Some(format!("price moved {:.3}%", moved * 100.0)),
                    available,
                    cooldown_remaining,
                };
            }
        }

        // Trigger 2: too long since the last re-evaluation
        let stale_after = Duration::seconds((self.config.re_eval_interval_hours * 3600.0) as i64);
        let reference = plan.re_eval.last_re_evaluation.unwrap_or(plan.created_at);
        if now - reference > stale_after {
            return ReEvalDecision {
                should_run: true,
                reason: Some(format!(
                    "no re-evaluation for {:.1}h",
                    (now - reference).num_seconds() as f64 / 3600.0
                )),
                available,
                cooldown_remaining,
            };
        }

        ReEvalDecision {
            should_run: false,
            reason: None,
            available,
            cooldown_remaining,
        }
    }

    /// Record that a re-evaluation ran, updating cooldown and daily count.
    pub fn register_re_evaluation(&self, plan: &mut TradePlan, now: DateTime<Utc>) {
        let today = now.date_naive();
        if plan.re_eval.count_date != Some(today) {
            plan.re_eval.count_date = Some(today);
            plan.re_eval.count_today = 0;
        }
        plan.re_eval.count_today += 1;
        plan.re_eval.last_re_evaluation = Some(now);
    }
}

impl Default for PlanConditionEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}
