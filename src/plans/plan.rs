use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CancellationPriority, Direction, PlanStatus};
use crate::plans::conditions::ConditionSet;

/// One candidate entry for a plan. `weight` is informational only — the
/// plan always executes its full declared volume at the first level whose
/// tolerance zone is entered, using that level's offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryLevel {
    pub price: f64,
    pub weight: Option<f64>,
    /// Stop distance from the entry price, in price units.
    pub stop_offset: f64,
    /// Target distance from the entry price, in price units.
    pub target_offset: f64,
}

impl EntryLevel {
    /// Tolerance zone for this level: the band [entry-tol, entry+tol].
    /// Tolerance is a half-width, so a 200-point tolerance on a 50000 entry
    /// makes the zone [49800, 50200].
    pub fn zone(&self, tolerance: f64) -> (f64, f64) {
        (self.price - tolerance, self.price + tolerance)
    }

    pub fn zone_contains(&self, tolerance: f64, price: f64) -> bool {
        let (lo, hi) = self.zone(tolerance);
        price >= lo && price <= hi
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancellationState {
    /// Scored likelihood of auto-cancel in [0,1]; >= 0.8 means likely.
    pub risk: f64,
    pub reasons: Vec<String>,
    pub priority: CancellationPriority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReEvalState {
    pub last_re_evaluation: Option<DateTime<Utc>>,
    pub count_today: u32,
    pub count_date: Option<chrono::NaiveDate>,
    /// Price at the time of the last (re-)evaluation, for the movement trigger.
    pub last_eval_price: Option<f64>,
}

/// A standing conditional order.
///
/// Mutated exclusively through the plan store under the scheduler's
/// serialization point; external callers never hold a plan directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_levels: Vec<EntryLevel>,
    pub volume: f64,
    /// Tolerance-zone half-width in price units.
    pub tolerance: f64,
    pub conditions: ConditionSet,
    pub status: PlanStatus,

    // Zone tracking — edge-triggered, sticky on terminal states
    pub zone_entry_tracked: bool,
    pub zone_entry_time: Option<DateTime<Utc>>,
    /// Index of the level whose zone was entered first; latched so other
    /// levels are never considered again for this plan.
    pub armed_level: Option<usize>,
    /// Index into entry_levels of the level that fired, once triggered.
    pub triggered_level: Option<usize>,

    pub cancellation: CancellationState,
    pub re_eval: ReEvalState,

    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// When the plan left Pending; retention pruning counts from here.
    pub terminated_at: Option<DateTime<Utc>>,
}

impl TradePlan {
    pub fn is_pending(&self) -> bool {
        self.status == PlanStatus::Pending
    }

    pub fn mark_terminal(&mut self, status: PlanStatus, now: DateTime<Utc>) {
        self.status = status;
        self.terminated_at = Some(now);
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 3600.0
    }

    /// Entry level closest to the given price.
    pub fn nearest_level(&self, price: f64) -> Option<&EntryLevel> {
        self.entry_levels.iter().min_by(|a, b| {
            (a.price - price)
                .abs()
                .partial_cmp(&(b.price - price).abs())
                .unwrap()
        })
    }
}
