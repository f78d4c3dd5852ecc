use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::flow::OrderFlowSnapshot;
use crate::models::Direction;
use crate::trading::execution::Position;

pub const ENTRY_DELTA_KEY: &str = "entry_delta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Fraction of |entry delta| that reversed live delta must reach before
    /// a flip exit fires.
    pub flip_delta_fraction: f64,
    /// Favorable move (fraction of entry) that arms the breakeven stop.
    pub breakeven_trigger_pct: f64,
    /// Offset past entry for the breakeven stop (covers fees), fraction of
    /// entry.
    pub breakeven_offset_pct: f64,
    /// Trailing-stop distance behind price, fraction of price.
    pub trailing_distance_pct: f64,
    pub trailing_enabled: bool,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            flip_delta_fraction: 0.8,
            breakeven_trigger_pct: 0.004,
            breakeven_offset_pct: 0.0005,
            trailing_distance_pct: 0.005,
            trailing_enabled: true,
        }
    }
}

/// Adaptive exit state for one open ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRule {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub breakeven_triggered: bool,
    pub trailing_enabled: bool,
    pub trailing_active: bool,
    pub last_trailing_sl: Option<f64>,
    /// Numeric context captured at entry; `entry_delta` drives the flip exit.
    pub metadata: HashMap<String, f64>,
}

impl ExitRule {
    pub fn new(ticket: u64, symbol: &str, direction: Direction, entry_delta: f64) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(ENTRY_DELTA_KEY.to_string(), entry_delta);
        Self {
            ticket,
            symbol: symbol.to_string(),
            direction,
            breakeven_triggered: false,
            trailing_enabled: true,
            trailing_active: false,
            last_trailing_sl: None,
            metadata,
        }
    }

    pub fn entry_delta(&self) -> f64 {
        self.metadata.get(ENTRY_DELTA_KEY).copied().unwrap_or(0.0)
    }
}

/// What the scheduler should do with the position after a check.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    Hold,
    /// Move the stop to `new_stop` (already validated as a tightening).
    ModifyStop { new_stop: f64 },
    /// Force-close at market.
    ForceClose { reason: String },
}

/// Drives breakeven, trailing and flip exits for open positions. Pure
/// decision logic; the scheduler applies decisions through the
/// ExecutionClient and removes rules when positions close.
pub struct ExitStateMachine {
    config: ExitConfig,
    rules: HashMap<u64, ExitRule>,
}

impl ExitStateMachine {
    pub fn new(config: ExitConfig) -> Self {
        Self {
            config,
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, mut rule: ExitRule) {
        rule.trailing_enabled = self.config.trailing_enabled;
        debug!(
            ticket = rule.ticket,
            symbol = %rule.symbol,
            entry_delta = rule.entry_delta(),
            "exit rule registered"
        );
        self.rules.insert(rule.ticket, rule);
    }

    pub fn remove(&mut self, ticket: u64) -> Option<ExitRule> {
        self.rules.remove(&ticket)
    }

    pub fn rule(&self, ticket: u64) -> Option<&ExitRule> {
        self.rules.get(&ticket)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// One exit pass for a position: flip exit first, then breakeven, then
    /// trailing. `min_stop_distance` is the venue's minimum modification
    /// distance; proposals below it are treated as benign no-ops.
    pub fn check(
        &mut self,
        position: &Position,
        price: f64,
        snapshot: Option<&OrderFlowSnapshot>,
        min_stop_distance: f64,
    ) -> ExitDecision {
        let Some(rule) = self.rules.get_mut(&position.ticket) else {
            return ExitDecision::Hold;
        };

        // 1. Flip exit: order flow reversed hard against the position
        if let Some(snap) = snapshot {
            let entry_delta = rule.entry_delta();
            let live = snap.delta_volume;
            if entry_delta != 0.0
                && live.signum() != entry_delta.signum()
                && live.abs() >= self.config.flip_delta_fraction * entry_delta.abs()
            {
                info!(
                    ticket = position.ticket,
                    entry_delta,
                    live_delta = live,
                    "delta flip exit"
                );
                return ExitDecision::ForceClose {
                    reason: format!(
                        "delta flipped: entry {entry_delta:.1}, live {live:.1}"
                    ),
                };
            }
        }

        let entry = position.entry_price;
        let favorable = match position.direction {
            Direction::Long => (price - entry) / entry,
            Direction::Short => (entry - price) / entry,
        };

        // 2. Breakeven: arm once, even when the venue rejects the tiny move
        if !rule.breakeven_triggered && favorable >= self.config.breakeven_trigger_pct {
            rule.breakeven_triggered = true;
            let offset = entry * self.config.breakeven_offset_pct;
            let new_stop = match position.direction {
                Direction::Long => entry + offset,
                Direction::Short => entry - offset,
            };
            if (new_stop - position.stop_loss).abs() < min_stop_distance {
                debug!(
                    ticket = position.ticket,
                    new_stop, "breakeven within min distance, marked without moving"
                );
                return ExitDecision::Hold;
            }
            // Never loosen, even at breakeven
            let tightens = match position.direction {
                Direction::Long => new_stop > position.stop_loss,
                Direction::Short => new_stop < position.stop_loss,
            };
            if tightens {
                return ExitDecision::ModifyStop { new_stop };
            }
            return ExitDecision::Hold;
        }

        // 3. Trailing: monotonic, only after breakeven has armed
        if rule.trailing_enabled && rule.breakeven_triggered {
            let candidate = match position.direction {
                Direction::Long => price * (1.0 - self.config.trailing_distance_pct),
                Direction::Short => price * (1.0 + self.config.trailing_distance_pct),
            };
            let floor = match position.direction {
                Direction::Long => rule
                    .last_trailing_sl
                    .unwrap_or(position.stop_loss)
                    .max(position.stop_loss),
                Direction::Short => rule
                    .last_trailing_sl
                    .unwrap_or(position.stop_loss)
                    .min(position.stop_loss),
            };
            let tightens = match position.direction {
                Direction::Long => candidate > floor,
                Direction::Short => candidate < floor,
            };
            if tightens && (candidate - position.stop_loss).abs() >= min_stop_distance {
                rule.trailing_active = true;
                rule.last_trailing_sl = Some(candidate);
                return ExitDecision::ModifyStop {
                    new_stop: candidate,
                };
            }
        }

        ExitDecision::Hold
    }
}

impl Default for ExitStateMachine {
    fn default() -> Self {
        Self::new(ExitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionStatus;
    use crate::test_helpers::make_snapshot;
    use chrono::Utc;

    fn open_position(direction: Direction, entry: f64, stop: f64) -> Position {
        Position {
            ticket: 1,
            symbol: "BTC-USD".to_string(),
            direction,
            entry_price: entry,
            volume: 1.0,
            stop_loss: stop,
            take_profit: entry * 1.02,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            exit_price: None,
            pnl: 0.0,
        }
    }

    fn machine() -> ExitStateMachine {
        let mut m = ExitStateMachine::default();
        m.register(ExitRule::new(1, "BTC-USD", Direction::Long, 500.0));
        m
    }

    #[test]
    fn flip_exit_requires_sign_flip_and_magnitude() {
        // Entry delta +500: live -450 fires (>= 80%), live -300 does not
        let mut m = machine();
        let pos = open_position(Direction::Long, 50000.0, 49500.0);

        let mut snap = make_snapshot("BTC-USD");
        snap.delta_volume = -300.0;
        assert_eq!(m.check(&pos, 50000.0, Some(&snap), 1.0), ExitDecision::Hold);

        snap.delta_volume = -450.0;
        assert!(matches!(
            m.check(&pos, 50000.0, Some(&snap), 1.0),
            ExitDecision::ForceClose { .. }
        ));
    }

    #[test]
    fn flip_exit_mirrors_for_shorts() {
        // Entry delta -40: live +33 fires (>= 80% of 40), +31 does not
        let mut m = ExitStateMachine::default();
        m.register(ExitRule::new(1, "BTC-USD", Direction::Short, -40.0));
        let pos = open_position(Direction::Short, 50000.0, 50500.0);

        let mut snap = make_snapshot("BTC-USD");
        snap.delta_volume = 31.0;
        assert_eq!(m.check(&pos, 50000.0, Some(&snap), 1.0), ExitDecision::Hold);

        snap.delta_volume = 33.0;
        assert!(matches!(
            m.check(&pos, 50000.0, Some(&snap), 1.0),
            ExitDecision::ForceClose { .. }
        ));
    }

    #[test]
    fn same_sign_delta_never_flips() {
        let mut m = machine();
        let pos = open_position(Direction::Long, 50000.0, 49500.0);
        let mut snap = make_snapshot("BTC-USD");
        snap.delta_volume = 600.0;
        assert_eq!(m.check(&pos, 50000.0, Some(&snap), 1.0), ExitDecision::Hold);
    }

    #[test]
    fn breakeven_moves_stop_after_favorable_move() {
        let mut m = machine();
        let pos = open_position(Direction::Long, 50000.0, 49500.0);

        // 0.2% favorable: below the 0.4% trigger
        assert_eq!(m.check(&pos, 50100.0, None, 1.0), ExitDecision::Hold);
        assert!(!m.rule(1).unwrap().breakeven_triggered);

        // 0.5% favorable: stop moves to entry + offset
        match m.check(&pos, 50250.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => {
                assert!(new_stop > 50000.0);
                assert!(new_stop < 50100.0);
            }
            other => panic!("expected stop move, got {other:?}"),
        }
        assert!(m.rule(1).unwrap().breakeven_triggered);
    }

    #[test]
    fn breakeven_within_min_distance_marks_without_moving() {
        let mut m = machine();
        // Stop already at the would-be breakeven level
        let pos = open_position(Direction::Long, 50000.0, 50025.0);
        let decision = m.check(&pos, 50250.0, None, 50.0);
        assert_eq!(decision, ExitDecision::Hold);
        // Marked triggered despite the no-op — will not re-fire
        assert!(m.rule(1).unwrap().breakeven_triggered);
        assert_eq!(m.check(&pos, 50260.0, None, 50.0), ExitDecision::Hold);
    }

    #[test]
    fn trailing_stop_is_monotonic_for_longs() {
        let mut m = machine();
        let mut pos = open_position(Direction::Long, 50000.0, 49500.0);

        // Arm breakeven first
        match m.check(&pos, 50250.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => pos.stop_loss = new_stop,
            other => panic!("expected breakeven move, got {other:?}"),
        }

        // Price runs: trailing follows up
        let first = match m.check(&pos, 51000.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => {
                pos.stop_loss = new_stop;
                new_stop
            }
            other => panic!("expected trailing move, got {other:?}"),
        };
        assert!(first > 50000.0);

        // Price pulls back: a lower candidate is rejected
        assert_eq!(m.check(&pos, 50400.0, None, 1.0), ExitDecision::Hold);
        assert!((pos.stop_loss - first).abs() < 1e-9);

        // New high: stop ratchets again
        match m.check(&pos, 51500.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => assert!(new_stop > first),
            other => panic!("expected trailing move, got {other:?}"),
        }
    }

    #[test]
    fn trailing_stop_is_monotonic_for_shorts() {
        let mut m = ExitStateMachine::default();
        m.register(ExitRule::new(1, "BTC-USD", Direction::Short, -500.0));
        let mut pos = open_position(Direction::Short, 50000.0, 50500.0);

        match m.check(&pos, 49750.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => {
                assert!(new_stop < 50000.0);
                pos.stop_loss = new_stop;
            }
            other => panic!("expected breakeven move, got {other:?}"),
        }

        let first = match m.check(&pos, 49000.0, None, 1.0) {
            ExitDecision::ModifyStop { new_stop } => {
                pos.stop_loss = new_stop;
                new_stop
            }
            other => panic!("expected trailing move, got {other:?}"),
        };

        // Bounce: a higher (looser) candidate is rejected
        assert_eq!(m.check(&pos, 49600.0, None, 1.0), ExitDecision::Hold);
        assert!((pos.stop_loss - first).abs() < 1e-9);
    }

    #[test]
    fn rule_removed_on_close() {
        let mut m = machine();
        assert_eq!(m.len(), 1);
        let rule = m.remove(1).unwrap();
        assert_eq!(rule.ticket, 1);
        assert!(m.is_empty());
        // No rule: checks degrade to Hold
        let pos = open_position(Direction::Long, 50000.0, 49500.0);
        assert_eq!(m.check(&pos, 51000.0, None, 1.0), ExitDecision::Hold);
    }
}
