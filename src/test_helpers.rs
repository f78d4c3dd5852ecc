use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::flow::{Divergence, OrderFlowSnapshot};
use crate::models::{AggTrade, Candle, CandleSeries, Direction, PlanStatus, SlopeDirection, TradeSide};
use crate::plans::{
    CancellationState, Condition, ConditionSet, EntryLevel, PlanSpec, ReEvalState, TradePlan,
};

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();
    CandleSeries::new(candles)
}

/// n flat-bodied candles whose close walks from `start` in `step` increments.
pub fn make_candle_vec(n: usize, start: f64, step: f64) -> Vec<Candle> {
    let base = base_time();
    (0..n)
        .map(|i| {
            let close = start + i as f64 * step;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open: close - step,
                high: close + step.abs() + 0.5,
                low: close - step.abs() - 0.5,
                close,
                volume: 100.0,
            }
        })
        .collect()
}

/// Aggregated trades from signed quantities: positive is aggressive buying,
/// negative aggressive selling. 1s apart, default symbol.
pub fn make_trades(quantities: &[f64]) -> Vec<AggTrade> {
    make_trades_for("BTC-USD", quantities)
}

pub fn make_trades_for(symbol: &str, quantities: &[f64]) -> Vec<AggTrade> {
    let base = base_time();
    quantities
        .iter()
        .enumerate()
        .map(|(i, &q)| AggTrade {
            symbol: symbol.to_string(),
            side: if q >= 0.0 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            quantity: q.abs(),
            price: 50000.0,
            timestamp: base + Duration::seconds(i as i64),
        })
        .collect()
}

/// A neutral snapshot: zero delta, flat CVD, no divergences or zones.
pub fn make_snapshot(symbol: &str) -> OrderFlowSnapshot {
    OrderFlowSnapshot {
        symbol: symbol.to_string(),
        delta_volume: 0.0,
        cvd: 0.0,
        cvd_slope: 0.0,
        cvd_direction: SlopeDirection::Flat,
        cvd_divergence: Divergence::none(),
        delta_divergence: Divergence::none(),
        absorption_zones: Vec::new(),
        pressure_ratio: 1.0,
        produced_at: base_time(),
    }
}

fn levels_from(prices: &[f64]) -> Vec<EntryLevel> {
    prices
        .iter()
        .map(|&price| EntryLevel {
            price,
            weight: None,
            stop_offset: price * 0.01,
            target_offset: price * 0.02,
        })
        .collect()
}

/// A pending plan with no conditions.
pub fn make_plan(symbol: &str, direction: Direction, prices: &[f64], tolerance: f64) -> TradePlan {
    make_plan_with_conditions(symbol, direction, prices, tolerance, Vec::new())
}

pub fn make_plan_with_conditions(
    symbol: &str,
    direction: Direction,
    prices: &[f64],
    tolerance: f64,
    conditions: Vec<Condition>,
) -> TradePlan {
    TradePlan {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        direction,
        entry_levels: levels_from(prices),
        volume: 1.0,
        tolerance,
        conditions: ConditionSet::new(conditions).unwrap(),
        status: PlanStatus::Pending,
        zone_entry_tracked: false,
        zone_entry_time: None,
        armed_level: None,
        triggered_level: None,
        cancellation: CancellationState::default(),
        re_eval: ReEvalState::default(),
        created_at: Utc::now(),
        expires_at: None,
        terminated_at: None,
    }
}

/// A creation spec with a tolerance of 0.4% of the first entry and no
/// conditions.
pub fn make_plan_spec(symbol: &str, direction: Direction, prices: &[f64]) -> PlanSpec {
    PlanSpec {
        symbol: symbol.to_string(),
        direction,
        entry_levels: levels_from(prices),
        volume: 1.0,
        tolerance: prices.first().copied().unwrap_or(100.0) * 0.004,
        conditions: ConditionSet::default(),
        expires_at: None,
    }
}
