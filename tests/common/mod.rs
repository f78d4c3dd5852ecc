use chrono::{DateTime, Duration, Utc};

use orderflow_engine::config::Config;
use orderflow_engine::models::{AggTrade, Candle, Direction, TradeSide};
use orderflow_engine::plans::{ConditionSet, EntryLevel, PlanSpec};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-17T07:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Flat 1m candles closing at `price`, oldest first.
pub fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
    let base = base_time();
    (0..n)
        .map(|i| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: price,
            high: price + 5.0,
            low: price - 5.0,
            close: price,
            volume: 200.0,
        })
        .collect()
}

/// Aggregated trades from signed quantities, 1s apart starting at
/// base_time + offset_secs. Positive is aggressive buying.
pub fn trades_at(symbol: &str, offset_secs: i64, quantities: &[f64]) -> Vec<AggTrade> {
    let base = base_time() + Duration::seconds(offset_secs);
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

pub fn plan_spec(symbol: &str, direction: Direction, entry: f64, tolerance: f64) -> PlanSpec {
    PlanSpec {
        symbol: symbol.to_string(),
        direction,
        entry_levels: vec![EntryLevel {
            price: entry,
            weight: None,
            stop_offset: entry * 0.01,
            target_offset: entry * 0.02,
        }],
        volume: 1.0,
        tolerance,
        conditions: ConditionSet::default(),
        expires_at: None,
    }
}

/// Config tuned for tests: tiny windows, no absorption noise, 1s cache TTL.
pub fn test_config() -> Config {
    let mut cfg = Config::from_env();
    cfg.flow_window = 10;
    cfg.cache_ttl_secs = 1;
    cfg.absorption_volume_threshold = 1e9;
    cfg.fee_rate = 0.0;
    cfg.slippage_rate = 0.0;
    cfg.log_level = "error".to_string();
    cfg
}
