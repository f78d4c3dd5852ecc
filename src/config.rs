use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::flow::ClassifierWeights;
use crate::models::Timeframe;
use crate::plans::EvaluatorConfig;
use crate::trading::ExitConfig;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Demo symbol for the replay binary
    pub symbol: String,

    // Scheduler cadences
    pub fast_interval_secs: u64,
    pub slow_interval_secs: u64,

    // Metrics fetch
    pub bars_timeframe: Timeframe,
    pub bars_limit: usize,
    pub trades_limit: usize,

    // Snapshot cache
    pub cache_ttl_secs: i64,
    pub cache_max_entries: usize,

    // Order flow
    pub flow_window: usize,
    pub tick_capacity: usize,
    pub absorption_volume_threshold: f64,
    pub absorption_imbalance_threshold: f64,

    // Pattern classifier
    pub classifier_weights: ClassifierWeights,
    pub classifier_threshold: f64,

    // Plan evaluation
    pub evaluator: EvaluatorConfig,
    /// Hours a terminal plan stays queryable before the slow pass prunes it.
    pub plan_retention_hours: f64,

    // Exits
    pub exit: ExitConfig,

    // Paper execution
    pub fee_rate: f64,
    pub slippage_rate: f64,
    pub min_stop_distance: f64,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let env_f64 = |key: &str, default: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let env_u64 = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let mut distance_overrides = HashMap::new();
        // SYMBOL_DISTANCE_OVERRIDES="EUR-USD:0.001,GBP-USD:0.001"
        for pair in env("SYMBOL_DISTANCE_OVERRIDES", "").split(',') {
            if let Some((symbol, pct)) = pair.split_once(':') {
                if let Ok(pct) = pct.trim().parse::<f64>() {
                    distance_overrides.insert(symbol.trim().to_string(), pct);
                }
            }
        }

        Self {
            symbol: env("SYMBOL", "BTC-USD"),

            fast_interval_secs: env_u64("FAST_INTERVAL_SECS", 5),
            slow_interval_secs: env_u64("SLOW_INTERVAL_SECS", 30),

            bars_timeframe: Timeframe::from_str_loose(&env("BARS_TIMEFRAME", "1m"))
                .unwrap_or(Timeframe::M1),
            bars_limit: env_u64("BARS_LIMIT", 100) as usize,
            trades_limit: env_u64("TRADES_LIMIT", 500) as usize,

            cache_ttl_secs: env_u64("CACHE_TTL_SECS", 5) as i64,
            cache_max_entries: env_u64("CACHE_MAX_ENTRIES", 64) as usize,

            flow_window: env_u64("FLOW_WINDOW", 50) as usize,
            tick_capacity: env_u64("TICK_CAPACITY", 2000) as usize,
            absorption_volume_threshold: env_f64("ABSORPTION_VOLUME_THRESHOLD", 1000.0),
            absorption_imbalance_threshold: env_f64("ABSORPTION_IMBALANCE_THRESHOLD", 0.3),

            classifier_weights: ClassifierWeights {
                absorption: env_f64("WEIGHT_ABSORPTION", 0.30),
                delta_divergence: env_f64("WEIGHT_DELTA_DIVERGENCE", 0.25),
                liquidity_sweep: env_f64("WEIGHT_LIQUIDITY_SWEEP", 0.20),
                cvd_divergence: env_f64("WEIGHT_CVD_DIVERGENCE", 0.15),
                vwap_deviation: env_f64("WEIGHT_VWAP_DEVIATION", 0.10),
            },
            classifier_threshold: env_f64("CLASSIFIER_THRESHOLD", 0.75),

            evaluator: EvaluatorConfig {
                distance_threshold_pct: env_f64("DISTANCE_THRESHOLD_PCT", 0.005),
                distance_overrides,
                max_age_hours: env_f64("MAX_PLAN_AGE_HOURS", 24.0),
                re_eval_price_move_pct: env_f64("RE_EVAL_PRICE_MOVE_PCT", 0.002),
                re_eval_interval_hours: env_f64("RE_EVAL_INTERVAL_HOURS", 4.0),
                re_eval_cooldown_mins: env_u64("RE_EVAL_COOLDOWN_MINS", 60) as i64,
                re_eval_daily_cap: env_u64("RE_EVAL_DAILY_CAP", 6) as u32,
            },
            plan_retention_hours: env_f64("PLAN_RETENTION_HOURS", 24.0),

            exit: ExitConfig {
                flip_delta_fraction: env_f64("FLIP_DELTA_FRACTION", 0.8),
                breakeven_trigger_pct: env_f64("BREAKEVEN_TRIGGER_PCT", 0.004),
                breakeven_offset_pct: env_f64("BREAKEVEN_OFFSET_PCT", 0.0005),
                trailing_distance_pct: env_f64("TRAILING_DISTANCE_PCT", 0.005),
                trailing_enabled: env("TRAILING_ENABLED", "true") == "true",
            },

            fee_rate: env_f64("FEE_RATE", 0.001),
            slippage_rate: env_f64("SLIPPAGE_RATE", 0.0005),
            min_stop_distance: env_f64("MIN_STOP_DISTANCE", 1.0),

            log_dir: env("LOG_DIR", "logs"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
