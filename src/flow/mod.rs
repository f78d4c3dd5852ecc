pub mod absorption;
pub mod cache;
pub mod classifier;
pub mod divergence;
pub mod snapshot;
pub mod tick_engine;

pub use absorption::{AbsorptionZone, AbsorptionZoneDetector};
pub use cache::MetricsCache;
pub use classifier::{
    Classification, ClassifierWeights, PatternClassifier, SignalKind, SignalValue,
};
pub use divergence::{CvdDivergenceDetector, DeltaDivergenceDetector, Divergence, MIN_BARS};
pub use snapshot::OrderFlowSnapshot;
pub use tick_engine::{CvdTrend, DeltaSample, TickDeltaEngine};

use chrono::Utc;
use std::collections::HashMap;

use crate::models::{AggTrade, CandleSeries, calc_atr};

/// Owns the per-symbol tick engines and the derived-signal detectors, and
/// assembles immutable snapshots for the evaluator.
pub struct FlowEngine {
    engines: HashMap<String, TickDeltaEngine>,
    cvd_detector: CvdDivergenceDetector,
    delta_detector: DeltaDivergenceDetector,
    absorption: AbsorptionZoneDetector,
    /// Sample window used for window delta, trend and divergences.
    window: usize,
    tick_capacity: usize,
}

impl FlowEngine {
    pub fn new(
        window: usize,
        tick_capacity: usize,
        volume_threshold: f64,
        imbalance_threshold: f64,
    ) -> Self {
        Self {
            engines: HashMap::new(),
            cvd_detector: CvdDivergenceDetector::with_window(window),
            delta_detector: DeltaDivergenceDetector::with_window(window),
            absorption: AbsorptionZoneDetector::new(volume_threshold, imbalance_threshold),
            window: window.max(2),
            tick_capacity,
        }
    }

    /// Feed one aggregated trade into the symbol's delta engine.
    pub fn ingest(&mut self, trade: &AggTrade) -> DeltaSample {
        let capacity = self.tick_capacity;
        self.engines
            .entry(trade.symbol.clone())
            .or_insert_with(|| TickDeltaEngine::with_capacity(capacity))
            .process(trade)
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.engines.contains_key(symbol)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Build a fresh snapshot for the symbol, or None when the symbol has no
    /// ingested order flow yet (callers degrade to "unavailable").
    pub fn snapshot(
        &self,
        symbol: &str,
        bars: &CandleSeries,
        book_imbalance: f64,
    ) -> Option<OrderFlowSnapshot> {
        let engine = self.engines.get(symbol)?;

        let delta_volume = engine.window_delta(self.window);
        let trend = engine.get_cvd_trend(self.window);
        let cvd_history = engine.cvd_history();
        let delta_history = engine.delta_history();

        let cvd_divergence = self.cvd_detector.detect(bars, &cvd_history);
        let delta_divergence = self.delta_detector.detect(bars, &delta_history);

        let traded_volume: f64 = {
            let hist = &delta_history;
            let start = hist.len().saturating_sub(self.window);
            hist[start..].iter().map(|d| d.abs()).sum()
        };

        let price = bars.last().map(|c| c.close).unwrap_or(0.0);
        let price_move = if bars.len() >= self.window {
            price - bars[bars.len() - self.window].close
        } else if let Some(first) = bars.first() {
            price - first.close
        } else {
            0.0
        };
        let atr = if bars.len() >= 14 {
            Some(calc_atr(bars, 14))
        } else {
            None
        };

        let absorption_zones =
            self.absorption
                .detect(book_imbalance, traded_volume, price_move, price, atr);

        Some(OrderFlowSnapshot {
            symbol: symbol.to_string(),
            delta_volume,
            cvd: engine.cvd(),
            cvd_slope: trend.slope,
            cvd_direction: trend.direction,
            cvd_divergence,
            delta_divergence,
            absorption_zones,
            pressure_ratio: engine.pressure_ratio(self.window),
            produced_at: Utc::now(),
        })
    }
}
