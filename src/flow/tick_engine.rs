use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::models::{AggTrade, SlopeDirection};

/// Default ring capacity for per-trade delta history.
const DEFAULT_CAPACITY: usize = 2000;
/// Slope deadband as a fraction of the mean absolute CVD in the window;
/// oscillating flow with no drift must not flip the direction.
const SLOPE_EPSILON_RATIO: f64 = 0.01;
/// Absolute deadband floor for a CVD hovering around zero.
const SLOPE_EPSILON_ABS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeltaSample {
    pub delta: f64,
    pub cvd: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CvdTrend {
    pub slope: f64,
    pub direction: SlopeDirection,
}

/// Maintains rolling delta/CVD history for one symbol.
///
/// All buffers are fixed-capacity rings; sustained load evicts the oldest
/// samples rather than growing. The CVD is a running sum over everything
/// the engine has ever seen, not just the retained window.
pub struct TickDeltaEngine {
    capacity: usize,
    deltas: VecDeque<f64>,
    cvd_series: VecDeque<f64>,
    timestamps: VecDeque<DateTime<Utc>>,
    cvd: f64,
}

impl TickDeltaEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            deltas: VecDeque::with_capacity(capacity),
            cvd_series: VecDeque::with_capacity(capacity),
            timestamps: VecDeque::with_capacity(capacity),
            cvd: 0.0,
        }
    }

    /// Fold one aggregated trade into the history.
    pub fn process(&mut self, trade: &AggTrade) -> DeltaSample {
        let delta = trade.signed_delta();
        self.cvd += delta;

        if self.deltas.len() == self.capacity {
            self.deltas.pop_front();
            self.cvd_series.pop_front();
            self.timestamps.pop_front();
        }
        self.deltas.push_back(delta);
        self.cvd_series.push_back(self.cvd);
        self.timestamps.push_back(trade.timestamp);

        DeltaSample {
            delta,
            cvd: self.cvd,
            timestamp: trade.timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn cvd(&self) -> f64 {
        self.cvd
    }

    /// Net delta over the most recent `n` samples.
    pub fn window_delta(&self, n: usize) -> f64 {
        let start = self.deltas.len().saturating_sub(n);
        self.deltas.iter().skip(start).sum()
    }

    pub fn delta_history(&self) -> Vec<f64> {
        self.deltas.iter().copied().collect()
    }

    pub fn cvd_history(&self) -> Vec<f64> {
        self.cvd_series.iter().copied().collect()
    }

    /// Buy volume / sell volume over the most recent `n` samples.
    /// Returns 1.0 when no sell volume is present to compare against.
    pub fn pressure_ratio(&self, n: usize) -> f64 {
        let start = self.deltas.len().saturating_sub(n);
        let mut buys = 0.0;
        let mut sells = 0.0;
        for d in self.deltas.iter().skip(start) {
            if *d >= 0.0 {
                buys += d;
            } else {
                sells += -d;
            }
        }
        if sells <= 0.0 {
            1.0
        } else {
            buys / sells
        }
    }

    /// Least-squares slope of the CVD series over the last `n` samples,
    /// classified against a deadband so noise does not flip the direction.
    pub fn get_cvd_trend(&self, n: usize) -> CvdTrend {
        let start = self.cvd_series.len().saturating_sub(n);
        let window: Vec<f64> = self.cvd_series.iter().skip(start).copied().collect();

        if window.len() < 2 {
            return CvdTrend {
                slope: 0.0,
                direction: SlopeDirection::Flat,
            };
        }

        let slope = linear_slope(&window);
        let mean_abs = window.iter().map(|v| v.abs()).sum::<f64>() / window.len() as f64;
        let epsilon = (mean_abs * SLOPE_EPSILON_RATIO).max(SLOPE_EPSILON_ABS);

        let direction = if slope > epsilon {
            SlopeDirection::Rising
        } else if slope < -epsilon {
            SlopeDirection::Falling
        } else {
            SlopeDirection::Flat
        };

        CvdTrend { slope, direction }
    }
}

impl Default for TickDeltaEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Least-squares slope of `values` against their indices.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }

    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_trades;

    #[test]
    fn cvd_accumulates_signed_volume() {
        let mut engine = TickDeltaEngine::new();
        for trade in make_trades(&[10.0, -4.0, 6.0]) {
            engine.process(&trade);
        }
        assert!((engine.cvd() - 12.0).abs() < 1e-9);
        assert!((engine.window_delta(2) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut engine = TickDeltaEngine::with_capacity(3);
        for trade in make_trades(&[1.0, 2.0, 3.0, 4.0]) {
            engine.process(&trade);
        }
        assert_eq!(engine.len(), 3);
        // Oldest (1.0) evicted from the retained window, CVD still counts it
        assert!((engine.window_delta(10) - 9.0).abs() < 1e-9);
        assert!((engine.cvd() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rising_cvd_classified_rising() {
        let mut engine = TickDeltaEngine::new();
        for trade in make_trades(&[5.0; 20]) {
            engine.process(&trade);
        }
        let trend = engine.get_cvd_trend(20);
        assert_eq!(trend.direction, SlopeDirection::Rising);
        assert!(trend.slope > 0.0);
    }

    #[test]
    fn falling_cvd_classified_falling() {
        let mut engine = TickDeltaEngine::new();
        for trade in make_trades(&[-5.0; 20]) {
            engine.process(&trade);
        }
        assert_eq!(engine.get_cvd_trend(20).direction, SlopeDirection::Falling);
    }

    #[test]
    fn flat_cvd_stays_flat_under_noise() {
        let mut engine = TickDeltaEngine::new();
        // Alternating equal buys/sells: CVD oscillates around zero
        let deltas: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        for trade in make_trades(&deltas) {
            engine.process(&trade);
        }
        assert_eq!(engine.get_cvd_trend(40).direction, SlopeDirection::Flat);
    }

    #[test]
    fn trend_with_insufficient_samples_is_flat() {
        let engine = TickDeltaEngine::new();
        assert_eq!(engine.get_cvd_trend(50).direction, SlopeDirection::Flat);
    }

    #[test]
    fn pressure_ratio_buy_heavy() {
        let mut engine = TickDeltaEngine::new();
        for trade in make_trades(&[30.0, -10.0]) {
            engine.process(&trade);
        }
        assert!((engine.pressure_ratio(10) - 3.0).abs() < 1e-9);
    }
}
