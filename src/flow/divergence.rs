use serde::{Deserialize, Serialize};

use crate::flow::tick_engine::linear_slope;
use crate::models::{CandleSeries, DivergenceKind};

/// Minimum bars before either detector will emit a signal.
pub const MIN_BARS: usize = 20;
/// Minimum absolute regression slope (as a fraction of mean level) before
/// the slope-comparison detector considers a trend real.
const MIN_SLOPE_RATIO: f64 = 1e-5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Divergence {
    pub kind: DivergenceKind,
    /// Normalized disagreement magnitude in [0,1]. This is a size measure,
    /// not a statistical confidence.
    pub strength: f64,
}

impl Divergence {
    pub fn none() -> Self {
        Self {
            kind: DivergenceKind::None,
            strength: 0.0,
        }
    }

    pub fn is_some(&self) -> bool {
        self.kind != DivergenceKind::None
    }
}

/// Index positions of local swing points: strictly greater (highs) or
/// strictly less (lows) than both neighbors.
fn swing_highs(values: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        if values[i] > values[i - 1] && values[i] > values[i + 1] {
            out.push(i);
        }
    }
    out
}

fn swing_lows(values: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        if values[i] < values[i - 1] && values[i] < values[i + 1] {
            out.push(i);
        }
    }
    out
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Truncate both series to their common tail so index i in one aligns with
/// index i in the other. Returns None when the overlap is below MIN_BARS —
/// the defined degraded case, not an error.
fn align_tail<'a>(price: &'a [f64], signal: &'a [f64]) -> Option<(&'a [f64], &'a [f64])> {
    let n = price.len().min(signal.len());
    if n < MIN_BARS {
        return None;
    }
    Some((&price[price.len() - n..], &signal[signal.len() - n..]))
}

/// Swing-point divergence between price and the cumulative volume delta.
///
/// Bearish: price prints a higher swing high while CVD prints a lower swing
/// high at the aligned points. Bullish is the mirror at swing lows.
pub struct CvdDivergenceDetector {
    window: usize,
}

impl CvdDivergenceDetector {
    pub fn new() -> Self {
        Self { window: 50 }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(MIN_BARS),
        }
    }

    pub fn detect(&self, bars: &CandleSeries, cvd: &[f64]) -> Divergence {
        let closes = bars.closes();
        let (price, signal) = match align_tail(&closes, cvd) {
            Some(pair) => pair,
            None => return Divergence::none(),
        };

        let n = price.len().min(self.window);
        let price = &price[price.len() - n..];
        let signal = &signal[signal.len() - n..];

        // Bearish: compare the two most recent price swing highs
        let highs = swing_highs(price);
        if highs.len() >= 2 {
            let (prev, last) = (highs[highs.len() - 2], highs[highs.len() - 1]);
            if price[last] > price[prev] && signal[last] < signal[prev] {
                let strength = divergence_strength(
                    price[last] - price[prev],
                    signal[prev] - signal[last],
                    price[prev],
                    signal,
                );
                return Divergence {
                    kind: DivergenceKind::Bear,
                    strength,
                };
            }
        }

        // Bullish: mirror at swing lows
        let lows = swing_lows(price);
        if lows.len() >= 2 {
            let (prev, last) = (lows[lows.len() - 2], lows[lows.len() - 1]);
            if price[last] < price[prev] && signal[last] > signal[prev] {
                let strength = divergence_strength(
                    price[prev] - price[last],
                    signal[last] - signal[prev],
                    price[prev],
                    signal,
                );
                return Divergence {
                    kind: DivergenceKind::Bull,
                    strength,
                };
            }
        }

        Divergence::none()
    }
}

impl Default for CvdDivergenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined magnitude of the two opposing moves, each normalized to its own
/// scale, then clamped.
fn divergence_strength(price_move: f64, signal_move: f64, price_ref: f64, signal: &[f64]) -> f64 {
    let price_part = if price_ref.abs() > 0.0 {
        // A 1% disagreement in price terms saturates its half of the score
        clamp01(price_move.abs() / price_ref.abs() / 0.01)
    } else {
        0.0
    };

    let signal_span = signal.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        - signal.iter().cloned().fold(f64::INFINITY, f64::min);
    let signal_part = if signal_span > 0.0 {
        clamp01(signal_move.abs() / signal_span)
    } else {
        0.0
    };

    clamp01((price_part + signal_part) / 2.0)
}

/// Slope-comparison divergence between price closes and raw per-trade delta.
///
/// Unlike the CVD detector this ignores swing points: it regresses both
/// series over the same window and flags divergence when the two slopes are
/// of opposite sign and both exceed a minimum magnitude.
pub struct DeltaDivergenceDetector {
    window: usize,
}

impl DeltaDivergenceDetector {
    pub fn new() -> Self {
        Self { window: 30 }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(MIN_BARS),
        }
    }

    pub fn detect(&self, bars: &CandleSeries, deltas: &[f64]) -> Divergence {
        let closes = bars.closes();
        let (price, signal) = match align_tail(&closes, deltas) {
            Some(pair) => pair,
            None => return Divergence::none(),
        };

        let n = price.len().min(self.window);
        let price = &price[price.len() - n..];
        let signal = &signal[signal.len() - n..];

        let price_slope = linear_slope(price);
        let delta_slope = linear_slope(signal);

        let price_mean = price.iter().sum::<f64>() / price.len() as f64;
        let delta_scale = signal.iter().map(|d| d.abs()).sum::<f64>() / signal.len() as f64;

        let price_min = price_mean.abs() * MIN_SLOPE_RATIO;
        let delta_min = (delta_scale * MIN_SLOPE_RATIO).max(f64::EPSILON);

        if price_slope.abs() < price_min || delta_slope.abs() < delta_min {
            return Divergence::none();
        }
        if price_slope.signum() == delta_slope.signum() {
            return Divergence::none();
        }

        // Normalize each slope to its own scale before combining
        let price_part = clamp01(price_slope.abs() / price_mean.abs().max(f64::EPSILON) / 0.001);
        let delta_part = clamp01(delta_slope.abs() / delta_scale.max(f64::EPSILON));
        let strength = clamp01((price_part + delta_part) / 2.0);

        // Price rising while delta falls is distribution into strength: bearish
        let kind = if price_slope > 0.0 {
            DivergenceKind::Bear
        } else {
            DivergenceKind::Bull
        };

        Divergence { kind, strength }
    }
}

impl Default for DeltaDivergenceDetector {
    fn default() -> Self {
        Self::new()
    }
}
