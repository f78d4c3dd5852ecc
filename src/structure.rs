use serde::{Deserialize, Serialize};

use crate::models::{CandleSeries, Trend};

/// Bars a swept level may be revisited within before the sweep goes stale.
const SWEEP_RECENCY: usize = 5;
/// Minimum follow-through after an order-block candle, as a multiple of the
/// candle's own range.
const OB_IMPULSE_RATIO: f64 = 1.5;

/// Structural read of a bar series at one evaluation instant, backing the
/// order_block / liquidity_sweep / choch / bos condition predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub bos: Option<Trend>,
    pub choch: Option<Trend>,
    pub liquidity_sweep: Option<Trend>,
    pub order_block: Option<Trend>,
    /// |close - vwap| / vwap, or 0 when no volume to compute against.
    pub vwap_deviation: f64,
}

impl StructureSnapshot {
    pub fn empty() -> Self {
        Self {
            bos: None,
            choch: None,
            liquidity_sweep: None,
            order_block: None,
            vwap_deviation: 0.0,
        }
    }
}

pub struct StructureDetector {
    swing_lookback: usize,
}

impl StructureDetector {
    pub fn new() -> Self {
        Self::with_lookback(3)
    }

    pub fn with_lookback(swing_lookback: usize) -> Self {
        Self {
            swing_lookback: swing_lookback.max(1),
        }
    }

    pub fn analyze(&self, candles: &CandleSeries) -> StructureSnapshot {
        let lb = self.swing_lookback;
        if candles.len() < lb * 2 + 3 {
            return StructureSnapshot::empty();
        }

        let (swing_highs, swing_lows) = self.find_swings(candles);
        let last_close = candles.last().map(|c| c.close).unwrap_or(0.0);

        let bos = self.detect_bos(last_close, &swing_highs, &swing_lows);
        let choch = self.detect_choch(candles, &swing_highs, &swing_lows);
        let liquidity_sweep = self.detect_sweep(candles, &swing_highs, &swing_lows);
        let order_block = self.detect_order_block(candles);

        let vwap_deviation = match candles.vwap() {
            Some(vwap) if vwap > 0.0 => (last_close - vwap).abs() / vwap,
            _ => 0.0,
        };

        StructureSnapshot {
            bos,
            choch,
            liquidity_sweep,
            order_block,
            vwap_deviation,
        }
    }

    /// (index, price) of confirmed swing highs/lows: extremes against `lb`
    /// neighbors on both sides.
    fn find_swings(&self, candles: &CandleSeries) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
        let lb = self.swing_lookback;
        let len = candles.len();
        let mut highs = Vec::new();
        let mut lows = Vec::new();

        for i in lb..len.saturating_sub(lb) {
            let window = candles.slice(i - lb, (i + lb + 1).min(len));
            if candles[i].high >= window.highs_max() {
                highs.push((i, candles[i].high));
            }
            if candles[i].low <= window.lows_min() {
                lows.push((i, candles[i].low));
            }
        }

        (highs, lows)
    }

    /// Break of structure: the latest close beyond the most recent confirmed
    /// swing extreme in that direction.
    fn detect_bos(
        &self,
        last_close: f64,
        swing_highs: &[(usize, f64)],
        swing_lows: &[(usize, f64)],
    ) -> Option<Trend> {
        if let Some(&(_, high)) = swing_highs.last() {
            if last_close > high {
                return Some(Trend::Bullish);
            }
        }
        if let Some(&(_, low)) = swing_lows.last() {
            if last_close < low {
                return Some(Trend::Bearish);
            }
        }
        None
    }

    /// Change of character: close breaking the opposing swing while the
    /// preceding structure leaned the other way.
    fn detect_choch(
        &self,
        candles: &CandleSeries,
        swing_highs: &[(usize, f64)],
        swing_lows: &[(usize, f64)],
    ) -> Option<Trend> {
        let last_close = candles.last()?.close;
        let prior_trend = self.prior_trend(swing_highs, swing_lows)?;

        match prior_trend {
            Trend::Bearish => {
                // In a bearish leg, reclaiming the last swing high flips character
                let &(_, high) = swing_highs.last()?;
                (last_close > high).then_some(Trend::Bullish)
            }
            Trend::Bullish => {
                let &(_, low) = swing_lows.last()?;
                (last_close < low).then_some(Trend::Bearish)
            }
            Trend::Neutral => None,
        }
    }

    /// Trend implied by the last two swings on each side: higher highs and
    /// higher lows = bullish, lower of both = bearish.
    fn prior_trend(
        &self,
        swing_highs: &[(usize, f64)],
        swing_lows: &[(usize, f64)],
    ) -> Option<Trend> {
        if swing_highs.len() < 2 || swing_lows.len() < 2 {
            return None;
        }
        let hh = swing_highs[swing_highs.len() - 1].1 > swing_highs[swing_highs.len() - 2].1;
        let hl = swing_lows[swing_lows.len() - 1].1 > swing_lows[swing_lows.len() - 2].1;

        Some(match (hh, hl) {
            (true, true) => Trend::Bullish,
            (false, false) => Trend::Bearish,
            _ => Trend::Neutral,
        })
    }

    /// Liquidity sweep: a recent wick trading beyond a prior swing extreme
    /// with the close back inside. A sweep of lows is bullish (stops below
    /// taken, price rejected back up); of highs, bearish.
    fn detect_sweep(
        &self,
        candles: &CandleSeries,
        swing_highs: &[(usize, f64)],
        swing_lows: &[(usize, f64)],
    ) -> Option<Trend> {
        let len = candles.len();
        let recent_start = len.saturating_sub(SWEEP_RECENCY);

        for i in (recent_start..len).rev() {
            let c = &candles[i];
            // Only levels established before the candle in question
            if let Some(&(_, low)) = swing_lows.iter().rev().find(|&&(idx, _)| idx < i) {
                if c.low < low && c.close > low {
                    return Some(Trend::Bullish);
                }
            }
            if let Some(&(_, high)) = swing_highs.iter().rev().find(|&&(idx, _)| idx < i) {
                if c.high > high && c.close < high {
                    return Some(Trend::Bearish);
                }
            }
        }
        None
    }

    /// Order block: the last opposing candle before an impulsive move, with
    /// current price trading back inside its range.
    fn detect_order_block(&self, candles: &CandleSeries) -> Option<Trend> {
        let len = candles.len();
        let last_close = candles.last()?.close;
        let scan_start = len.saturating_sub(20);

        for i in (scan_start..len.saturating_sub(2)).rev() {
            let c = &candles[i];
            let range = c.total_range();
            if range <= 0.0 {
                continue;
            }
            let next_two_move = candles[(i + 2).min(len - 1)].close - c.close;

            // Bearish candle followed by an impulsive push up
            if c.is_bearish()
                && next_two_move > range * OB_IMPULSE_RATIO
                && last_close >= c.low
                && last_close <= c.high
            {
                return Some(Trend::Bullish);
            }
            // Bullish candle followed by an impulsive push down
            if c.is_bullish()
                && -next_two_move > range * OB_IMPULSE_RATIO
                && last_close >= c.low
                && last_close <= c.high
            {
                return Some(Trend::Bearish);
            }
        }
        None
    }
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new()
    }
}
