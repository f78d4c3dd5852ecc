use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn total_range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Wraps Vec<Candle> with the series helpers the detectors need.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn tail(&self, n: usize) -> CandleSeries {
        let start = self.candles.len().saturating_sub(n);
        CandleSeries::new(self.candles[start..].to_vec())
    }

    pub fn slice(&self, start: usize, end: usize) -> CandleSeries {
        let s = start.min(self.candles.len());
        let e = end.min(self.candles.len()).max(s);
        CandleSeries::new(self.candles[s..e].to_vec())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn highs_max(&self) -> f64 {
        self.candles
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn lows_min(&self) -> f64 {
        self.candles
            .iter()
            .map(|c| c.low)
            .fold(f64::INFINITY, f64::min)
    }

    /// Volume-weighted average price over the series.
    pub fn vwap(&self) -> Option<f64> {
        let total_vol: f64 = self.candles.iter().map(|c| c.volume).sum();
        if total_vol <= 0.0 {
            return None;
        }
        let weighted: f64 = self
            .candles
            .iter()
            .map(|c| c.typical_price() * c.volume)
            .sum();
        Some(weighted / total_vol)
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push(candle);
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

/// Average true range over the trailing `period` candles.
pub fn calc_atr(candles: &CandleSeries, period: usize) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    if candles.len() < period {
        return candles.last().map_or(0.0, |c| c.high - c.low);
    }

    let mut trs: Vec<f64> = Vec::with_capacity(candles.len());
    trs.push(candles[0].high - candles[0].low);

    for i in 1..candles.len() {
        let hl = candles[i].high - candles[i].low;
        let hc = (candles[i].high - candles[i - 1].close).abs();
        let lc = (candles[i].low - candles[i - 1].close).abs();
        trs.push(hl.max(hc).max(lc));
    }

    let start = trs.len().saturating_sub(period);
    let slice = &trs[start..];
    slice.iter().sum::<f64>() / slice.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_candles;

    #[test]
    fn series_len_tail_slice() {
        let s = make_candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 112.0, 104.0, 110.0),
        ]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.tail(2).len(), 2);
        assert!((s.tail(2)[0].open - 102.0).abs() < 1e-9);
        assert_eq!(s.slice(1, 3).len(), 2);
    }

    #[test]
    fn series_highs_max_lows_min() {
        let s = make_candles(&[
            (100.0, 200.0, 50.0, 150.0),
            (150.0, 300.0, 80.0, 250.0),
            (250.0, 280.0, 60.0, 270.0),
        ]);
        assert!((s.highs_max() - 300.0).abs() < 1e-9);
        assert!((s.lows_min() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut s = make_candles(&[(100.0, 100.0, 100.0, 100.0)]);
        let mut heavy = s[0].clone();
        heavy.high = 200.0;
        heavy.low = 200.0;
        heavy.close = 200.0;
        heavy.volume = 300.0;
        s.push(heavy);
        // typical prices 100 and 200, volumes 100 and 300 => vwap 175
        let vwap = s.vwap().unwrap();
        assert!((vwap - 175.0).abs() < 1e-9);
    }

    #[test]
    fn atr_on_short_series_uses_last_range() {
        let s = make_candles(&[(100.0, 110.0, 90.0, 105.0)]);
        assert!((calc_atr(&s, 14) - 20.0).abs() < 1e-9);
    }
}
