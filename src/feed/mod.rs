use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::models::{AggTrade, Candle, CandleSeries, Timeframe};

/// Errors at the metrics-source boundary.
///
/// `Unsupported` and `InsufficientHistory` are expected outcomes that the
/// evaluator degrades to "condition not met" — only `Io` indicates a real
/// transport failure.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("symbol {0} has no live order-flow feed")]
    Unsupported(String),
    #[error("insufficient history for {symbol}: have {have}, need {need}")]
    InsufficientHistory {
        symbol: String,
        have: usize,
        need: usize,
    },
    #[error("feed I/O error: {0}")]
    Io(String),
}

/// The market-data dependency of the scheduler, injected at construction.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_bars(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FeedError>;

    async fn current_price(&self, symbol: &str) -> Result<f64, FeedError>;

    /// Order-book imbalance in [-1, 1]; positive means bid-heavy.
    async fn book_imbalance(&self, symbol: &str) -> Result<f64, FeedError>;

    /// Most recent aggregated trades, oldest first.
    async fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<AggTrade>, FeedError>;

    fn supports_order_flow(&self, symbol: &str) -> bool;
}

#[derive(Default)]
struct ReplayState {
    bars: HashMap<(String, Timeframe), Vec<Candle>>,
    trades: HashMap<String, Vec<AggTrade>>,
    imbalance: HashMap<String, f64>,
    now: Option<DateTime<Utc>>,
}

/// A MetricsSource that replays pre-loaded series.
///
/// A cursor controls which samples are visible: only entries with
/// timestamp <= now are returned, simulating a forward walk. Symbols with
/// loaded trades count as order-flow capable.
pub struct ReplayFeed {
    state: RwLock<ReplayState>,
}

impl ReplayFeed {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ReplayState::default()),
        }
    }

    /// Load candles for a symbol/timeframe. Must be sorted oldest-first.
    pub fn load_bars(&self, symbol: &str, tf: Timeframe, candles: Vec<Candle>) {
        let mut state = self.state.write().unwrap();
        state.bars.insert((symbol.to_string(), tf), candles);
    }

    /// Load aggregated trades for a symbol. Must be sorted oldest-first.
    pub fn load_trades(&self, symbol: &str, trades: Vec<AggTrade>) {
        let mut state = self.state.write().unwrap();
        state.trades.insert(symbol.to_string(), trades);
    }

    /// Append trades to an already-loaded symbol tape. Timestamps must
    /// continue past the existing entries.
    pub fn append_trades(&self, symbol: &str, trades: Vec<AggTrade>) {
        let mut state = self.state.write().unwrap();
        state
            .trades
            .entry(symbol.to_string())
            .or_default()
            .extend(trades);
    }

    pub fn set_imbalance(&self, symbol: &str, imbalance: f64) {
        let mut state = self.state.write().unwrap();
        state.imbalance.insert(symbol.to_string(), imbalance);
    }

    /// Advance the simulation clock. `None` makes everything visible.
    pub fn set_time(&self, t: DateTime<Utc>) {
        self.state.write().unwrap().now = Some(t);
    }
}

impl Default for ReplayFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for ReplayFeed {
    async fn fetch_bars(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FeedError> {
        let state = self.state.read().unwrap();
        let all = match state.bars.get(&(symbol.to_string(), tf)) {
            Some(v) => v,
            None => return Err(FeedError::Unsupported(symbol.to_string())),
        };

        let end = match state.now {
            Some(now) => all.partition_point(|c| c.timestamp <= now),
            None => all.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(CandleSeries::new(all[start..end].to_vec()))
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, FeedError> {
        let bars = self.fetch_bars(symbol, Timeframe::M1, 1).await?;
        bars.last()
            .map(|c| c.close)
            .ok_or_else(|| FeedError::InsufficientHistory {
                symbol: symbol.to_string(),
                have: 0,
                need: 1,
            })
    }

    async fn book_imbalance(&self, symbol: &str) -> Result<f64, FeedError> {
        let state = self.state.read().unwrap();
        state
            .imbalance
            .get(symbol)
            .copied()
            .ok_or_else(|| FeedError::Unsupported(symbol.to_string()))
    }

    async fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<AggTrade>, FeedError> {
        let state = self.state.read().unwrap();
        let all = match state.trades.get(symbol) {
            Some(v) => v,
            None => return Err(FeedError::Unsupported(symbol.to_string())),
        };

        let end = match state.now {
            Some(now) => all.partition_point(|t| t.timestamp <= now),
            None => all.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(all[start..end].to_vec())
    }

    fn supports_order_flow(&self, symbol: &str) -> bool {
        self.state.read().unwrap().trades.contains_key(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_candle_vec, make_trades};
    use chrono::Duration;

    #[tokio::test]
    async fn replay_cursor_limits_visibility() {
        let feed = ReplayFeed::new();
        let candles = make_candle_vec(10, 100.0, 1.0);
        let cutoff = candles[4].timestamp;
        feed.load_bars("BTC-USD", Timeframe::M1, candles);

        feed.set_time(cutoff);
        let bars = feed.fetch_bars("BTC-USD", Timeframe::M1, 100).await.unwrap();
        assert_eq!(bars.len(), 5);

        feed.set_time(cutoff + Duration::hours(1));
        let bars = feed.fetch_bars("BTC-USD", Timeframe::M1, 100).await.unwrap();
        assert_eq!(bars.len(), 10);
    }

    #[tokio::test]
    async fn unknown_symbol_is_unsupported() {
        let feed = ReplayFeed::new();
        let err = feed.fetch_bars("ETH-USD", Timeframe::M1, 10).await.unwrap_err();
        assert!(matches!(err, FeedError::Unsupported(_)));
        assert!(!feed.supports_order_flow("ETH-USD"));
    }

    #[tokio::test]
    async fn order_flow_support_follows_loaded_trades() {
        let feed = ReplayFeed::new();
        feed.load_trades("BTC-USD", make_trades(&[10.0, -5.0, 3.0]));
        assert!(feed.supports_order_flow("BTC-USD"));
        let trades = feed.recent_trades("BTC-USD", 2).await.unwrap();
        assert_eq!(trades.len(), 2);
    }
}
