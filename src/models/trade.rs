use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// An aggregated trade event from the tick feed.
///
/// These carry aggressor side and summed quantity for a burst of executions;
/// no individual-tick resolution is assumed anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl AggTrade {
    /// Signed volume contribution: +quantity for buys, -quantity for sells.
    pub fn signed_delta(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }
}
