use serde::{Deserialize, Serialize};

use crate::models::TradeSide;

/// Price stall ceiling as a fraction of ATR.
const STALL_ATR_RATIO: f64 = 0.10;
/// Absolute stall fallback as a fraction of price when ATR is unavailable.
const STALL_PRICE_RATIO: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorptionZone {
    pub price: f64,
    /// Mean of the three clamped sub-scores, in [0,1].
    pub strength: f64,
    /// Side doing the absorbing: Buy when passive bids soak up sell flow.
    pub side: TradeSide,
}

/// Three-factor absorption confluence: heavy traded volume, a lopsided book,
/// and price refusing to move. Requiring all three cuts the false positives
/// a bare volume-spike threshold produces.
pub struct AbsorptionZoneDetector {
    pub volume_threshold: f64,
    pub imbalance_threshold: f64,
}

impl AbsorptionZoneDetector {
    pub fn new(volume_threshold: f64, imbalance_threshold: f64) -> Self {
        Self {
            volume_threshold,
            imbalance_threshold,
        }
    }

    /// `book_imbalance` in [-1,1] (positive = bid-heavy), `price_move` the
    /// signed move over the observation window, `atr` from bars when known.
    pub fn detect(
        &self,
        book_imbalance: f64,
        traded_volume: f64,
        price_move: f64,
        price: f64,
        atr: Option<f64>,
    ) -> Vec<AbsorptionZone> {
        if price <= 0.0 {
            return Vec::new();
        }

        let stall_limit = match atr {
            Some(a) if a > 0.0 => a * STALL_ATR_RATIO,
            _ => price * STALL_PRICE_RATIO,
        };

        let volume_ok = traded_volume >= self.volume_threshold;
        let imbalance_ok = book_imbalance.abs() >= self.imbalance_threshold;
        let stalled = price_move.abs() < stall_limit;

        if !(volume_ok && imbalance_ok && stalled) {
            return Vec::new();
        }

        // Each sub-score saturates at 2x its threshold
        let volume_score = (traded_volume / (self.volume_threshold * 2.0)).clamp(0.0, 1.0);
        let imbalance_score =
            (book_imbalance.abs() / (self.imbalance_threshold * 2.0)).clamp(0.0, 1.0);
        let stall_score = (1.0 - price_move.abs() / stall_limit).clamp(0.0, 1.0);

        let strength = (volume_score + imbalance_score + stall_score) / 3.0;

        let side = if book_imbalance >= 0.0 {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };

        vec![AbsorptionZone {
            price,
            strength,
            side,
        }]
    }
}
