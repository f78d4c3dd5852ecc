use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::absorption::AbsorptionZone;
use crate::flow::divergence::Divergence;
use crate::models::SlopeDirection;

/// Immutable per-symbol order-flow state at one evaluation instant.
///
/// Built fresh by the flow engine or served from the metrics cache; never
/// mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFlowSnapshot {
    pub symbol: String,
    /// Net signed volume over the observation window.
    pub delta_volume: f64,
    pub cvd: f64,
    pub cvd_slope: f64,
    pub cvd_direction: SlopeDirection,
    pub cvd_divergence: Divergence,
    pub delta_divergence: Divergence,
    pub absorption_zones: Vec<AbsorptionZone>,
    /// Buy volume / sell volume over the window.
    pub pressure_ratio: f64,
    pub produced_at: DateTime<Utc>,
}

impl OrderFlowSnapshot {
    pub fn has_absorption(&self) -> bool {
        !self.absorption_zones.is_empty()
    }

    pub fn strongest_zone(&self) -> Option<&AbsorptionZone> {
        self.absorption_zones
            .iter()
            .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap())
    }
}
