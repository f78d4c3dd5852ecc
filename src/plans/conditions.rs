use serde::{Deserialize, Serialize};
use std::fmt;

use crate::flow::OrderFlowSnapshot;
use crate::models::{DivergenceKind, SlopeDirection, Trend};
use crate::structure::StructureSnapshot;

/// One named predicate in a plan's condition set.
///
/// Typed variants replace a free-form string map so plans are validated at
/// creation time instead of interpreted ad hoc per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    // Price predicates
    PriceAbove { level: f64 },
    PriceBelow { level: f64 },

    // Structural predicates
    OrderBlock { trend: Trend },
    LiquiditySweep { trend: Trend },
    Choch { trend: Trend },
    Bos { trend: Trend },

    // Order-flow predicates
    DeltaPositive,
    DeltaNegative,
    CvdRising,
    CvdFalling,
    CvdDivergence { kind: DivergenceKind },
    DeltaDivergence { kind: DivergenceKind },
    AbsorptionZoneDetected,
    AvoidAbsorptionZones,
}

impl Condition {
    pub fn is_order_flow(&self) -> bool {
        matches!(
            self,
            Condition::DeltaPositive
                | Condition::DeltaNegative
                | Condition::CvdRising
                | Condition::CvdFalling
                | Condition::CvdDivergence { .. }
                | Condition::DeltaDivergence { .. }
                | Condition::AbsorptionZoneDetected
                | Condition::AvoidAbsorptionZones
        )
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Condition::OrderBlock { .. }
                | Condition::LiquiditySweep { .. }
                | Condition::Choch { .. }
                | Condition::Bos { .. }
        )
    }

    /// True when two conditions can never hold at once.
    fn contradicts(&self, other: &Condition) -> bool {
        use Condition::*;
        matches!(
            (self, other),
            (DeltaPositive, DeltaNegative)
                | (DeltaNegative, DeltaPositive)
                | (CvdRising, CvdFalling)
                | (CvdFalling, CvdRising)
                | (AbsorptionZoneDetected, AvoidAbsorptionZones)
                | (AvoidAbsorptionZones, AbsorptionZoneDetected)
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::PriceAbove { level } => write!(f, "price_above({level})"),
            Condition::PriceBelow { level } => write!(f, "price_below({level})"),
            Condition::OrderBlock { trend } => write!(f, "order_block({trend})"),
            Condition::LiquiditySweep { trend } => write!(f, "liquidity_sweep({trend})"),
            Condition::Choch { trend } => write!(f, "choch({trend})"),
            Condition::Bos { trend } => write!(f, "bos({trend})"),
            Condition::DeltaPositive => write!(f, "delta_positive"),
            Condition::DeltaNegative => write!(f, "delta_negative"),
            Condition::CvdRising => write!(f, "cvd_rising"),
            Condition::CvdFalling => write!(f, "cvd_falling"),
            Condition::CvdDivergence { kind } => write!(f, "cvd_div_{kind}"),
            Condition::DeltaDivergence { kind } => write!(f, "delta_divergence_{kind}"),
            Condition::AbsorptionZoneDetected => write!(f, "absorption_zone_detected"),
            Condition::AvoidAbsorptionZones => write!(f, "avoid_absorption_zones"),
        }
    }
}

/// Result of evaluating a single condition.
///
/// `Unavailable` is the defined answer for order-flow predicates on symbols
/// without a live trade feed; it counts as "not met", never as a silent true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOutcome {
    Met,
    NotMet,
    Unavailable,
}

impl ConditionOutcome {
    pub fn is_met(&self) -> bool {
        matches!(self, ConditionOutcome::Met)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    pub fn new(conditions: Vec<Condition>) -> Result<Self, String> {
        let set = Self { conditions };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (i, a) in self.conditions.iter().enumerate() {
            for b in &self.conditions[i + 1..] {
                if a == b {
                    return Err(format!("duplicate condition: {a}"));
                }
                if a.contradicts(b) {
                    return Err(format!("contradictory conditions: {a} vs {b}"));
                }
            }
            if let Condition::PriceAbove { level } | Condition::PriceBelow { level } = a {
                if !level.is_finite() || *level <= 0.0 {
                    return Err(format!("invalid price level in {a}"));
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.conditions.iter()
    }

    pub fn has_order_flow(&self) -> bool {
        self.conditions.iter().any(|c| c.is_order_flow())
    }

    pub fn order_flow_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().filter(|c| c.is_order_flow())
    }

    /// Evaluate one condition against the current snapshot pair.
    ///
    /// `flow` is None for symbols without a live tick feed; `structure` is
    /// None when bars could not be fetched. Both degrade to Unavailable
    /// rather than Met.
    pub fn evaluate_one(
        condition: &Condition,
        price: f64,
        flow: Option<&OrderFlowSnapshot>,
        structure: Option<&StructureSnapshot>,
    ) -> ConditionOutcome {
        use Condition::*;

        let met = |b: bool| {
            if b {
                ConditionOutcome::Met
            } else {
                ConditionOutcome::NotMet
            }
        };

        match condition {
            PriceAbove { level } => met(price > *level),
            PriceBelow { level } => met(price < *level),

            OrderBlock { trend } => match structure {
                Some(s) => met(s.order_block == Some(*trend)),
                None => ConditionOutcome::Unavailable,
            },
            LiquiditySweep { trend } => match structure {
                Some(s) => met(s.liquidity_sweep == Some(*trend)),
                None => ConditionOutcome::Unavailable,
            },
            Choch { trend } => match structure {
                Some(s) => met(s.choch == Some(*trend)),
                None => ConditionOutcome::Unavailable,
            },
            Bos { trend } => match structure {
                Some(s) => met(s.bos == Some(*trend)),
                None => ConditionOutcome::Unavailable,
            },

            DeltaPositive => match flow {
                Some(s) => met(s.delta_volume > 0.0),
                None => ConditionOutcome::Unavailable,
            },
            DeltaNegative => match flow {
                Some(s) => met(s.delta_volume < 0.0),
                None => ConditionOutcome::Unavailable,
            },
            CvdRising => match flow {
                Some(s) => met(s.cvd_direction == SlopeDirection::Rising),
                None => ConditionOutcome::Unavailable,
            },
            CvdFalling => match flow {
                Some(s) => met(s.cvd_direction == SlopeDirection::Falling),
                None => ConditionOutcome::Unavailable,
            },
            CvdDivergence { kind } => match flow {
                Some(s) => met(s.cvd_divergence.kind == *kind),
                None => ConditionOutcome::Unavailable,
            },
            DeltaDivergence { kind } => match flow {
                Some(s) => met(s.delta_divergence.kind == *kind),
                None => ConditionOutcome::Unavailable,
            },
            AbsorptionZoneDetected => match flow {
                Some(s) => met(s.has_absorption()),
                None => ConditionOutcome::Unavailable,
            },
            AvoidAbsorptionZones => match flow {
                Some(s) => met(!s.has_absorption()),
                None => ConditionOutcome::Unavailable,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_snapshot;

    #[test]
    fn duplicate_conditions_rejected() {
        let err = ConditionSet::new(vec![Condition::CvdRising, Condition::CvdRising]);
        assert!(err.is_err());
    }

    #[test]
    fn contradictory_conditions_rejected() {
        assert!(ConditionSet::new(vec![
            Condition::DeltaPositive,
            Condition::DeltaNegative
        ])
        .is_err());
        assert!(ConditionSet::new(vec![
            Condition::AbsorptionZoneDetected,
            Condition::AvoidAbsorptionZones
        ])
        .is_err());
    }

    #[test]
    fn invalid_price_level_rejected() {
        assert!(ConditionSet::new(vec![Condition::PriceAbove { level: -5.0 }]).is_err());
        assert!(ConditionSet::new(vec![Condition::PriceAbove { level: f64::NAN }]).is_err());
    }

    #[test]
    fn order_flow_detection() {
        let set = ConditionSet::new(vec![
            Condition::PriceAbove { level: 100.0 },
            Condition::CvdRising,
        ])
        .unwrap();
        assert!(set.has_order_flow());

        let set = ConditionSet::new(vec![Condition::PriceAbove { level: 100.0 }]).unwrap();
        assert!(!set.has_order_flow());
    }

    #[test]
    fn order_flow_predicate_without_feed_is_unavailable() {
        let outcome = ConditionSet::evaluate_one(&Condition::DeltaPositive, 100.0, None, None);
        assert_eq!(outcome, ConditionOutcome::Unavailable);
        assert!(!outcome.is_met());
    }

    #[test]
    fn delta_sign_predicates() {
        let mut snap = make_snapshot("BTC-USD");
        snap.delta_volume = 42.0;
        let met =
            ConditionSet::evaluate_one(&Condition::DeltaPositive, 100.0, Some(&snap), None);
        assert_eq!(met, ConditionOutcome::Met);
        let not =
            ConditionSet::evaluate_one(&Condition::DeltaNegative, 100.0, Some(&snap), None);
        assert_eq!(not, ConditionOutcome::NotMet);
    }

    #[test]
    fn conditions_round_trip_through_json() {
        let set = ConditionSet::new(vec![
            Condition::PriceAbove { level: 100.0 },
            Condition::CvdDivergence {
                kind: DivergenceKind::Bull,
            },
            Condition::DeltaDivergence {
                kind: DivergenceKind::Bear,
            },
        ])
        .unwrap();

        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains(r#""type":"cvd_divergence""#));
        assert!(json.contains(r#""kind":"bull""#));

        let back: ConditionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 3);
        assert!(back.iter().any(|c| matches!(
            c,
            Condition::DeltaDivergence {
                kind: DivergenceKind::Bear
            }
        )));
    }

    #[test]
    fn price_predicates() {
        let above = Condition::PriceAbove { level: 100.0 };
        assert!(ConditionSet::evaluate_one(&above, 101.0, None, None).is_met());
        assert!(!ConditionSet::evaluate_one(&above, 99.0, None, None).is_met());
    }
}
