use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Absorption,
    DeltaDivergence,
    LiquiditySweep,
    CvdDivergence,
    VwapDeviation,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Absorption => write!(f, "absorption"),
            SignalKind::DeltaDivergence => write!(f, "delta_divergence"),
            SignalKind::LiquiditySweep => write!(f, "liquidity_sweep"),
            SignalKind::CvdDivergence => write!(f, "cvd_divergence"),
            SignalKind::VwapDeviation => write!(f, "vwap_deviation"),
        }
    }
}

/// Input value for one signal: booleans contribute all-or-nothing, strengths
/// contribute proportionally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Present(bool),
    Strength(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub kind: SignalKind,
    pub weight: f64,
    /// Exact weighted contribution to the total, in [0, weight].
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// 0..100
    pub probability: f64,
    pub dominant_pattern: Option<SignalKind>,
    pub scores: Vec<SignalScore>,
    pub meets_threshold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierWeights {
    pub absorption: f64,
    pub delta_divergence: f64,
    pub liquidity_sweep: f64,
    pub cvd_divergence: f64,
    pub vwap_deviation: f64,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            absorption: 0.30,
            delta_divergence: 0.25,
            liquidity_sweep: 0.20,
            cvd_divergence: 0.15,
            vwap_deviation: 0.10,
        }
    }
}

impl ClassifierWeights {
    pub fn sum(&self) -> f64 {
        self.absorption
            + self.delta_divergence
            + self.liquidity_sweep
            + self.cvd_divergence
            + self.vwap_deviation
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    fn weight_for(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Absorption => self.absorption,
            SignalKind::DeltaDivergence => self.delta_divergence,
            SignalKind::LiquiditySweep => self.liquidity_sweep,
            SignalKind::CvdDivergence => self.cvd_divergence,
            SignalKind::VwapDeviation => self.vwap_deviation,
        }
    }
}

/// Linear weighted-confluence combiner.
///
/// Deliberately auditable: every signal's exact weighted contribution is
/// retained in the result, not just the aggregate probability.
pub struct PatternClassifier {
    weights: ClassifierWeights,
    /// Probability threshold as a fraction, e.g. 0.75.
    threshold: f64,
}

impl PatternClassifier {
    pub fn new(weights: ClassifierWeights, threshold: f64) -> Self {
        let weights = if weights.is_valid() {
            weights
        } else {
            warn!(
                "classifier weights sum to {:.6}, expected 1.0; using defaults",
                weights.sum()
            );
            ClassifierWeights::default()
        };
        Self {
            weights,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn weights(&self) -> &ClassifierWeights {
        &self.weights
    }

    pub fn classify(&self, signals: &[(SignalKind, SignalValue)]) -> Classification {
        let mut scores = Vec::with_capacity(signals.len());
        let mut total = 0.0;

        for &(kind, value) in signals {
            let weight = self.weights.weight_for(kind);
            let fraction = match value {
                SignalValue::Present(true) => 1.0,
                SignalValue::Present(false) => 0.0,
                SignalValue::Strength(s) => s.clamp(0.0, 1.0),
            };
            let contribution = weight * fraction;
            total += contribution;
            scores.push(SignalScore {
                kind,
                weight,
                contribution,
            });
        }

        let probability = (total * 100.0).clamp(0.0, 100.0);
        let dominant_pattern = scores
            .iter()
            .filter(|s| s.contribution > 0.0)
            .max_by(|a, b| a.contribution.partial_cmp(&b.contribution).unwrap())
            .map(|s| s.kind);

        Classification {
            probability,
            dominant_pattern,
            scores,
            meets_threshold: probability >= self.threshold * 100.0,
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(ClassifierWeights::default(), 0.75)
    }
}
